//! Local certificate chain and private key.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::crypto::{CertVerifier, LeafKeyVerifier, SigningKey};
use crate::Error;

/// A certificate chain together with the private key of its leaf.
///
/// The chain is sent as-is in the Certificate message, leaf first.
pub struct Identity {
    pub(crate) chain: Vec<Vec<u8>>,
    pub(crate) key: Box<dyn SigningKey>,
}

impl Identity {
    /// Load `key_der` through the configured key provider.
    ///
    /// Fails if the chain is empty or the leaf's public key is of a different
    /// type than the private key.
    pub fn new(config: &Config, chain: Vec<Vec<u8>>, key_der: &[u8]) -> Result<Identity, Error> {
        let provider = config.crypto_provider();

        let spki = LeafKeyVerifier
            .verify_chain(&chain)
            .map_err(Error::CertificateError)?;
        let (leaf_alg, leaf_bits) = provider
            .signature_verifier
            .key_info(&spki)
            .map_err(Error::CertificateError)?;

        let key = provider
            .key_provider
            .load_private_key(key_der)
            .map_err(Error::ConfigError)?;

        if key.algorithm() != leaf_alg {
            return Err(Error::ConfigError(format!(
                "certificate key is {:?}, private key is {:?}",
                leaf_alg,
                key.algorithm()
            )));
        }

        debug!(
            "Identity loaded: {:?} {} bits, chain of {}",
            leaf_alg,
            leaf_bits,
            chain.len()
        );

        Ok(Identity { chain, key })
    }

    /// The chain, leaf first.
    pub fn chain(&self) -> &[Vec<u8>] {
        &self.chain
    }

    /// SHA-256 of the DER leaf certificate.
    pub fn fingerprint(&self) -> Vec<u8> {
        calculate_fingerprint(&self.chain[0])
    }

    /// The fingerprint as uppercase hex pairs separated by colons.
    pub fn fingerprint_str(&self) -> String {
        format_fingerprint(&self.fingerprint())
    }
}

pub(crate) fn calculate_fingerprint(cert_der: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(cert_der);
    hasher.finalize().to_vec()
}

pub(crate) fn format_fingerprint(fingerprint: &[u8]) -> String {
    fingerprint
        .iter()
        .map(|byte| format!("{:02X}", byte))
        .collect::<Vec<String>>()
        .join(":")
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("chain", &self.chain.len())
            .field("algorithm", &self.key.algorithm())
            .field("bits", &self.key.bits())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SignatureAlgorithm;

    const RSA_CERT: &[u8] = include_bytes!("../tests/fixtures/rsa_cert.der");
    const RSA_KEY: &[u8] = include_bytes!("../tests/fixtures/rsa_key.der");
    const EC_CERT: &[u8] = include_bytes!("../tests/fixtures/ec_cert.der");
    const EC_KEY: &[u8] = include_bytes!("../tests/fixtures/ec_key.der");

    #[test]
    fn loads_matching_pairs() {
        let _ = env_logger::try_init();
        let config = Config::default();

        let rsa = Identity::new(&config, vec![RSA_CERT.to_vec()], RSA_KEY).unwrap();
        assert_eq!(rsa.key.algorithm(), SignatureAlgorithm::RSA);

        let ec = Identity::new(&config, vec![EC_CERT.to_vec()], EC_KEY).unwrap();
        assert_eq!(ec.key.algorithm(), SignatureAlgorithm::ECDSA);
        assert_eq!(ec.chain().len(), 1);
    }

    #[test]
    fn rejects_mismatched_key() {
        let config = Config::default();
        let err = Identity::new(&config, vec![RSA_CERT.to_vec()], EC_KEY).unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn rejects_empty_chain() {
        let config = Config::default();
        let err = Identity::new(&config, vec![], RSA_KEY).unwrap_err();
        assert!(matches!(err, Error::CertificateError(_)));
    }

    #[test]
    fn fingerprint_formatting() {
        let formatted = format_fingerprint(&[0xAF, 0x12, 0xF6, 0x38, 0x2A]);
        assert_eq!(formatted, "AF:12:F6:38:2A");

        let config = Config::default();
        let ec = Identity::new(&config, vec![EC_CERT.to_vec()], EC_KEY).unwrap();
        assert_eq!(ec.fingerprint().len(), 32);
        let s = ec.fingerprint_str();
        // 32 pairs and 31 colons
        assert_eq!(s.len(), 95);
        assert!(s.split(':').all(|p| u8::from_str_radix(p, 16).is_ok()));
    }
}
