use std::fmt::Debug;

use der::{Decode, Encode};
use x509_cert::Certificate;

/// Validation of the peer's certificate chain.
///
/// Returns the DER SubjectPublicKeyInfo of the leaf, which the handshake
/// then uses to verify signatures or encrypt the premaster secret.
pub trait CertVerifier: Send + Sync + Debug {
    fn verify_chain(&self, chain: &[Vec<u8>]) -> Result<Vec<u8>, String>;
}

/// Accepts any chain and extracts the leaf public key.
///
/// Trust decisions are left to the application, which sees the chain
/// through [`Output::PeerCertificate`](crate::Output::PeerCertificate).
#[derive(Debug, Default)]
pub struct LeafKeyVerifier;

impl CertVerifier for LeafKeyVerifier {
    fn verify_chain(&self, chain: &[Vec<u8>]) -> Result<Vec<u8>, String> {
        let leaf = chain.first().ok_or("empty certificate chain")?;
        let cert =
            Certificate::from_der(leaf).map_err(|e| format!("Failed to parse certificate: {e}"))?;
        cert.tbs_certificate
            .subject_public_key_info
            .to_der()
            .map_err(|e| format!("Failed to encode public key: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_garbage() {
        assert!(LeafKeyVerifier.verify_chain(&[]).is_err());
        assert!(LeafKeyVerifier.verify_chain(&[vec![1, 2, 3]]).is_err());
    }

    #[test]
    fn extracts_leaf_spki() {
        let cert = include_bytes!("../../tests/fixtures/ec_cert.der").to_vec();
        let spki = LeafKeyVerifier.verify_chain(&[cert]).unwrap();
        // SEQUENCE
        assert_eq!(spki[0], 0x30);
    }
}
