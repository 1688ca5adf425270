//! Key exchange and handshake signatures.
//!
//! One [`KeyExchange`] value per handshake carries the ephemeral state
//! between the ServerKeyExchange and the ClientKeyExchange. The six
//! procedures that touch the crypto provider are resumable
//! [`AsyncOp`](crate::pending::AsyncOp)s, split by side into [`client`]
//! and [`server`]:
//!
//! | procedure            | side   | provider call              |
//! |----------------------|--------|----------------------------|
//! | send ServerKx        | server | sign                       |
//! | receive ServerKx     | client | verify / rsa_recover       |
//! | send ClientKx        | client | agree / rsa_encrypt        |
//! | receive ClientKx     | server | agree / decrypt            |
//! | send CertVerify      | client | sign                       |
//! | receive CertVerify   | server | verify / rsa_recover       |

use std::fmt;

use zeroize::Zeroizing;

use crate::buffer::Buf;
use crate::config::Config;
use crate::crypto::{ActiveKeyExchange, Async, CryptoProvider, Transcript};
use crate::suite::{KeyExchangeAlgorithm, SuiteParams};
use crate::types::{HashAlgorithm, NamedGroup, ProtocolVersion, SignatureAlgorithm};
use crate::types::SignatureScheme;
use crate::Error;

pub(crate) mod client;
pub(crate) mod server;

pub(crate) use client::{RecvServerKx, SendCertVerify, SendClientKx};
pub(crate) use server::{RecvCertVerify, RecvClientKx, SendServerKx};

/// RFC 7919 ffdhe2048, the default group for DHE suites.
pub(crate) const FFDHE2048_PRIME: &[u8] = &[
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xad, 0xf8, 0x54, 0x58, 0xa2, 0xbb, 0x4a, 0x9a,
    0xaf, 0xdc, 0x56, 0x20, 0x27, 0x3d, 0x3c, 0xf1, 0xd8, 0xb9, 0xc5, 0x83, 0xce, 0x2d, 0x36, 0x95,
    0xa9, 0xe1, 0x36, 0x41, 0x14, 0x64, 0x33, 0xfb, 0xcc, 0x93, 0x9d, 0xce, 0x24, 0x9b, 0x3e, 0xf9,
    0x7d, 0x2f, 0xe3, 0x63, 0x63, 0x0c, 0x75, 0xd8, 0xf6, 0x81, 0xb2, 0x02, 0xae, 0xc4, 0x61, 0x7a,
    0xd3, 0xdf, 0x1e, 0xd5, 0xd5, 0xfd, 0x65, 0x61, 0x24, 0x33, 0xf5, 0x1f, 0x5f, 0x06, 0x6e, 0xd0,
    0x85, 0x63, 0x65, 0x55, 0x3d, 0xed, 0x1a, 0xf3, 0xb5, 0x57, 0x13, 0x5e, 0x7f, 0x57, 0xc9, 0x35,
    0x98, 0x4f, 0x0c, 0x70, 0xe0, 0xe6, 0x8b, 0x77, 0xe2, 0xa6, 0x89, 0xda, 0xf3, 0xef, 0xe8, 0x72,
    0x1d, 0xf1, 0x58, 0xa1, 0x36, 0xad, 0xe7, 0x35, 0x30, 0xac, 0xca, 0x4f, 0x48, 0x3a, 0x79, 0x7a,
    0xbc, 0x0a, 0xb1, 0x82, 0xb3, 0x24, 0xfb, 0x61, 0xd1, 0x08, 0xa9, 0x4b, 0xb2, 0xc8, 0xe3, 0xfb,
    0xb9, 0x6a, 0xda, 0xb7, 0x60, 0xd7, 0xf4, 0x68, 0x1d, 0x4f, 0x42, 0xa3, 0xde, 0x39, 0x4d, 0xf4,
    0xae, 0x56, 0xed, 0xe7, 0x63, 0x72, 0xbb, 0x19, 0x0b, 0x07, 0xa7, 0xc8, 0xee, 0x0a, 0x6d, 0x70,
    0x9e, 0x02, 0xfc, 0xe1, 0xcd, 0xf7, 0xe2, 0xec, 0xc0, 0x34, 0x04, 0xcd, 0x28, 0x34, 0x2f, 0x61,
    0x91, 0x72, 0xfe, 0x9c, 0xe9, 0x85, 0x83, 0xff, 0x8e, 0x4f, 0x12, 0x32, 0xee, 0xf2, 0x81, 0x83,
    0xc3, 0xfe, 0x3b, 0x1b, 0x4c, 0x6f, 0xad, 0x73, 0x3b, 0xb5, 0xfc, 0xbc, 0x2e, 0xc2, 0x20, 0x05,
    0xc5, 0x8e, 0xf1, 0x83, 0x7d, 0x16, 0x83, 0xb2, 0xc6, 0xf3, 0x4a, 0x26, 0xc1, 0xb2, 0xef, 0xfa,
    0x88, 0x6b, 0x42, 0x38, 0x61, 0x28, 0x5c, 0x97, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
];

pub(crate) const FFDHE_GENERATOR: &[u8] = &[2];

/// Longest PSK identity or identity hint accepted (RFC 4279 section 5.3).
pub(crate) const MAX_PSK_IDENTITY_LEN: usize = 128;

/// RSA premaster secret length.
pub(crate) const RSA_PMS_LEN: usize = 48;

/// Inputs shared by all key exchange procedures of one handshake.
pub(crate) struct KxContext<'a> {
    pub provider: &'a CryptoProvider,
    pub config: &'a Config,
    pub params: &'static SuiteParams,
    pub version: ProtocolVersion,
    pub client_random: &'a [u8; 32],
    pub server_random: &'a [u8; 32],
}

impl KxContext<'_> {
    pub fn tls12(&self) -> bool {
        self.version.is_tls12_family()
    }

    /// `client_random || server_random`, the prefix of signed params.
    fn randoms(&self) -> [&[u8]; 2] {
        [&self.client_random[..], &self.server_random[..]]
    }
}

/// The agreement family of the negotiated key exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Agreement {
    /// RSA key transport or plain PSK.
    None,
    Dh { p: Vec<u8>, g: Vec<u8> },
    Ecdh(NamedGroup),
}

/// Ephemeral key exchange state of one handshake.
pub(crate) struct KeyExchange {
    pub algorithm: KeyExchangeAlgorithm,
    pub agreement: Agreement,
    local: Option<Box<dyn ActiveKeyExchange>>,
    pub peer_public: Vec<u8>,
    pub psk_hint: Option<Vec<u8>>,
}

impl KeyExchange {
    pub fn new(algorithm: KeyExchangeAlgorithm) -> Self {
        KeyExchange {
            algorithm,
            agreement: Agreement::None,
            local: None,
            peer_public: Vec::new(),
            psk_hint: None,
        }
    }

    /// Generate the local ephemeral key pair, once.
    pub fn start_local(&mut self, provider: &CryptoProvider) -> Result<(), Error> {
        if self.local.is_some() {
            return Ok(());
        }
        let active = match &self.agreement {
            Agreement::None => return Ok(()),
            Agreement::Dh { p, g } => provider.dh.start(p, g).map_err(Error::CryptoError)?,
            Agreement::Ecdh(group) => provider
                .kx_group(*group)
                .ok_or(Error::UnsupportedGroup(group.as_u16()))?
                .start()
                .map_err(Error::CryptoError)?,
        };
        self.local = Some(active);
        Ok(())
    }

    pub fn local_public(&self) -> Result<&[u8], Error> {
        self.local
            .as_ref()
            .map(|l| l.public_key())
            .ok_or(Error::InternalError("no local key share"))
    }

    /// Shared secret with `peer`. May pend.
    pub fn agree(&mut self, peer: &[u8], out: &mut Buf) -> Result<Async<()>, Error> {
        let local = self
            .local
            .as_mut()
            .ok_or(Error::InternalError("no local key share"))?;
        out.clear();
        local
            .agree(peer, out)
            .map_err(|e| Error::HandshakeFailure(format!("key agreement: {}", e)))
    }
}

impl fmt::Debug for KeyExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyExchange")
            .field("algorithm", &self.algorithm)
            .field("agreement", &self.agreement)
            .field("local", &self.local.is_some())
            .finish()
    }
}

/// Assemble the premaster secret from the agreement output and the PSK.
///
/// * RSA, DHE, ECDHE: the agreed or transported secret as is.
/// * PSK: `len(N) || N zero bytes || len(N) || psk` with N the PSK length.
/// * DHE-PSK, ECDHE-PSK: `len(Z) || Z || len(psk) || psk`.
pub(crate) fn premaster_secret(
    kx: KeyExchangeAlgorithm,
    secret: &[u8],
    psk: Option<&[u8]>,
) -> Result<Zeroizing<Vec<u8>>, Error> {
    if !kx.uses_psk() {
        return Ok(Zeroizing::new(secret.to_vec()));
    }
    let psk = psk.ok_or(Error::NoPrivateKey("no pre-shared key"))?;
    let other: Zeroizing<Vec<u8>> = if kx == KeyExchangeAlgorithm::Psk {
        Zeroizing::new(vec![0; psk.len()])
    } else {
        Zeroizing::new(secret.to_vec())
    };
    let mut pms = Zeroizing::new(Vec::with_capacity(4 + other.len() + psk.len()));
    pms.extend_from_slice(&(other.len() as u16).to_be_bytes());
    pms.extend_from_slice(&other);
    pms.extend_from_slice(&(psk.len() as u16).to_be_bytes());
    pms.extend_from_slice(psk);
    Ok(pms)
}

/// First ECDHE group in local preference order that the peer offered and
/// the provider supports. A peer without a supported_groups extension is
/// assumed to accept anything.
pub(crate) fn choose_group(
    local: &[NamedGroup],
    peer: Option<&[NamedGroup]>,
    provider: &CryptoProvider,
) -> Option<NamedGroup> {
    local
        .iter()
        .copied()
        .filter(|g| g.is_ecc() && provider.kx_group(*g).is_some())
        .find(|g| peer.map(|p| p.contains(g)).unwrap_or(true))
}

/// Bit length of a big endian unsigned integer.
pub(crate) fn bit_len(v: &[u8]) -> usize {
    let Some(first) = v.iter().position(|b| *b != 0) else {
        return 0;
    };
    (v.len() - first) * 8 - v[first].leading_zeros() as usize
}

/// Check a peer public key from a certificate against the size policy and
/// the type the suite authenticates with.
pub(crate) fn check_peer_key(
    provider: &CryptoProvider,
    config: &Config,
    spki: &[u8],
    expected: Option<SignatureAlgorithm>,
) -> Result<SignatureAlgorithm, Error> {
    let (alg, bits) = provider
        .signature_verifier
        .key_info(spki)
        .map_err(Error::CertificateError)?;
    if let Some(expected) = expected {
        if alg != expected {
            return Err(Error::CertificateError(format!(
                "certificate key is {:?}, suite needs {:?}",
                alg, expected
            )));
        }
    }
    let min = match alg {
        SignatureAlgorithm::RSA => config.min_rsa_bits(),
        _ => config.min_ecc_bits(),
    };
    if bits < min {
        debug!("Peer {:?} key of {} bits below minimum {}", alg, bits, min);
        return Err(Error::KeyTooSmall(bits));
    }
    Ok(alg)
}

/// Check finite field DH parameters from a ServerKeyExchange.
pub(crate) fn check_dh_params(config: &Config, p: &[u8], g: &[u8], ys: &[u8]) -> Result<(), Error> {
    let bits = bit_len(p);
    if bits < config.min_dh_bits() {
        return Err(Error::KeyTooSmall(bits));
    }
    if bits > config.max_dh_bits() {
        return Err(Error::KeyTooLarge(bits));
    }
    if bit_len(g) == 0 || bit_len(ys) == 0 || bit_len(ys) > bits {
        return Err(Error::HandshakeFailure("invalid DH parameters".into()));
    }
    Ok(())
}

// DER DigestInfo prefixes (RFC 8017 section 9.2, note 1).
const DIGEST_INFO_SHA1: &[u8] = &[
    0x30, 0x21, 0x30, 0x09, 0x06, 0x05, 0x2b, 0x0e, 0x03, 0x02, 0x1a, 0x05, 0x00, 0x04, 0x14,
];
const DIGEST_INFO_SHA224: &[u8] = &[
    0x30, 0x2d, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x04, 0x05,
    0x00, 0x04, 0x1c,
];
const DIGEST_INFO_SHA256: &[u8] = &[
    0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01, 0x05,
    0x00, 0x04, 0x20,
];
const DIGEST_INFO_SHA384: &[u8] = &[
    0x30, 0x41, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x02, 0x05,
    0x00, 0x04, 0x30,
];
const DIGEST_INFO_SHA512: &[u8] = &[
    0x30, 0x51, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x03, 0x05,
    0x00, 0x04, 0x40,
];

fn digest_info_prefix(hash: HashAlgorithm) -> Option<&'static [u8]> {
    match hash {
        HashAlgorithm::SHA1 => Some(DIGEST_INFO_SHA1),
        HashAlgorithm::SHA224 => Some(DIGEST_INFO_SHA224),
        HashAlgorithm::SHA256 => Some(DIGEST_INFO_SHA256),
        HashAlgorithm::SHA384 => Some(DIGEST_INFO_SHA384),
        HashAlgorithm::SHA512 => Some(DIGEST_INFO_SHA512),
        _ => None,
    }
}

fn digest(
    provider: &CryptoProvider,
    alg: HashAlgorithm,
    parts: &[&[u8]],
    out: &mut Buf,
) -> Result<(), Error> {
    let mut ctx = provider
        .hash_provider
        .create_hash(alg)
        .map_err(Error::CryptoError)?;
    for p in parts {
        ctx.update(p);
    }
    ctx.clone_and_finalize(out);
    Ok(())
}

/// Hashes for legacy signatures: MD5||SHA-1 for RSA, SHA-1 for ECDSA.
fn legacy_hashes(key: SignatureAlgorithm) -> Result<&'static [HashAlgorithm], Error> {
    match key {
        SignatureAlgorithm::RSA => Ok(&[HashAlgorithm::MD5, HashAlgorithm::SHA1]),
        SignatureAlgorithm::ECDSA => Ok(&[HashAlgorithm::SHA1]),
        _ => Err(Error::HandshakeFailure(format!(
            "{:?} keys cannot sign before TLS 1.2",
            key
        ))),
    }
}

/// Signature input over `parts` (ServerKeyExchange params).
pub(crate) fn signature_input(
    provider: &CryptoProvider,
    key: SignatureAlgorithm,
    scheme: Option<SignatureScheme>,
    parts: &[&[u8]],
    out: &mut Buf,
) -> Result<(), Error> {
    out.clear();
    match scheme {
        Some(s) => match s.hash_algorithm() {
            Some(h) => digest(provider, h, parts, out),
            None => {
                for p in parts {
                    out.extend_from_slice(p);
                }
                Ok(())
            }
        },
        None => {
            for h in legacy_hashes(key)? {
                digest(provider, *h, parts, out)?;
            }
            Ok(())
        }
    }
}

/// Signature input over the handshake transcript (CertificateVerify).
pub(crate) fn transcript_signature_input(
    transcript: &Transcript,
    key: SignatureAlgorithm,
    scheme: Option<SignatureScheme>,
    out: &mut Buf,
) -> Result<(), Error> {
    out.clear();
    match scheme {
        Some(s) => {
            let h = s.hash_algorithm().ok_or(Error::HandshakeFailure(
                "signature scheme without hash in CertificateVerify".into(),
            ))?;
            transcript.hash(h, out)
        }
        None => {
            for h in legacy_hashes(key)? {
                transcript.hash(*h, out)?;
            }
            Ok(())
        }
    }
}

/// The scheme a peer signed with must match its key type and, under
/// TLS 1.2, be one we advertised.
pub(crate) fn check_peer_scheme(
    tls12: bool,
    key: SignatureAlgorithm,
    scheme: Option<SignatureScheme>,
    offered: &[SignatureScheme],
) -> Result<(), Error> {
    match (tls12, scheme) {
        (false, None) => Ok(()),
        (true, Some(s)) if s.signature_algorithm() == key && offered.contains(&s) => Ok(()),
        (true, Some(s)) => Err(Error::HandshakeFailure(format!(
            "peer signed with unexpected scheme {:?}",
            s
        ))),
        _ => Err(Error::decode("signature scheme presence does not match version")),
    }
}

/// Verify a peer signature. PKCS#1 v1.5 RSA goes through `rsa_recover`
/// and a comparison against the expected DigestInfo (or raw MD5||SHA-1
/// before TLS 1.2); everything else through `verify`.
pub(crate) fn verify_signature(
    provider: &CryptoProvider,
    spki: &[u8],
    key: SignatureAlgorithm,
    scheme: Option<SignatureScheme>,
    input: &[u8],
    signature: &[u8],
    recovered: &mut Buf,
) -> Result<Async<bool>, Error> {
    let pkcs1 = key == SignatureAlgorithm::RSA && scheme.map(|s| s.is_rsa_pkcs1()).unwrap_or(true);
    let verifier = provider.signature_verifier;

    if !pkcs1 {
        return verifier
            .verify(spki, scheme, input, signature)
            .map_err(Error::CryptoError);
    }

    recovered.clear();
    match verifier.rsa_recover(spki, signature, recovered) {
        Ok(Async::Ready(())) => {}
        Ok(Async::Pending) => return Ok(Async::Pending),
        Err(e) => {
            debug!("RSA signature recovery failed: {}", e);
            return Ok(Async::Ready(false));
        }
    }

    let prefix = match scheme.and_then(|s| s.hash_algorithm()) {
        Some(h) => digest_info_prefix(h)
            .ok_or(Error::HandshakeFailure(format!("no DigestInfo for {:?}", h)))?,
        None => &[],
    };
    let ok = recovered.len() == prefix.len() + input.len()
        && recovered.starts_with(prefix)
        && crate::util::ct_eq(&recovered[prefix.len()..], input);
    Ok(Async::Ready(ok))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::rust_crypto::default_provider;

    #[test]
    fn plain_psk_premaster_is_zeros_then_key() {
        let pms = premaster_secret(KeyExchangeAlgorithm::Psk, &[], Some(&[0xAA, 0xBB])).unwrap();
        assert_eq!(&pms[..], &[0, 2, 0, 0, 0, 2, 0xAA, 0xBB]);
    }

    #[test]
    fn dhe_psk_premaster_wraps_both_secrets() {
        let pms =
            premaster_secret(KeyExchangeAlgorithm::DhePsk, &[1, 2, 3], Some(&[9])).unwrap();
        assert_eq!(&pms[..], &[0, 3, 1, 2, 3, 0, 1, 9]);
    }

    #[test]
    fn non_psk_premaster_is_passthrough() {
        let pms = premaster_secret(KeyExchangeAlgorithm::Ecdhe, &[5; 32], None).unwrap();
        assert_eq!(&pms[..], &[5; 32]);
        assert!(premaster_secret(KeyExchangeAlgorithm::Psk, &[], None).is_err());
    }

    #[test]
    fn bit_lengths() {
        assert_eq!(bit_len(&[]), 0);
        assert_eq!(bit_len(&[0, 0]), 0);
        assert_eq!(bit_len(&[0, 1]), 1);
        assert_eq!(bit_len(&[0x80, 0]), 16);
        assert_eq!(bit_len(FFDHE2048_PRIME), 2048);
    }

    #[test]
    fn group_choice_follows_local_order() {
        let p = default_provider();
        let local = [NamedGroup::X25519, NamedGroup::Secp256r1];
        assert_eq!(
            choose_group(&local, Some(&[NamedGroup::Secp256r1, NamedGroup::X25519]), &p),
            Some(NamedGroup::X25519)
        );
        assert_eq!(
            choose_group(&local, Some(&[NamedGroup::Secp256r1]), &p),
            Some(NamedGroup::Secp256r1)
        );
        assert_eq!(choose_group(&local, Some(&[NamedGroup::X448]), &p), None);
        assert_eq!(choose_group(&local, None, &p), Some(NamedGroup::X25519));
    }

    #[test]
    fn dh_parameter_policy() {
        let config = Config::default();
        let ys = [7u8; 256];
        assert!(check_dh_params(&config, FFDHE2048_PRIME, &[2], &ys).is_ok());
        assert!(matches!(
            check_dh_params(&config, &[0xFF; 64], &[2], &[7]),
            Err(Error::KeyTooSmall(512))
        ));
        assert!(matches!(
            check_dh_params(&config, &[0xFF; 1040], &[2], &[7]),
            Err(Error::KeyTooLarge(8320))
        ));
        assert!(check_dh_params(&config, FFDHE2048_PRIME, &[0], &ys).is_err());
    }

    #[test]
    fn peer_scheme_must_match_key_and_offer() {
        let offered = [SignatureScheme::RSA_PKCS1_SHA256];
        let rsa = SignatureAlgorithm::RSA;
        assert!(check_peer_scheme(true, rsa, Some(SignatureScheme::RSA_PKCS1_SHA256), &offered).is_ok());
        assert!(check_peer_scheme(true, rsa, Some(SignatureScheme::RSA_PKCS1_SHA384), &offered).is_err());
        assert!(check_peer_scheme(
            true,
            rsa,
            Some(SignatureScheme::ECDSA_SECP256R1_SHA256),
            &[SignatureScheme::ECDSA_SECP256R1_SHA256]
        )
        .is_err());
        assert!(check_peer_scheme(false, rsa, None, &offered).is_ok());
        assert!(check_peer_scheme(true, rsa, None, &offered).is_err());
    }

    #[test]
    fn legacy_rsa_input_is_md5_then_sha1() {
        let p = default_provider();
        let mut out = Buf::new();
        signature_input(&p, SignatureAlgorithm::RSA, None, &[b"abc"], &mut out).unwrap();
        assert_eq!(out.len(), 36);
        signature_input(&p, SignatureAlgorithm::ECDSA, None, &[b"abc"], &mut out).unwrap();
        assert_eq!(out.len(), 20);
        let scheme = Some(SignatureScheme::RSA_PKCS1_SHA384);
        signature_input(&p, SignatureAlgorithm::RSA, scheme, &[b"a", b"bc"], &mut out).unwrap();
        assert_eq!(out.len(), 48);
    }
}
