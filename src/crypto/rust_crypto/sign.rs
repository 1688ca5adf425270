//! RSA and ECDSA keys: loading, signing, verification and RSA key
//! transport, using RustCrypto.

use std::str;

use der::{Decode, Encode};
use num_bigint::BigUint;
use p256::NistP256;
use p384::NistP384;
use pkcs8::{DecodePrivateKey, DecodePublicKey};
use rand::rngs::OsRng;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, Pkcs1v15Sign, Pss, RsaPrivateKey, RsaPublicKey};
use signature::hazmat::{PrehashSigner, PrehashVerifier};
use spki::{ObjectIdentifier, SubjectPublicKeyInfoRef};

use crate::buffer::Buf;
use crate::crypto::provider::{KeyProvider, SignatureVerifier, SigningKey as SigningKeyTrait};
use crate::crypto::Async;
use crate::types::{HashAlgorithm, SignatureAlgorithm, SignatureScheme};

const OID_RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
const OID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const OID_P256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
const OID_P384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.34");

static RSA_SCHEMES: &[SignatureScheme] = &[
    SignatureScheme::RSA_PKCS1_SHA256,
    SignatureScheme::RSA_PKCS1_SHA384,
    SignatureScheme::RSA_PKCS1_SHA512,
    SignatureScheme::RSA_PSS_RSAE_SHA256,
    SignatureScheme::RSA_PSS_RSAE_SHA384,
    SignatureScheme::RSA_PSS_RSAE_SHA512,
    SignatureScheme::RSA_PKCS1_SHA1,
];

static P256_SCHEMES: &[SignatureScheme] = &[
    SignatureScheme::ECDSA_SECP256R1_SHA256,
    SignatureScheme::ECDSA_SECP384R1_SHA384,
    SignatureScheme::ECDSA_SHA1,
];

static P384_SCHEMES: &[SignatureScheme] = &[
    SignatureScheme::ECDSA_SECP384R1_SHA384,
    SignatureScheme::ECDSA_SECP256R1_SHA256,
    SignatureScheme::ECDSA_SHA1,
];

fn pkcs1_padding(hash: Option<HashAlgorithm>) -> Result<Pkcs1v15Sign, String> {
    Ok(match hash {
        None => Pkcs1v15Sign::new_unprefixed(),
        Some(HashAlgorithm::SHA1) => Pkcs1v15Sign::new::<sha1::Sha1>(),
        Some(HashAlgorithm::SHA224) => Pkcs1v15Sign::new::<sha2::Sha224>(),
        Some(HashAlgorithm::SHA256) => Pkcs1v15Sign::new::<sha2::Sha256>(),
        Some(HashAlgorithm::SHA384) => Pkcs1v15Sign::new::<sha2::Sha384>(),
        Some(HashAlgorithm::SHA512) => Pkcs1v15Sign::new::<sha2::Sha512>(),
        Some(h) => return Err(format!("Unsupported PKCS#1 hash: {:?}", h)),
    })
}

fn pss_padding(hash: Option<HashAlgorithm>) -> Result<Pss, String> {
    Ok(match hash {
        Some(HashAlgorithm::SHA256) => Pss::new::<sha2::Sha256>(),
        Some(HashAlgorithm::SHA384) => Pss::new::<sha2::Sha384>(),
        Some(HashAlgorithm::SHA512) => Pss::new::<sha2::Sha512>(),
        h => return Err(format!("Unsupported PSS hash: {:?}", h)),
    })
}

/// ECDSA works on a field sized integer; shorter digests (SHA-1 on P-384)
/// are left padded, which does not change their value.
fn ecdsa_prehash(input: &[u8], field_len: usize) -> Vec<u8> {
    let mut out = vec![0; field_len.saturating_sub(input.len())];
    out.extend_from_slice(input);
    out
}

enum PrivateKey {
    Rsa(Box<RsaPrivateKey>),
    P256(p256::ecdsa::SigningKey),
    P384(p384::ecdsa::SigningKey),
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrivateKey::Rsa(k) => f.debug_tuple("PrivateKey::Rsa").field(&(k.size() * 8)).finish(),
            PrivateKey::P256(_) => f.debug_tuple("PrivateKey::P256").finish(),
            PrivateKey::P384(_) => f.debug_tuple("PrivateKey::P384").finish(),
        }
    }
}

impl SigningKeyTrait for PrivateKey {
    fn algorithm(&self) -> SignatureAlgorithm {
        match self {
            PrivateKey::Rsa(_) => SignatureAlgorithm::RSA,
            _ => SignatureAlgorithm::ECDSA,
        }
    }

    fn bits(&self) -> usize {
        match self {
            PrivateKey::Rsa(k) => k.size() * 8,
            PrivateKey::P256(_) => 256,
            PrivateKey::P384(_) => 384,
        }
    }

    fn schemes(&self) -> &[SignatureScheme] {
        match self {
            PrivateKey::Rsa(_) => RSA_SCHEMES,
            PrivateKey::P256(_) => P256_SCHEMES,
            PrivateKey::P384(_) => P384_SCHEMES,
        }
    }

    fn sign(
        &mut self,
        scheme: Option<SignatureScheme>,
        input: &[u8],
        out: &mut Buf,
    ) -> Result<Async<()>, String> {
        let hash = scheme.and_then(|s| s.hash_algorithm());
        out.clear();
        match self {
            PrivateKey::Rsa(key) => {
                let sig = if scheme.is_some_and(|s| s.is_pss()) {
                    key.sign_with_rng(&mut OsRng, pss_padding(hash)?, input)
                } else {
                    key.sign(pkcs1_padding(hash)?, input)
                };
                out.extend_from_slice(&sig.map_err(|e| format!("RSA signing failed: {e}"))?);
            }
            PrivateKey::P256(key) => {
                let sig: p256::ecdsa::Signature = key
                    .sign_prehash(&ecdsa_prehash(input, 32))
                    .map_err(|_| "ECDSA signing failed".to_string())?;
                out.extend_from_slice(sig.to_der().as_bytes());
            }
            PrivateKey::P384(key) => {
                let sig: p384::ecdsa::Signature = key
                    .sign_prehash(&ecdsa_prehash(input, 48))
                    .map_err(|_| "ECDSA signing failed".to_string())?;
                out.extend_from_slice(sig.to_der().as_bytes());
            }
        }
        Ok(Async::Ready(()))
    }

    fn decrypt(&mut self, ciphertext: &[u8], out: &mut Buf) -> Result<Async<()>, String> {
        let PrivateKey::Rsa(key) = self else {
            return Err("Decryption needs an RSA key".to_string());
        };
        let plain = key
            .decrypt(Pkcs1v15Encrypt, ciphertext)
            .map_err(|e| format!("RSA decryption failed: {e}"))?;
        out.clear();
        out.extend_from_slice(&plain);
        Ok(Async::Ready(()))
    }
}

#[derive(Debug)]
pub(super) struct RustCryptoKeyProvider;

impl KeyProvider for RustCryptoKeyProvider {
    fn load_private_key(&self, key_der: &[u8]) -> Result<Box<dyn SigningKeyTrait>, String> {
        // PKCS#8 first, it is the most common
        if let Ok(key) = p256::ecdsa::SigningKey::from_pkcs8_der(key_der) {
            return Ok(Box::new(PrivateKey::P256(key)));
        }
        if let Ok(key) = p384::ecdsa::SigningKey::from_pkcs8_der(key_der) {
            return Ok(Box::new(PrivateKey::P384(key)));
        }
        if let Ok(key) = RsaPrivateKey::from_pkcs8_der(key_der) {
            return Ok(Box::new(PrivateKey::Rsa(Box::new(key))));
        }

        // OpenSSL traditional formats
        if let Ok(key) = RsaPrivateKey::from_pkcs1_der(key_der) {
            return Ok(Box::new(PrivateKey::Rsa(Box::new(key))));
        }
        if let Ok(key) = elliptic_curve::SecretKey::<NistP256>::from_sec1_der(key_der) {
            return Ok(Box::new(PrivateKey::P256(key.into())));
        }
        if let Ok(key) = elliptic_curve::SecretKey::<NistP384>::from_sec1_der(key_der) {
            return Ok(Box::new(PrivateKey::P384(key.into())));
        }

        if let Ok(pem_str) = str::from_utf8(key_der) {
            if pem_str.contains("-----BEGIN") {
                if let Ok((_label, doc)) = pkcs8::Document::from_pem(pem_str) {
                    return self.load_private_key(doc.as_bytes());
                }
            }
        }

        Err("Failed to parse private key in any supported format".to_string())
    }
}

enum PublicKey {
    Rsa(RsaPublicKey),
    P256(p256::ecdsa::VerifyingKey),
    P384(p384::ecdsa::VerifyingKey),
}

impl PublicKey {
    fn from_spki(spki: &[u8]) -> Result<Self, String> {
        let info = SubjectPublicKeyInfoRef::from_der(spki)
            .map_err(|e| format!("Invalid SubjectPublicKeyInfo: {e}"))?;

        if info.algorithm.oid == OID_RSA_ENCRYPTION {
            let key = RsaPublicKey::from_public_key_der(spki)
                .map_err(|e| format!("Invalid RSA public key: {e}"))?;
            return Ok(PublicKey::Rsa(key));
        }

        if info.algorithm.oid != OID_EC_PUBLIC_KEY {
            return Err(format!(
                "Unsupported public key algorithm: {}",
                info.algorithm.oid
            ));
        }

        let curve: ObjectIdentifier = info
            .algorithm
            .parameters
            .as_ref()
            .ok_or("Missing EC curve parameter")?
            .decode_as()
            .map_err(|_| "Invalid EC curve parameter".to_string())?;
        let point = info
            .subject_public_key
            .as_bytes()
            .ok_or("Invalid EC public key bitstring")?;

        match curve {
            OID_P256 => p256::ecdsa::VerifyingKey::from_sec1_bytes(point)
                .map(PublicKey::P256)
                .map_err(|_| "Invalid P-256 public key".to_string()),
            OID_P384 => p384::ecdsa::VerifyingKey::from_sec1_bytes(point)
                .map(PublicKey::P384)
                .map_err(|_| "Invalid P-384 public key".to_string()),
            _ => Err(format!("Unsupported EC curve: {}", curve)),
        }
    }

    fn rsa(self) -> Result<RsaPublicKey, String> {
        match self {
            PublicKey::Rsa(k) => Ok(k),
            _ => Err("Not an RSA public key".to_string()),
        }
    }
}

#[derive(Debug)]
pub(super) struct RustCryptoSignatureVerifier;

impl SignatureVerifier for RustCryptoSignatureVerifier {
    fn key_info(&self, spki: &[u8]) -> Result<(SignatureAlgorithm, usize), String> {
        Ok(match PublicKey::from_spki(spki)? {
            PublicKey::Rsa(k) => (SignatureAlgorithm::RSA, k.n().bits()),
            PublicKey::P256(_) => (SignatureAlgorithm::ECDSA, 256),
            PublicKey::P384(_) => (SignatureAlgorithm::ECDSA, 384),
        })
    }

    fn verify(
        &self,
        spki: &[u8],
        scheme: Option<SignatureScheme>,
        input: &[u8],
        signature: &[u8],
    ) -> Result<Async<bool>, String> {
        let hash = scheme.and_then(|s| s.hash_algorithm());
        let ok = match PublicKey::from_spki(spki)? {
            PublicKey::Rsa(key) => {
                if scheme.is_some_and(|s| s.is_pss()) {
                    key.verify(pss_padding(hash)?, input, signature).is_ok()
                } else {
                    key.verify(pkcs1_padding(hash)?, input, signature).is_ok()
                }
            }
            PublicKey::P256(key) => match p256::ecdsa::Signature::from_der(signature) {
                Ok(sig) => key.verify_prehash(&ecdsa_prehash(input, 32), &sig).is_ok(),
                Err(_) => false,
            },
            PublicKey::P384(key) => match p384::ecdsa::Signature::from_der(signature) {
                Ok(sig) => key.verify_prehash(&ecdsa_prehash(input, 48), &sig).is_ok(),
                Err(_) => false,
            },
        };
        Ok(Async::Ready(ok))
    }

    fn rsa_recover(
        &self,
        spki: &[u8],
        signature: &[u8],
        out: &mut Buf,
    ) -> Result<Async<()>, String> {
        let key = PublicKey::from_spki(spki)?.rsa()?;
        let k = key.size();
        if signature.len() != k {
            return Err("Signature length does not match modulus".to_string());
        }

        let n = BigUint::from_bytes_be(&key.n().to_bytes_be());
        let e = BigUint::from_bytes_be(&key.e().to_bytes_be());
        let s = BigUint::from_bytes_be(signature);
        if s >= n {
            return Err("Signature out of range".to_string());
        }
        let m = s.modpow(&e, &n).to_bytes_be();

        // EM = 0x00 || 0x01 || PS(0xFF..) || 0x00 || T, with the leading zero
        // dropped by the integer conversion.
        if m.len() != k - 1 || m[0] != 0x01 {
            return Err("Bad PKCS#1 signature padding".to_string());
        }
        let sep = m[1..]
            .iter()
            .position(|b| *b != 0xFF)
            .map(|i| i + 1)
            .ok_or("Bad PKCS#1 signature padding")?;
        if m[sep] != 0x00 || sep < 9 {
            return Err("Bad PKCS#1 signature padding".to_string());
        }

        out.clear();
        out.extend_from_slice(&m[sep + 1..]);
        Ok(Async::Ready(()))
    }

    fn rsa_encrypt(
        &self,
        spki: &[u8],
        plaintext: &[u8],
        out: &mut Buf,
    ) -> Result<Async<()>, String> {
        let key = PublicKey::from_spki(spki)?.rsa()?;
        let ct = key
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, plaintext)
            .map_err(|e| format!("RSA encryption failed: {e}"))?;
        out.clear();
        out.extend_from_slice(&ct);
        Ok(Async::Ready(()))
    }
}

pub(super) static KEY_PROVIDER: RustCryptoKeyProvider = RustCryptoKeyProvider;

pub(super) static SIGNATURE_VERIFIER: RustCryptoSignatureVerifier = RustCryptoSignatureVerifier;

/// DER SubjectPublicKeyInfo of a leaf certificate.
#[cfg(test)]
pub(crate) fn spki_of(cert_der: &[u8]) -> Vec<u8> {
    let cert = x509_cert::Certificate::from_der(cert_der).unwrap();
    cert.tbs_certificate.subject_public_key_info.to_der().unwrap()
}

#[cfg(test)]
mod tests {
    use super::super::hash::digest;
    use super::*;

    const RSA_KEY: &[u8] = include_bytes!("../../../tests/fixtures/rsa_key.der");
    const RSA_CERT: &[u8] = include_bytes!("../../../tests/fixtures/rsa_cert.der");
    const EC_KEY: &[u8] = include_bytes!("../../../tests/fixtures/ec_key.der");
    const EC_CERT: &[u8] = include_bytes!("../../../tests/fixtures/ec_cert.der");

    #[test]
    fn rsa_key_info_and_schemes() {
        let key = KEY_PROVIDER.load_private_key(RSA_KEY).unwrap();
        assert_eq!(key.algorithm(), SignatureAlgorithm::RSA);
        assert_eq!(key.bits(), 2048);
        let spki = spki_of(RSA_CERT);
        assert_eq!(
            SIGNATURE_VERIFIER.key_info(&spki).unwrap(),
            (SignatureAlgorithm::RSA, 2048)
        );
    }

    #[test]
    fn rsa_pkcs1_sign_verify_and_recover() {
        let mut key = KEY_PROVIDER.load_private_key(RSA_KEY).unwrap();
        let spki = spki_of(RSA_CERT);
        let scheme = Some(SignatureScheme::RSA_PKCS1_SHA256);
        let h = digest(HashAlgorithm::SHA256, b"params").unwrap();

        let mut sig = Buf::new();
        key.sign(scheme, &h, &mut sig).unwrap();
        assert_eq!(
            SIGNATURE_VERIFIER.verify(&spki, scheme, &h, &sig).unwrap(),
            Async::Ready(true)
        );

        // Recovered content is DigestInfo(SHA-256) ending in the hash.
        let mut rec = Buf::new();
        SIGNATURE_VERIFIER.rsa_recover(&spki, &sig, &mut rec).unwrap();
        assert_eq!(rec.len(), 19 + 32);
        assert_eq!(&rec[19..], &h[..]);

        sig[10] ^= 1;
        assert_eq!(
            SIGNATURE_VERIFIER.verify(&spki, scheme, &h, &sig).unwrap(),
            Async::Ready(false)
        );
    }

    #[test]
    fn rsa_legacy_signature_is_raw_md5_sha1() {
        let mut key = KEY_PROVIDER.load_private_key(RSA_KEY).unwrap();
        let spki = spki_of(RSA_CERT);
        let input = [0x42u8; 36];
        let mut sig = Buf::new();
        key.sign(None, &input, &mut sig).unwrap();
        let mut rec = Buf::new();
        SIGNATURE_VERIFIER.rsa_recover(&spki, &sig, &mut rec).unwrap();
        assert_eq!(&rec[..], &input[..]);
    }

    #[test]
    fn rsa_key_transport() {
        let mut key = KEY_PROVIDER.load_private_key(RSA_KEY).unwrap();
        let spki = spki_of(RSA_CERT);
        let mut ct = Buf::new();
        SIGNATURE_VERIFIER
            .rsa_encrypt(&spki, &[3; 48], &mut ct)
            .unwrap();
        let mut pt = Buf::new();
        key.decrypt(&ct, &mut pt).unwrap();
        assert_eq!(&pt[..], &[3; 48]);
    }

    #[test]
    fn ecdsa_sign_verify_with_sha1_and_sha256() {
        let mut key = KEY_PROVIDER.load_private_key(EC_KEY).unwrap();
        assert_eq!(key.algorithm(), SignatureAlgorithm::ECDSA);
        let spki = spki_of(EC_CERT);

        for (scheme, alg) in [
            (Some(SignatureScheme::ECDSA_SECP256R1_SHA256), HashAlgorithm::SHA256),
            (None, HashAlgorithm::SHA1),
        ] {
            let h = digest(alg, b"params").unwrap();
            let mut sig = Buf::new();
            key.sign(scheme, &h, &mut sig).unwrap();
            assert_eq!(
                SIGNATURE_VERIFIER.verify(&spki, scheme, &h, &sig).unwrap(),
                Async::Ready(true)
            );
            let other = digest(alg, b"other").unwrap();
            assert_eq!(
                SIGNATURE_VERIFIER.verify(&spki, scheme, &other, &sig).unwrap(),
                Async::Ready(false)
            );
        }
    }

    #[test]
    fn ecdsa_key_cannot_decrypt() {
        let mut key = KEY_PROVIDER.load_private_key(EC_KEY).unwrap();
        assert!(key.decrypt(&[0; 64], &mut Buf::new()).is_err());
    }
}
