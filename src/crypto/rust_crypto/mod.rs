//! Pure Rust cryptographic backend built on the
//! [RustCrypto](https://github.com/RustCrypto) crates.
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use tlscore::{Config, Connection, Side};
//! use tlscore::crypto::rust_crypto;
//!
//! let config = Arc::new(
//!     Config::builder()
//!         .with_crypto_provider(rust_crypto::default_provider())
//!         .build()
//!         .unwrap(),
//! );
//! let client = Connection::new(config, Side::Client).unwrap();
//! ```
//!
//! # Ciphers
//!
//! - AES-128/256 in CBC mode
//! - AES-128/256 in GCM mode
//!
//! # Key exchange
//!
//! - ECDHE over `secp256r1`, `secp384r1` and `x25519`
//! - Finite field DHE with any server supplied group
//!
//! # Signatures
//!
//! - RSA PKCS#1 v1.5 (including the unprefixed MD5||SHA-1 form) and RSA-PSS
//! - ECDSA over P-256 and P-384
//!
//! # Key formats
//!
//! PKCS#8, PKCS#1 (RSA) and SEC1 (EC) DER, and the PEM versions of these.

mod cipher;
mod hash;
mod hmac;
mod kx_group;
mod random;
mod sign;

#[cfg(test)]
pub(crate) use sign::spki_of;

use crate::crypto::provider::CryptoProvider;

/// Get the RustCrypto based provider.
pub fn default_provider() -> CryptoProvider {
    CryptoProvider {
        ciphers: &cipher::CIPHER_PROVIDER,
        kx_groups: kx_group::ALL_KX_GROUPS,
        dh: &kx_group::DH_PROVIDER,
        signature_verifier: &sign::SIGNATURE_VERIFIER,
        key_provider: &sign::KEY_PROVIDER,
        secure_random: &random::SECURE_RANDOM,
        hash_provider: &hash::HASH_PROVIDER,
        hmac_provider: &hmac::HMAC_PROVIDER,
    }
}
