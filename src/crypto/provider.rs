//! Cryptographic provider traits.
//!
//! The engine never calls a crypto library directly. Every primitive goes
//! through one of the traits below, collected in a [`CryptoProvider`] of
//! `&'static dyn` components. The default backend is
//! [`rust_crypto`](super::rust_crypto).
//!
//! Operations that may be offloaded (signing, verification, RSA
//! encryption/decryption, key agreement, bulk encryption) return
//! [`Async`]. Returning [`Async::Pending`] suspends the connection; the
//! application drives it again later and the engine repeats the same call
//! with the same arguments. Implementations must therefore not consume
//! their input until they return [`Async::Ready`].
//!
//! Errors are plain `String`s; the engine wraps them in
//! [`Error::CryptoError`](crate::Error::CryptoError).

use std::fmt::Debug;
use std::panic::{RefUnwindSafe, UnwindSafe};

use once_cell::sync::OnceCell;

use super::Async;
use crate::buffer::Buf;
use crate::suite::BulkCipher;
use crate::types::{HashAlgorithm, NamedGroup, SignatureAlgorithm, SignatureScheme};

/// Bounds shared by every provider component.
pub trait CryptoSafe: Send + Sync + Debug + UnwindSafe + RefUnwindSafe {}

impl<T: Send + Sync + Debug + UnwindSafe + RefUnwindSafe> CryptoSafe for T {}

// ============================================================================
// Instance traits
// ============================================================================

/// AEAD cipher bound to one key.
pub trait AeadCipher: CryptoSafe {
    /// Encrypt `data` in place and append the tag.
    fn seal(&mut self, nonce: &[u8], aad: &[u8], data: &mut Buf) -> Result<Async<()>, String>;

    /// Verify and strip the tag, decrypting `data` in place.
    fn open(&mut self, nonce: &[u8], aad: &[u8], data: &mut Buf) -> Result<Async<()>, String>;
}

/// CBC block cipher bound to one key. `data` is a whole number of blocks.
pub trait BlockCipher: CryptoSafe {
    fn encrypt(&mut self, iv: &[u8], data: &mut [u8]) -> Result<Async<()>, String>;

    fn decrypt(&mut self, iv: &[u8], data: &mut [u8]) -> Result<Async<()>, String>;
}

/// Incremental hash.
pub trait HashContext: CryptoSafe {
    fn update(&mut self, data: &[u8]);

    /// Finalize a copy of the state into `out`, leaving `self` usable.
    fn clone_and_finalize(&self, out: &mut Buf);
}

/// Private key of the local identity.
pub trait SigningKey: CryptoSafe {
    /// Key type.
    fn algorithm(&self) -> SignatureAlgorithm;

    /// Modulus or curve size in bits.
    fn bits(&self) -> usize;

    /// Schemes this key can produce under TLS 1.2.
    fn schemes(&self) -> &[SignatureScheme];

    /// Sign a prepared digest.
    ///
    /// With `scheme` set, `input` is the hash selected by the scheme (or the
    /// full message for EdDSA). With `scheme` unset (TLS 1.0/1.1), RSA keys
    /// sign the 36 byte MD5||SHA-1 concatenation without DigestInfo and ECDSA
    /// keys sign a SHA-1 digest.
    fn sign(
        &mut self,
        scheme: Option<SignatureScheme>,
        input: &[u8],
        out: &mut Buf,
    ) -> Result<Async<()>, String>;

    /// RSA PKCS#1 v1.5 decryption of an encrypted premaster secret.
    fn decrypt(&mut self, ciphertext: &[u8], out: &mut Buf) -> Result<Async<()>, String>;
}

/// One side of an ephemeral key agreement.
pub trait ActiveKeyExchange: CryptoSafe {
    /// Encoded public value to send to the peer.
    fn public_key(&self) -> &[u8];

    /// Compute the shared secret. May be called again after `Pending`.
    fn agree(&mut self, peer: &[u8], out: &mut Buf) -> Result<Async<()>, String>;
}

// ============================================================================
// Factory traits
// ============================================================================

/// Bulk cipher factory.
pub trait CipherProvider: CryptoSafe {
    fn supports(&self, bulk: BulkCipher) -> bool;

    fn create_aead(&self, bulk: BulkCipher, key: &[u8]) -> Result<Box<dyn AeadCipher>, String>;

    fn create_block(&self, bulk: BulkCipher, key: &[u8])
        -> Result<Box<dyn BlockCipher>, String>;
}

/// ECDHE group.
pub trait SupportedKxGroup: CryptoSafe {
    fn name(&self) -> NamedGroup;

    /// Generate an ephemeral key pair.
    fn start(&self) -> Result<Box<dyn ActiveKeyExchange>, String>;
}

/// Finite field Diffie-Hellman.
pub trait DhProvider: CryptoSafe {
    /// Generate an ephemeral key pair for the group `(p, g)`.
    fn start(&self, prime: &[u8], generator: &[u8]) -> Result<Box<dyn ActiveKeyExchange>, String>;
}

/// Operations with a peer's public key, given as DER SubjectPublicKeyInfo.
pub trait SignatureVerifier: CryptoSafe {
    /// Key type and size in bits.
    fn key_info(&self, spki: &[u8]) -> Result<(SignatureAlgorithm, usize), String>;

    /// Verify `signature` over `input` (same convention as [`SigningKey::sign`]).
    /// Returns `false` for a well formed but wrong signature.
    fn verify(
        &self,
        spki: &[u8],
        scheme: Option<SignatureScheme>,
        input: &[u8],
        signature: &[u8],
    ) -> Result<Async<bool>, String>;

    /// Raw RSA public operation and PKCS#1 type 1 unpadding: recovers the
    /// signed content of a PKCS#1 v1.5 signature.
    fn rsa_recover(&self, spki: &[u8], signature: &[u8], out: &mut Buf)
        -> Result<Async<()>, String>;

    /// RSA PKCS#1 v1.5 encryption.
    fn rsa_encrypt(&self, spki: &[u8], plaintext: &[u8], out: &mut Buf)
        -> Result<Async<()>, String>;
}

/// Private key loader.
pub trait KeyProvider: CryptoSafe {
    /// Load a DER (PKCS#8 or SEC1) or PEM private key.
    fn load_private_key(&self, key_der: &[u8]) -> Result<Box<dyn SigningKey>, String>;
}

/// Cryptographically secure random numbers.
pub trait SecureRandom: CryptoSafe {
    fn fill(&self, buf: &mut [u8]) -> Result<(), String>;
}

/// Hash factory. Must support MD5, SHA-1, SHA-256 and SHA-384.
pub trait HashProvider: CryptoSafe {
    fn create_hash(&self, algorithm: HashAlgorithm) -> Result<Box<dyn HashContext>, String>;
}

/// HMAC over a list of input slices, written to `out`.
pub trait HmacProvider: CryptoSafe {
    fn hmac(
        &self,
        algorithm: HashAlgorithm,
        key: &[u8],
        data: &[&[u8]],
        out: &mut Buf,
    ) -> Result<(), String>;
}

// ============================================================================
// Provider
// ============================================================================

/// All cryptographic components used by a connection.
#[derive(Debug, Clone)]
pub struct CryptoProvider {
    /// AES-CBC and AES-GCM.
    pub ciphers: &'static dyn CipherProvider,

    /// ECDHE groups, in preference order.
    pub kx_groups: &'static [&'static dyn SupportedKxGroup],

    /// Finite field DH.
    pub dh: &'static dyn DhProvider,

    /// Peer public key operations.
    pub signature_verifier: &'static dyn SignatureVerifier,

    /// Private key loading.
    pub key_provider: &'static dyn KeyProvider,

    pub secure_random: &'static dyn SecureRandom,

    /// Transcript and signature hashes.
    pub hash_provider: &'static dyn HashProvider,

    /// Record MACs, PRF and cookies.
    pub hmac_provider: &'static dyn HmacProvider,
}

static DEFAULT: OnceCell<CryptoProvider> = OnceCell::new();

impl CryptoProvider {
    /// Install a process wide default provider.
    ///
    /// Only the first call succeeds; later calls get their provider back.
    pub fn install_default(provider: CryptoProvider) -> Result<(), CryptoProvider> {
        DEFAULT.set(provider)
    }

    /// The installed default, if any.
    pub fn get_default() -> Option<&'static CryptoProvider> {
        DEFAULT.get()
    }

    /// The installed default or the RustCrypto backend.
    pub fn get_default_or_builtin() -> CryptoProvider {
        Self::get_default()
            .cloned()
            .unwrap_or_else(super::rust_crypto::default_provider)
    }

    /// The ECDHE group for `name`, if supported.
    pub fn kx_group(&self, name: NamedGroup) -> Option<&'static dyn SupportedKxGroup> {
        self.kx_groups.iter().copied().find(|g| g.name() == name)
    }

    /// Fill `buf` with random bytes.
    pub(crate) fn random(&self, buf: &mut [u8]) -> Result<(), crate::Error> {
        self.secure_random
            .fill(buf)
            .map_err(crate::Error::CryptoError)
    }
}
