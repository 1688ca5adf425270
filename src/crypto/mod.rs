//! Cryptographic capabilities used by the engine.
//!
//! [`provider`] defines the pluggable traits, [`rust_crypto`] the default
//! backend. The rest is protocol level key derivation built on top of
//! the provider: the PRF, the handshake transcript and the per-direction
//! key material.

mod certificate;
mod keys;
pub mod prf;
mod provider;
pub mod rust_crypto;
mod transcript;

pub use certificate::{CertVerifier, LeafKeyVerifier};
pub use keys::{CipherSpec, KeyMaterial};
pub use provider::{
    ActiveKeyExchange, AeadCipher, BlockCipher, CipherProvider, CryptoProvider, CryptoSafe,
    DhProvider, HashContext, HashProvider, HmacProvider, KeyProvider, SecureRandom,
    SignatureVerifier, SigningKey, SupportedKxGroup,
};
pub(crate) use transcript::Transcript;

pub use crate::buffer::Buf;

/// Result of an operation that may be completed later.
///
/// `Pending` is not an error: the caller retries the same operation with
/// the same arguments once the application drives the connection again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Async<T> {
    Ready(T),
    Pending,
}

impl<T> Async<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Async::Pending)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Async<U> {
        match self {
            Async::Ready(v) => Async::Ready(f(v)),
            Async::Pending => Async::Pending,
        }
    }
}
