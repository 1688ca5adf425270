use std::fmt;

use super::{HashContext, HashProvider};
use crate::buffer::Buf;
use crate::suite::PrfHash;
use crate::types::HashAlgorithm;
use crate::Error;

/// Running hashes over the handshake messages.
///
/// The PRF hash is not known until the ServerHello, and a CertificateVerify
/// may sign with a different hash again, so every hash that can be needed
/// is kept running from the first message.
pub(crate) struct Transcript {
    provider: &'static dyn HashProvider,
    hashes: Vec<(HashAlgorithm, Box<dyn HashContext>)>,
}

const TRACKED: [HashAlgorithm; 5] = [
    HashAlgorithm::MD5,
    HashAlgorithm::SHA1,
    HashAlgorithm::SHA256,
    HashAlgorithm::SHA384,
    HashAlgorithm::SHA512,
];

impl Transcript {
    pub fn new(provider: &'static dyn HashProvider) -> Result<Self, Error> {
        let mut t = Transcript {
            provider,
            hashes: Vec::with_capacity(TRACKED.len()),
        };
        t.reset()?;
        Ok(t)
    }

    /// Start over. Used when a HelloVerifyRequest restarts the handshake.
    pub fn reset(&mut self) -> Result<(), Error> {
        self.hashes.clear();
        for alg in TRACKED {
            let ctx = self
                .provider
                .create_hash(alg)
                .map_err(Error::CryptoError)?;
            self.hashes.push((alg, ctx));
        }
        Ok(())
    }

    pub fn update(&mut self, data: &[u8]) {
        for (_, ctx) in &mut self.hashes {
            ctx.update(data);
        }
    }

    /// Current digest with `alg`, appended to `out`.
    pub fn hash(&self, alg: HashAlgorithm, out: &mut Buf) -> Result<(), Error> {
        let (_, ctx) = self
            .hashes
            .iter()
            .find(|(a, _)| *a == alg)
            .ok_or(Error::InternalError("hash not tracked by transcript"))?;
        let mut digest = Buf::new();
        ctx.clone_and_finalize(&mut digest);
        out.extend_from_slice(&digest);
        Ok(())
    }

    /// Digest used for Finished and extended master secret: MD5||SHA-1
    /// before TLS 1.2, the PRF hash after.
    pub fn prf_hash(&self, prf: PrfHash, out: &mut Buf) -> Result<(), Error> {
        out.clear();
        for alg in prf.transcript_hashes() {
            self.hash(*alg, out)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transcript")
            .field("hashes", &self.hashes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::rust_crypto::default_provider;

    #[test]
    fn legacy_digest_is_md5_then_sha1() {
        let p = default_provider();
        let mut t = Transcript::new(p.hash_provider).unwrap();
        t.update(b"abc");
        let mut out = Buf::new();
        t.prf_hash(PrfHash::Md5Sha1, &mut out).unwrap();
        assert_eq!(out.len(), 36);
        // MD5("abc")
        assert_eq!(&out[..4], &[0x90, 0x01, 0x50, 0x98]);
        // SHA1("abc")
        assert_eq!(&out[16..20], &[0xa9, 0x99, 0x3e, 0x36]);
    }

    #[test]
    fn hashing_does_not_finalize() {
        let p = default_provider();
        let mut t = Transcript::new(p.hash_provider).unwrap();
        t.update(b"ab");
        let mut first = Buf::new();
        t.hash(HashAlgorithm::SHA256, &mut first).unwrap();
        t.update(b"c");
        let mut second = Buf::new();
        t.hash(HashAlgorithm::SHA256, &mut second).unwrap();
        assert_ne!(first, second);

        t.reset().unwrap();
        t.update(b"abc");
        let mut third = Buf::new();
        t.hash(HashAlgorithm::SHA256, &mut third).unwrap();
        assert_eq!(second, third);
    }
}
