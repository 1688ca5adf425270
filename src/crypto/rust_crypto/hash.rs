//! Hash implementations using RustCrypto.

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

use crate::buffer::Buf;
use crate::crypto::provider::{HashContext, HashProvider};
use crate::types::HashAlgorithm;

#[derive(Clone)]
enum RustCryptoHashContext {
    Md5(Md5),
    Sha1(Sha1),
    Sha224(Sha224),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl std::fmt::Debug for RustCryptoHashContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RustCryptoHashContext::Md5(_) => "Md5",
            RustCryptoHashContext::Sha1(_) => "Sha1",
            RustCryptoHashContext::Sha224(_) => "Sha224",
            RustCryptoHashContext::Sha256(_) => "Sha256",
            RustCryptoHashContext::Sha384(_) => "Sha384",
            RustCryptoHashContext::Sha512(_) => "Sha512",
        };
        f.debug_tuple("RustCryptoHashContext").field(&name).finish()
    }
}

fn finish<D: Digest + Clone>(ctx: &D, out: &mut Buf) {
    out.clear();
    out.extend_from_slice(&ctx.clone().finalize());
}

impl HashContext for RustCryptoHashContext {
    fn update(&mut self, data: &[u8]) {
        match self {
            RustCryptoHashContext::Md5(ctx) => Digest::update(ctx, data),
            RustCryptoHashContext::Sha1(ctx) => Digest::update(ctx, data),
            RustCryptoHashContext::Sha224(ctx) => Digest::update(ctx, data),
            RustCryptoHashContext::Sha256(ctx) => Digest::update(ctx, data),
            RustCryptoHashContext::Sha384(ctx) => Digest::update(ctx, data),
            RustCryptoHashContext::Sha512(ctx) => Digest::update(ctx, data),
        }
    }

    fn clone_and_finalize(&self, out: &mut Buf) {
        match self {
            RustCryptoHashContext::Md5(ctx) => finish(ctx, out),
            RustCryptoHashContext::Sha1(ctx) => finish(ctx, out),
            RustCryptoHashContext::Sha224(ctx) => finish(ctx, out),
            RustCryptoHashContext::Sha256(ctx) => finish(ctx, out),
            RustCryptoHashContext::Sha384(ctx) => finish(ctx, out),
            RustCryptoHashContext::Sha512(ctx) => finish(ctx, out),
        }
    }
}

/// One-shot digest of `data`.
pub(super) fn digest(algorithm: HashAlgorithm, data: &[u8]) -> Result<Vec<u8>, String> {
    let mut ctx = HASH_PROVIDER.create_hash(algorithm)?;
    ctx.update(data);
    let mut out = Buf::new();
    ctx.clone_and_finalize(&mut out);
    Ok(out.into_vec())
}

#[derive(Debug)]
pub(super) struct RustCryptoHashProvider;

impl HashProvider for RustCryptoHashProvider {
    fn create_hash(&self, algorithm: HashAlgorithm) -> Result<Box<dyn HashContext>, String> {
        let ctx = match algorithm {
            HashAlgorithm::MD5 => RustCryptoHashContext::Md5(Md5::new()),
            HashAlgorithm::SHA1 => RustCryptoHashContext::Sha1(Sha1::new()),
            HashAlgorithm::SHA224 => RustCryptoHashContext::Sha224(Sha224::new()),
            HashAlgorithm::SHA256 => RustCryptoHashContext::Sha256(Sha256::new()),
            HashAlgorithm::SHA384 => RustCryptoHashContext::Sha384(Sha384::new()),
            HashAlgorithm::SHA512 => RustCryptoHashContext::Sha512(Sha512::new()),
            _ => return Err(format!("Unsupported hash algorithm: {:?}", algorithm)),
        };
        Ok(Box::new(ctx))
    }
}

pub(super) static HASH_PROVIDER: RustCryptoHashProvider = RustCryptoHashProvider;
