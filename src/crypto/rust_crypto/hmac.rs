//! HMAC using RustCrypto.

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};

use crate::buffer::Buf;
use crate::crypto::provider::HmacProvider;
use crate::types::HashAlgorithm;

fn compute<M: Mac + KeyInit>(key: &[u8], data: &[&[u8]], out: &mut Buf) -> Result<(), String> {
    let mut mac =
        <M as KeyInit>::new_from_slice(key).map_err(|_| "Invalid HMAC key".to_string())?;
    for part in data {
        Mac::update(&mut mac, part);
    }
    out.clear();
    out.extend_from_slice(&mac.finalize().into_bytes());
    Ok(())
}

#[derive(Debug)]
pub(super) struct RustCryptoHmacProvider;

impl HmacProvider for RustCryptoHmacProvider {
    fn hmac(
        &self,
        algorithm: HashAlgorithm,
        key: &[u8],
        data: &[&[u8]],
        out: &mut Buf,
    ) -> Result<(), String> {
        match algorithm {
            HashAlgorithm::MD5 => compute::<Hmac<Md5>>(key, data, out),
            HashAlgorithm::SHA1 => compute::<Hmac<Sha1>>(key, data, out),
            HashAlgorithm::SHA256 => compute::<Hmac<Sha256>>(key, data, out),
            HashAlgorithm::SHA384 => compute::<Hmac<Sha384>>(key, data, out),
            HashAlgorithm::SHA512 => compute::<Hmac<Sha512>>(key, data, out),
            _ => Err(format!("Unsupported HMAC hash algorithm: {:?}", algorithm)),
        }
    }
}

pub(super) static HMAC_PROVIDER: RustCryptoHmacProvider = RustCryptoHmacProvider;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_input_equals_joined_input() {
        let mut a = Buf::new();
        let mut b = Buf::new();
        HMAC_PROVIDER
            .hmac(HashAlgorithm::SHA256, b"key", &[b"hello ", b"world"], &mut a)
            .unwrap();
        HMAC_PROVIDER
            .hmac(HashAlgorithm::SHA256, b"key", &[b"hello world"], &mut b)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn rfc2202_hmac_sha1() {
        let mut out = Buf::new();
        HMAC_PROVIDER
            .hmac(
                HashAlgorithm::SHA1,
                b"Jefe",
                &[b"what do ya want for nothing?"],
                &mut out,
            )
            .unwrap();
        assert_eq!(
            &out[..4],
            &[0xef, 0xfc, 0xdf, 0x6a]
        );
    }
}
