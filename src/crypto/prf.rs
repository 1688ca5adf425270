//! TLS pseudo-random function and the secrets derived from it.
//!
//! TLS 1.0/1.1 split the secret in two halves and XOR P_MD5 with P_SHA1.
//! TLS 1.2 runs a single P_hash with the suite's PRF hash.

use zeroize::Zeroizing;

use super::HmacProvider;
use crate::buffer::Buf;
use crate::suite::PrfHash;
use crate::types::HashAlgorithm;
use crate::Error;

pub const MASTER_SECRET_LEN: usize = 48;
pub const VERIFY_DATA_LEN: usize = 12;

/// `PRF(secret, label, seed)` truncated to `len` bytes into `out`.
pub fn prf(
    hmac: &dyn HmacProvider,
    hash: PrfHash,
    secret: &[u8],
    label: &str,
    seed: &[&[u8]],
    out: &mut Buf,
    len: usize,
) -> Result<(), Error> {
    let mut label_seed = Buf::new();
    label_seed.extend_from_slice(label.as_bytes());
    for part in seed {
        label_seed.extend_from_slice(part);
    }

    out.clear();
    match hash {
        PrfHash::Sha256 => p_hash(hmac, HashAlgorithm::SHA256, secret, &label_seed, out, len),
        PrfHash::Sha384 => p_hash(hmac, HashAlgorithm::SHA384, secret, &label_seed, out, len),
        PrfHash::Md5Sha1 => {
            let half = secret.len().div_ceil(2);
            let s1 = &secret[..half];
            let s2 = &secret[secret.len() - half..];

            p_hash(hmac, HashAlgorithm::MD5, s1, &label_seed, out, len)?;
            let mut sha = Zeroizing::new(Buf::new());
            p_hash(hmac, HashAlgorithm::SHA1, s2, &label_seed, &mut sha, len)?;
            for (o, s) in out.iter_mut().zip(sha.iter()) {
                *o ^= s;
            }
            Ok(())
        }
    }
}

fn p_hash(
    hmac: &dyn HmacProvider,
    hash: HashAlgorithm,
    secret: &[u8],
    seed: &[u8],
    out: &mut Buf,
    len: usize,
) -> Result<(), Error> {
    let mut a = Buf::new();
    let mut block = Buf::new();

    // A(1) = HMAC(secret, seed)
    hmac.hmac(hash, secret, &[seed], &mut a)
        .map_err(Error::CryptoError)?;

    while out.len() < len {
        hmac.hmac(hash, secret, &[&a[..], seed], &mut block)
            .map_err(Error::CryptoError)?;
        let take = (len - out.len()).min(block.len());
        out.extend_from_slice(&block[..take]);

        if out.len() < len {
            let prev = std::mem::take(&mut a);
            hmac.hmac(hash, secret, &[&prev[..]], &mut a)
                .map_err(Error::CryptoError)?;
        }
    }

    Ok(())
}

/// `master_secret = PRF(pms, "master secret", client_random + server_random)`
pub fn master_secret(
    hmac: &dyn HmacProvider,
    hash: PrfHash,
    pre_master_secret: &[u8],
    client_random: &[u8],
    server_random: &[u8],
) -> Result<Zeroizing<Buf>, Error> {
    let mut out = Zeroizing::new(Buf::new());
    prf(
        hmac,
        hash,
        pre_master_secret,
        "master secret",
        &[client_random, server_random],
        &mut out,
        MASTER_SECRET_LEN,
    )?;
    Ok(out)
}

/// RFC 7627: `PRF(pms, "extended master secret", session_hash)`
pub fn extended_master_secret(
    hmac: &dyn HmacProvider,
    hash: PrfHash,
    pre_master_secret: &[u8],
    session_hash: &[u8],
) -> Result<Zeroizing<Buf>, Error> {
    let mut out = Zeroizing::new(Buf::new());
    prf(
        hmac,
        hash,
        pre_master_secret,
        "extended master secret",
        &[session_hash],
        &mut out,
        MASTER_SECRET_LEN,
    )?;
    Ok(out)
}

/// `key_block = PRF(master_secret, "key expansion", server_random + client_random)`
pub fn key_block(
    hmac: &dyn HmacProvider,
    hash: PrfHash,
    master_secret: &[u8],
    client_random: &[u8],
    server_random: &[u8],
    len: usize,
) -> Result<Zeroizing<Buf>, Error> {
    let mut out = Zeroizing::new(Buf::new());
    prf(
        hmac,
        hash,
        master_secret,
        "key expansion",
        &[server_random, client_random],
        &mut out,
        len,
    )?;
    Ok(out)
}

/// Finished verify_data for `label` over the transcript hash.
pub fn verify_data(
    hmac: &dyn HmacProvider,
    hash: PrfHash,
    master_secret: &[u8],
    label: &str,
    handshake_hash: &[u8],
) -> Result<Buf, Error> {
    let mut out = Buf::new();
    prf(
        hmac,
        hash,
        master_secret,
        label,
        &[handshake_hash],
        &mut out,
        VERIFY_DATA_LEN,
    )?;
    Ok(out)
}
