use std::fmt;

use zeroize::Zeroizing;

use crate::buffer::Buf;
use crate::codec::RecordHeader;
use crate::crypto::{AeadCipher, Async, BlockCipher, CipherSpec, CryptoProvider, HmacProvider};
use crate::suite::CipherType;
use crate::types::{ContentType, HashAlgorithm, ProtocolVersion};
use crate::util::ct_eq;
use crate::{Error, Side};

pub const AEAD_EXPLICIT_NONCE_LEN: usize = 8;
pub const AEAD_FIXED_IV_LEN: usize = 4;
pub const AEAD_TAG_LEN: usize = 16;
const BLOCK_LEN: usize = 16;

/// Payload transform for one direction.
pub(crate) enum Protection {
    /// NULL cipher, MAC only.
    Stream {
        mac: HashAlgorithm,
        mac_key: Zeroizing<Vec<u8>>,
    },
    /// MAC, pad, CBC encrypt.
    Block {
        cipher: Box<dyn BlockCipher>,
        mac: HashAlgorithm,
        mac_key: Zeroizing<Vec<u8>>,
        /// TLS 1.0 chains the IV from the last ciphertext block.
        chained_iv: Option<[u8; BLOCK_LEN]>,
    },
    Aead {
        cipher: Box<dyn AeadCipher>,
        fixed_iv: [u8; AEAD_FIXED_IV_LEN],
    },
}

impl fmt::Debug for Protection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protection::Stream { mac, .. } => f.debug_struct("Stream").field("mac", mac).finish(),
            Protection::Block {
                mac, chained_iv, ..
            } => f
                .debug_struct("Block")
                .field("mac", mac)
                .field("chained", &chained_iv.is_some())
                .finish(),
            Protection::Aead { .. } => f.debug_struct("Aead").finish(),
        }
    }
}

/// Per record values computed from the header before decryption.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OpenParams {
    pub seq: [u8; 8],
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    pub nonce: [u8; 12],
    pub aad: [u8; 13],
    pub iv: [u8; BLOCK_LEN],
    /// Ciphertext block that becomes the next chained IV.
    pub next_iv: Option<[u8; BLOCK_LEN]>,
}

/// `seq(8) || type(1) || version(2) || length(2)`, the MAC and AEAD
/// additional data prefix.
pub(crate) fn mac_header(
    seq: &[u8; 8],
    content_type: ContentType,
    version: ProtocolVersion,
    length: usize,
) -> [u8; 13] {
    let mut out = [0u8; 13];
    out[..8].copy_from_slice(seq);
    out[8] = content_type.as_u8();
    out[9..11].copy_from_slice(&version.as_u16().to_be_bytes());
    out[11..13].copy_from_slice(&(length as u16).to_be_bytes());
    out
}

/// Inner hash compressions to MAC a record header plus `data_len` bytes.
fn mac_blocks(alg: HashAlgorithm, data_len: usize) -> usize {
    let block = alg.block_len();
    let length_field = if block == 128 { 16 } else { 8 };
    (13 + data_len + 1 + length_field + block - 1) / block
}

/// Filler covering the compressions `data_len` saves against
/// `max_data_len`.
fn filler_len(alg: HashAlgorithm, max_data_len: usize, data_len: usize) -> usize {
    (mac_blocks(alg, max_data_len) - mac_blocks(alg, data_len)) * alg.block_len()
}

/// 0xFF when `a <= b`, else 0. Both values must be below 2^63.
fn ct_mask_le(a: usize, b: usize) -> u8 {
    let diff = (b as u64).wrapping_sub(a as u64);
    (((diff >> 63) as u8) ^ 1).wrapping_neg()
}

/// 0xFF when `a == b`, else 0.
fn ct_mask_eq(a: u8, b: u8) -> u8 {
    let x = (a ^ b) as u16;
    (x.wrapping_sub(1) >> 8) as u8
}

impl Protection {
    /// Protection for the direction `side` writes (or reads, with
    /// `write == false`).
    pub fn new(
        provider: &CryptoProvider,
        spec: &CipherSpec,
        side: Side,
        write: bool,
    ) -> Result<Self, Error> {
        let (mac_key, key, iv) = if write {
            spec.keys.write_keys(side)
        } else {
            spec.keys.read_keys(side)
        };
        let params = spec.params;

        Ok(match params.cipher_type() {
            CipherType::Stream => Protection::Stream {
                mac: params
                    .mac
                    .hash()
                    .ok_or(Error::InternalError("stream suite without MAC"))?,
                mac_key: Zeroizing::new(mac_key.to_vec()),
            },
            CipherType::Block => {
                let cipher = provider
                    .ciphers
                    .create_block(params.bulk, key)
                    .map_err(Error::CryptoError)?;
                let chained_iv = if spec.version.has_explicit_iv() {
                    None
                } else {
                    let mut v = [0u8; BLOCK_LEN];
                    if iv.len() != BLOCK_LEN {
                        return Err(Error::InternalError("bad CBC IV length"));
                    }
                    v.copy_from_slice(iv);
                    Some(v)
                };
                Protection::Block {
                    cipher,
                    mac: params
                        .mac
                        .hash()
                        .ok_or(Error::InternalError("block suite without MAC"))?,
                    mac_key: Zeroizing::new(mac_key.to_vec()),
                    chained_iv,
                }
            }
            CipherType::Aead => {
                let cipher = provider
                    .ciphers
                    .create_aead(params.bulk, key)
                    .map_err(Error::CryptoError)?;
                let fixed_iv: [u8; AEAD_FIXED_IV_LEN] = iv
                    .try_into()
                    .map_err(|_| Error::InternalError("bad AEAD IV length"))?;
                Protection::Aead { cipher, fixed_iv }
            }
        })
    }

    /// MAC algorithm and key, for suites that MAC.
    pub fn mac(&self) -> Option<(HashAlgorithm, &[u8])> {
        match self {
            Protection::Stream { mac, mac_key } | Protection::Block { mac, mac_key, .. } => {
                Some((*mac, mac_key.as_slice()))
            }
            Protection::Aead { .. } => None,
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(self, Protection::Block { .. })
    }

    /// Whether a random explicit IV prefixes each CBC record.
    pub fn explicit_iv(&self) -> bool {
        matches!(
            self,
            Protection::Block {
                chained_iv: None,
                ..
            }
        )
    }

    /// Ciphertext length for `plaintext_len` bytes of payload, including
    /// explicit IV, MAC, padding and tag.
    pub fn sealed_len(&self, plaintext_len: usize) -> usize {
        match self {
            Protection::Stream { mac, .. } => plaintext_len + mac.output_len(),
            Protection::Block { mac, .. } => {
                let iv = if self.explicit_iv() { BLOCK_LEN } else { 0 };
                let body = plaintext_len + mac.output_len() + 1;
                iv + body.div_ceil(BLOCK_LEN) * BLOCK_LEN
            }
            Protection::Aead { .. } => AEAD_EXPLICIT_NONCE_LEN + plaintext_len + AEAD_TAG_LEN,
        }
    }

    /// Append CBC padding: `pad_len + 1` bytes of value `pad_len`.
    pub fn pad(payload: &mut Buf) {
        let pad_len = BLOCK_LEN - 1 - (payload.len() % BLOCK_LEN);
        for _ in 0..=pad_len {
            payload.push(pad_len as u8);
        }
    }

    /// Encrypt a prepared payload in place.
    ///
    /// Stream payloads already carry their MAC, block payloads their MAC
    /// and padding. `explicit` is the record's explicit IV (CBC) or the
    /// sequence used as explicit nonce (AEAD).
    pub fn seal(
        &mut self,
        seq: &[u8; 8],
        content_type: ContentType,
        version: ProtocolVersion,
        explicit: &[u8; BLOCK_LEN],
        payload: &mut Buf,
    ) -> Result<Async<()>, Error> {
        match self {
            Protection::Stream { .. } => Ok(Async::Ready(())),
            Protection::Block {
                cipher, chained_iv, ..
            } => {
                let iv = chained_iv.unwrap_or(*explicit);
                let r = cipher
                    .encrypt(&iv, payload)
                    .map_err(Error::CryptoError)?;
                if r.is_pending() {
                    return Ok(Async::Pending);
                }
                if let Some(chain) = chained_iv {
                    let n = payload.len();
                    chain.copy_from_slice(&payload[n - BLOCK_LEN..]);
                }
                Ok(Async::Ready(()))
            }
            Protection::Aead { cipher, fixed_iv } => {
                let mut nonce = [0u8; 12];
                nonce[..4].copy_from_slice(fixed_iv);
                nonce[4..].copy_from_slice(seq);
                let aad = mac_header(seq, content_type, version, payload.len());
                cipher
                    .seal(&nonce, &aad, payload)
                    .map_err(Error::CryptoError)
            }
        }
    }

    /// Strip the explicit IV or nonce and compute the values needed to
    /// decrypt. Fails with [`Error::DecryptError`] when the record is too
    /// short or misaligned for the cipher.
    pub fn prepare_open(
        &self,
        header: &RecordHeader,
        seq: [u8; 8],
        payload: &mut Buf,
    ) -> Result<OpenParams, Error> {
        let mut p = OpenParams {
            seq,
            content_type: header.content_type,
            version: header.version,
            nonce: [0; 12],
            aad: [0; 13],
            iv: [0; BLOCK_LEN],
            next_iv: None,
        };

        match self {
            Protection::Stream { mac, .. } => {
                if payload.len() < mac.output_len() {
                    return Err(Error::DecryptError);
                }
            }
            Protection::Block {
                mac, chained_iv, ..
            } => {
                let iv_len = if chained_iv.is_some() { 0 } else { BLOCK_LEN };
                let min = iv_len + (mac.output_len() + 1).div_ceil(BLOCK_LEN) * BLOCK_LEN;
                if payload.len() < min || (payload.len() - iv_len) % BLOCK_LEN != 0 {
                    return Err(Error::DecryptError);
                }
                match chained_iv {
                    Some(iv) => p.iv = *iv,
                    None => {
                        p.iv.copy_from_slice(&payload[..BLOCK_LEN]);
                        payload.consume_front(BLOCK_LEN);
                    }
                }
                if chained_iv.is_some() {
                    let mut next = [0u8; BLOCK_LEN];
                    next.copy_from_slice(&payload[payload.len() - BLOCK_LEN..]);
                    p.next_iv = Some(next);
                }
            }
            Protection::Aead { fixed_iv, .. } => {
                if payload.len() < AEAD_EXPLICIT_NONCE_LEN + AEAD_TAG_LEN {
                    return Err(Error::DecryptError);
                }
                p.nonce[..4].copy_from_slice(fixed_iv);
                p.nonce[4..].copy_from_slice(&payload[..AEAD_EXPLICIT_NONCE_LEN]);
                payload.consume_front(AEAD_EXPLICIT_NONCE_LEN);
                let plain_len = payload.len() - AEAD_TAG_LEN;
                p.aad = mac_header(&seq, header.content_type, header.version, plain_len);
            }
        }

        Ok(p)
    }

    /// Decrypt step. AEAD authenticates here, block ciphers only decrypt.
    pub fn open(&mut self, p: &OpenParams, payload: &mut Buf) -> Result<Async<()>, Error> {
        match self {
            Protection::Stream { .. } => Ok(Async::Ready(())),
            Protection::Block {
                cipher, chained_iv, ..
            } => {
                let r = cipher
                    .decrypt(&p.iv, payload)
                    .map_err(|_| Error::DecryptError)?;
                if r.is_pending() {
                    return Ok(Async::Pending);
                }
                if let (Some(chain), Some(next)) = (chained_iv, p.next_iv) {
                    *chain = next;
                }
                Ok(Async::Ready(()))
            }
            Protection::Aead { cipher, .. } => cipher
                .open(&p.nonce, &p.aad, payload)
                .map_err(|_| Error::VerifyMacError),
        }
    }

    /// MAC step: check and strip MAC and padding. AEAD payloads pass
    /// through unchanged.
    pub fn verify(
        &self,
        hmac: &dyn HmacProvider,
        p: &OpenParams,
        payload: &mut Buf,
    ) -> Result<(), Error> {
        match self {
            Protection::Aead { .. } => Ok(()),
            Protection::Stream { mac, mac_key } => {
                let mac_len = mac.output_len();
                let data_len = payload.len() - mac_len;
                let header = mac_header(&p.seq, p.content_type, p.version, data_len);
                let mut expected = Buf::new();
                hmac.hmac(*mac, mac_key, &[&header[..], &payload[..data_len]], &mut expected)
                    .map_err(Error::CryptoError)?;
                if !ct_eq(&expected, &payload[data_len..]) {
                    return Err(Error::VerifyMacError);
                }
                payload.truncate(data_len);
                Ok(())
            }
            Protection::Block { mac, mac_key, .. } => {
                let mac_len = mac.output_len();
                let len = payload.len();
                let pad = payload[len - 1] as usize;

                // Padding must fit next to the MAC and every pad byte must
                // equal the pad length.
                let mut good = ct_mask_le(pad + 1 + mac_len, len);
                let to_check = len.min(256);
                for i in 0..to_check {
                    let in_pad = ct_mask_le(i, pad);
                    let b = payload[len - 1 - i];
                    good &= !in_pad | ct_mask_eq(b, pad as u8);
                }

                let pad_eff = pad & (good as usize);
                let data_len = len - mac_len - pad_eff - 1;
                let header = mac_header(&p.seq, p.content_type, p.version, data_len);

                let mut expected = Buf::new();
                hmac.hmac(*mac, mac_key, &[&header[..], &payload[..data_len]], &mut expected)
                    .map_err(Error::CryptoError)?;

                // Top up to the compression count of the longest possible
                // data so the total does not depend on the padding.
                let filler = vec![0u8; filler_len(*mac, len - mac_len - 1, data_len)];
                let mut dummy = Buf::new();
                hmac.hmac(*mac, mac_key, &[&filler[..]], &mut dummy)
                    .map_err(Error::CryptoError)?;

                let mac_ok = ct_eq(&expected, &payload[data_len..data_len + mac_len]);
                if good != 0xFF || !mac_ok {
                    return Err(Error::VerifyMacError);
                }
                payload.truncate(data_len);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::rust_crypto::default_provider;
    use crate::crypto::KeyMaterial;
    use crate::suite::CipherSuite;

    fn spec(suite: CipherSuite, version: ProtocolVersion) -> CipherSpec {
        let p = default_provider();
        let params = suite.params().unwrap();
        let keys = KeyMaterial::derive(p.hmac_provider, params, version, &[5; 48], &[1; 32], &[2; 32])
            .unwrap();
        CipherSpec {
            params,
            version,
            keys,
        }
    }

    fn header(version: ProtocolVersion, len: usize) -> RecordHeader {
        RecordHeader {
            content_type: ContentType::ApplicationData,
            version,
            epoch: 0,
            sequence: 0,
            length: len as u16,
        }
    }

    /// Client seals a record the way the builder does and the server opens it.
    fn seal_and_open(suite: CipherSuite, version: ProtocolVersion, corrupt: bool) -> Result<Buf, Error> {
        let provider = default_provider();
        let spec = spec(suite, version);
        let mut tx = Protection::new(&provider, &spec, Side::Client, true)?;
        let mut rx = Protection::new(&provider, &spec, Side::Server, false)?;

        let seq = 7u64.to_be_bytes();
        let explicit = [0x11u8; BLOCK_LEN];
        let mut payload = Buf::from_slice(b"hello world, this is a record");
        if let Some((alg, key)) = tx.mac() {
            let h = mac_header(&seq, ContentType::ApplicationData, version, payload.len());
            let mut m = Buf::new();
            provider.hmac_provider.hmac(alg, key, &[&h, &payload], &mut m).unwrap();
            payload.extend_from_slice(&m);
        }
        if tx.is_block() {
            Protection::pad(&mut payload);
        }
        tx.seal(&seq, ContentType::ApplicationData, version, &explicit, &mut payload)?;

        let mut wire = Buf::new();
        match &tx {
            Protection::Aead { .. } => wire.extend_from_slice(&seq),
            Protection::Block { .. } if tx.explicit_iv() => wire.extend_from_slice(&explicit),
            _ => {}
        }
        wire.extend_from_slice(&payload);
        assert_eq!(wire.len(), tx.sealed_len(29));
        if corrupt {
            let n = wire.len();
            wire[n - 1] ^= 0x40;
        }

        let h = header(version, wire.len());
        let p = rx.prepare_open(&h, seq, &mut wire)?;
        rx.open(&p, &mut wire)?;
        rx.verify(provider.hmac_provider, &p, &mut wire)?;
        Ok(wire)
    }

    #[test]
    fn protected_records_open() {
        for (suite, version) in [
            (CipherSuite::RSA_WITH_AES_128_CBC_SHA256, ProtocolVersion::TLS1_2),
            (CipherSuite::RSA_WITH_AES_128_CBC_SHA, ProtocolVersion::TLS1_0),
            (CipherSuite::ECDHE_RSA_WITH_AES_128_GCM_SHA256, ProtocolVersion::DTLS1_2),
            (CipherSuite::PSK_WITH_NULL_SHA256, ProtocolVersion::TLS1_2),
        ] {
            let plain = seal_and_open(suite, version, false).unwrap();
            assert_eq!(&plain[..], b"hello world, this is a record", "{:?}", suite);
        }
    }

    #[test]
    fn corrupted_records_fail_verification() {
        for suite in [
            CipherSuite::RSA_WITH_AES_128_CBC_SHA256,
            CipherSuite::ECDHE_RSA_WITH_AES_128_GCM_SHA256,
            CipherSuite::PSK_WITH_NULL_SHA256,
        ] {
            let err = seal_and_open(suite, ProtocolVersion::TLS1_2, true).unwrap_err();
            assert!(matches!(err, Error::VerifyMacError), "{:?}", suite);
        }
    }

    #[test]
    fn short_cbc_record_is_rejected_before_decrypt() {
        let provider = default_provider();
        let spec = spec(CipherSuite::RSA_WITH_AES_128_CBC_SHA256, ProtocolVersion::TLS1_2);
        let rx = Protection::new(&provider, &spec, Side::Server, false).unwrap();
        let mut wire = Buf::from_slice(&[0; 40]);
        let h = header(ProtocolVersion::TLS1_2, 40);
        assert!(matches!(
            rx.prepare_open(&h, [0; 8], &mut wire),
            Err(Error::DecryptError)
        ));
    }

    #[test]
    fn mac_work_does_not_depend_on_padding() {
        for alg in [HashAlgorithm::SHA1, HashAlgorithm::SHA256, HashAlgorithm::SHA384] {
            let max_data = 300;
            let total = |pad: usize| {
                let data_len = max_data - pad;
                let filler = filler_len(alg, max_data, data_len);
                // A filler of n blocks costs n + 1 compressions.
                mac_blocks(alg, data_len) + filler / alg.block_len() + 1
            };
            let expected = total(0);
            for pad in 0..=255 {
                assert_eq!(total(pad), expected, "{:?} pad {}", alg, pad);
            }
        }
    }

    #[test]
    fn ct_masks() {
        assert_eq!(ct_mask_le(3, 3), 0xFF);
        assert_eq!(ct_mask_le(2, 3), 0xFF);
        assert_eq!(ct_mask_le(4, 3), 0);
        assert_eq!(ct_mask_eq(9, 9), 0xFF);
        assert_eq!(ct_mask_eq(9, 8), 0);
    }

    #[test]
    fn padding_fills_to_block() {
        let mut b = Buf::from_slice(&[0; 20]);
        Protection::pad(&mut b);
        assert_eq!(b.len(), 32);
        assert_eq!(b[31], 11);
        let mut b = Buf::from_slice(&[0; 31]);
        Protection::pad(&mut b);
        assert_eq!(b.len(), 32);
        assert_eq!(b[31], 0);
    }
}
