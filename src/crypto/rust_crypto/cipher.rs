//! AES-GCM and AES-CBC using RustCrypto.

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit as BlockKeyInit};
use aes::{Aes128, Aes256, Block};
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm};

use crate::buffer::Buf;
use crate::crypto::provider::{AeadCipher, BlockCipher, CipherProvider};
use crate::crypto::Async;
use crate::suite::BulkCipher;

const GCM_NONCE_LEN: usize = 12;
const AES_BLOCK: usize = 16;

enum AesGcm {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
}

impl std::fmt::Debug for AesGcm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AesGcm::Aes128(_) => f.debug_tuple("AesGcm::Aes128").finish(),
            AesGcm::Aes256(_) => f.debug_tuple("AesGcm::Aes256").finish(),
        }
    }
}

impl AesGcm {
    fn new(key: &[u8]) -> Result<Self, String> {
        match key.len() {
            16 => Aes128Gcm::new_from_slice(key)
                .map(|c| AesGcm::Aes128(Box::new(c)))
                .map_err(|_| "Invalid AES-128-GCM key".to_string()),
            32 => Aes256Gcm::new_from_slice(key)
                .map(|c| AesGcm::Aes256(Box::new(c)))
                .map_err(|_| "Invalid AES-256-GCM key".to_string()),
            n => Err(format!("Invalid key size for AES-GCM: {}", n)),
        }
    }
}

fn check_nonce(nonce: &[u8]) -> Result<(), String> {
    if nonce.len() != GCM_NONCE_LEN {
        return Err(format!(
            "Invalid nonce length: expected {}, got {}",
            GCM_NONCE_LEN,
            nonce.len()
        ));
    }
    Ok(())
}

impl AeadCipher for AesGcm {
    fn seal(&mut self, nonce: &[u8], aad: &[u8], data: &mut Buf) -> Result<Async<()>, String> {
        check_nonce(nonce)?;
        let nonce = GenericArray::from_slice(nonce);
        let res = match self {
            AesGcm::Aes128(c) => c.encrypt_in_place(nonce, aad, data),
            AesGcm::Aes256(c) => c.encrypt_in_place(nonce, aad, data),
        };
        res.map_err(|_| "AES-GCM encryption failed".to_string())?;
        Ok(Async::Ready(()))
    }

    fn open(&mut self, nonce: &[u8], aad: &[u8], data: &mut Buf) -> Result<Async<()>, String> {
        check_nonce(nonce)?;
        if data.len() < 16 {
            return Err(format!("Ciphertext too short: {}", data.len()));
        }
        let nonce = GenericArray::from_slice(nonce);
        // decrypt_in_place strips the tag
        let res = match self {
            AesGcm::Aes128(c) => c.decrypt_in_place(nonce, aad, data),
            AesGcm::Aes256(c) => c.decrypt_in_place(nonce, aad, data),
        };
        res.map_err(|_| "AES-GCM decryption failed".to_string())?;
        Ok(Async::Ready(()))
    }
}

enum AesCbc {
    Aes128(Box<Aes128>),
    Aes256(Box<Aes256>),
}

impl std::fmt::Debug for AesCbc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AesCbc::Aes128(_) => f.debug_tuple("AesCbc::Aes128").finish(),
            AesCbc::Aes256(_) => f.debug_tuple("AesCbc::Aes256").finish(),
        }
    }
}

impl AesCbc {
    fn new(key: &[u8]) -> Result<Self, String> {
        match key.len() {
            16 => Aes128::new_from_slice(key)
                .map(|c| AesCbc::Aes128(Box::new(c)))
                .map_err(|_| "Invalid AES-128 key".to_string()),
            32 => Aes256::new_from_slice(key)
                .map(|c| AesCbc::Aes256(Box::new(c)))
                .map_err(|_| "Invalid AES-256 key".to_string()),
            n => Err(format!("Invalid key size for AES-CBC: {}", n)),
        }
    }

    fn encrypt_block(&self, block: &mut Block) {
        match self {
            AesCbc::Aes128(c) => c.encrypt_block(block),
            AesCbc::Aes256(c) => c.encrypt_block(block),
        }
    }

    fn decrypt_block(&self, block: &mut Block) {
        match self {
            AesCbc::Aes128(c) => c.decrypt_block(block),
            AesCbc::Aes256(c) => c.decrypt_block(block),
        }
    }
}

fn check_cbc(iv: &[u8], data: &[u8]) -> Result<(), String> {
    if iv.len() != AES_BLOCK {
        return Err(format!("Invalid IV length: {}", iv.len()));
    }
    if data.len() % AES_BLOCK != 0 {
        return Err(format!("Data not block aligned: {}", data.len()));
    }
    Ok(())
}

impl BlockCipher for AesCbc {
    fn encrypt(&mut self, iv: &[u8], data: &mut [u8]) -> Result<Async<()>, String> {
        check_cbc(iv, data)?;
        let mut prev = [0u8; AES_BLOCK];
        prev.copy_from_slice(iv);
        for chunk in data.chunks_exact_mut(AES_BLOCK) {
            for (b, p) in chunk.iter_mut().zip(prev.iter()) {
                *b ^= p;
            }
            self.encrypt_block(Block::from_mut_slice(chunk));
            prev.copy_from_slice(chunk);
        }
        Ok(Async::Ready(()))
    }

    fn decrypt(&mut self, iv: &[u8], data: &mut [u8]) -> Result<Async<()>, String> {
        check_cbc(iv, data)?;
        let mut prev = [0u8; AES_BLOCK];
        let mut saved = [0u8; AES_BLOCK];
        prev.copy_from_slice(iv);
        for chunk in data.chunks_exact_mut(AES_BLOCK) {
            saved.copy_from_slice(chunk);
            self.decrypt_block(Block::from_mut_slice(chunk));
            for (b, p) in chunk.iter_mut().zip(prev.iter()) {
                *b ^= p;
            }
            prev = saved;
        }
        Ok(Async::Ready(()))
    }
}

#[derive(Debug)]
pub(super) struct RustCryptoCipherProvider;

impl CipherProvider for RustCryptoCipherProvider {
    fn supports(&self, bulk: BulkCipher) -> bool {
        // NULL has no cipher object at all
        !matches!(bulk, BulkCipher::Null)
    }

    fn create_aead(&self, bulk: BulkCipher, key: &[u8]) -> Result<Box<dyn AeadCipher>, String> {
        match bulk {
            BulkCipher::Aes128Gcm | BulkCipher::Aes256Gcm => Ok(Box::new(AesGcm::new(key)?)),
            _ => Err(format!("Not an AEAD cipher: {:?}", bulk)),
        }
    }

    fn create_block(
        &self,
        bulk: BulkCipher,
        key: &[u8],
    ) -> Result<Box<dyn BlockCipher>, String> {
        match bulk {
            BulkCipher::Aes128Cbc | BulkCipher::Aes256Cbc => Ok(Box::new(AesCbc::new(key)?)),
            _ => Err(format!("Not a block cipher: {:?}", bulk)),
        }
    }
}

pub(super) static CIPHER_PROVIDER: RustCryptoCipherProvider = RustCryptoCipherProvider;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cbc_matches_known_vector() {
        // NIST SP 800-38A F.2.1, first block
        let key = [
            0x2b, 0x7e, 0x15, 0x16, 0x28, 0xae, 0xd2, 0xa6, 0xab, 0xf7, 0x15, 0x88, 0x09, 0xcf,
            0x4f, 0x3c,
        ];
        let iv: Vec<u8> = (0u8..16).collect();
        let mut data = [
            0x6b, 0xc1, 0xbe, 0xe2, 0x2e, 0x40, 0x9f, 0x96, 0xe9, 0x3d, 0x7e, 0x11, 0x73, 0x93,
            0x17, 0x2a,
        ];
        let plain = data;
        let mut c = CIPHER_PROVIDER
            .create_block(BulkCipher::Aes128Cbc, &key)
            .unwrap();
        c.encrypt(&iv, &mut data).unwrap();
        assert_eq!(
            data,
            [
                0x76, 0x49, 0xab, 0xac, 0x81, 0x19, 0xb2, 0x46, 0xce, 0xe9, 0x8e, 0x9b, 0x12, 0xe9,
                0x19, 0x7d
            ]
        );
        c.decrypt(&iv, &mut data).unwrap();
        assert_eq!(data, plain);
    }

    #[test]
    fn gcm_rejects_tampering() {
        let mut c = CIPHER_PROVIDER
            .create_aead(BulkCipher::Aes128Gcm, &[3; 16])
            .unwrap();
        let nonce = [9u8; 12];
        let mut data = Buf::from_slice(b"attack at dawn");
        c.seal(&nonce, b"aad", &mut data).unwrap();
        assert_eq!(data.len(), 14 + 16);
        data[0] ^= 1;
        assert!(c.open(&nonce, b"aad", &mut data).is_err());
    }

    #[test]
    fn unaligned_cbc_is_an_error() {
        let mut c = CIPHER_PROVIDER
            .create_block(BulkCipher::Aes256Cbc, &[0; 32])
            .unwrap();
        assert!(c.encrypt(&[0; 16], &mut [0; 15]).is_err());
    }
}
