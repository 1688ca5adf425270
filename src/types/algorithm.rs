use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

use crate::buffer::Buf;

/// Hash algorithm code points (RFC 5246 7.4.1.4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    None,
    MD5,
    SHA1,
    SHA224,
    SHA256,
    SHA384,
    SHA512,
    Unknown(u8),
}

impl HashAlgorithm {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => HashAlgorithm::None,
            1 => HashAlgorithm::MD5,
            2 => HashAlgorithm::SHA1,
            3 => HashAlgorithm::SHA224,
            4 => HashAlgorithm::SHA256,
            5 => HashAlgorithm::SHA384,
            6 => HashAlgorithm::SHA512,
            _ => HashAlgorithm::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            HashAlgorithm::None => 0,
            HashAlgorithm::MD5 => 1,
            HashAlgorithm::SHA1 => 2,
            HashAlgorithm::SHA224 => 3,
            HashAlgorithm::SHA256 => 4,
            HashAlgorithm::SHA384 => 5,
            HashAlgorithm::SHA512 => 6,
            HashAlgorithm::Unknown(value) => *value,
        }
    }

    /// Digest length in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            HashAlgorithm::MD5 => 16,
            HashAlgorithm::SHA1 => 20,
            HashAlgorithm::SHA224 => 28,
            HashAlgorithm::SHA256 => 32,
            HashAlgorithm::SHA384 => 48,
            HashAlgorithm::SHA512 => 64,
            HashAlgorithm::None | HashAlgorithm::Unknown(_) => 0,
        }
    }

    /// Compression block size in bytes.
    pub fn block_len(&self) -> usize {
        match self {
            HashAlgorithm::SHA384 | HashAlgorithm::SHA512 => 128,
            _ => 64,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], HashAlgorithm> {
        let (input, value) = be_u8(input)?;
        Ok((input, Self::from_u8(value)))
    }
}

/// Signature algorithm, which doubles as the type of a signing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureAlgorithm {
    Anonymous,
    RSA,
    DSA,
    ECDSA,
    ED25519,
    ED448,
    Unknown(u8),
}

impl SignatureAlgorithm {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => SignatureAlgorithm::Anonymous,
            1 => SignatureAlgorithm::RSA,
            2 => SignatureAlgorithm::DSA,
            3 => SignatureAlgorithm::ECDSA,
            7 => SignatureAlgorithm::ED25519,
            8 => SignatureAlgorithm::ED448,
            _ => SignatureAlgorithm::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            SignatureAlgorithm::Anonymous => 0,
            SignatureAlgorithm::RSA => 1,
            SignatureAlgorithm::DSA => 2,
            SignatureAlgorithm::ECDSA => 3,
            SignatureAlgorithm::ED25519 => 7,
            SignatureAlgorithm::ED448 => 8,
            SignatureAlgorithm::Unknown(value) => *value,
        }
    }

    /// ClientCertificateType code for CertificateRequest.
    pub fn certificate_type(&self) -> Option<u8> {
        match self {
            SignatureAlgorithm::RSA => Some(1),
            SignatureAlgorithm::ECDSA => Some(64),
            _ => None,
        }
    }
}

/// A `(hash, signature)` pair as carried on the wire by TLS 1.2.
///
/// RSA-PSS and EdDSA use the 0x08 "intrinsic" hash byte with the scheme in
/// the second byte, so they do not decompose into the classic pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum SignatureScheme {
    RSA_PKCS1_SHA1,
    ECDSA_SHA1,
    RSA_PKCS1_SHA256,
    ECDSA_SECP256R1_SHA256,
    RSA_PKCS1_SHA384,
    ECDSA_SECP384R1_SHA384,
    RSA_PKCS1_SHA512,
    ECDSA_SECP521R1_SHA512,
    RSA_PSS_RSAE_SHA256,
    RSA_PSS_RSAE_SHA384,
    RSA_PSS_RSAE_SHA512,
    ED25519,
    ED448,
    Unknown(u16),
}

impl SignatureScheme {
    pub fn from_u16(value: u16) -> Self {
        use SignatureScheme::*;
        match value {
            0x0201 => RSA_PKCS1_SHA1,
            0x0203 => ECDSA_SHA1,
            0x0401 => RSA_PKCS1_SHA256,
            0x0403 => ECDSA_SECP256R1_SHA256,
            0x0501 => RSA_PKCS1_SHA384,
            0x0503 => ECDSA_SECP384R1_SHA384,
            0x0601 => RSA_PKCS1_SHA512,
            0x0603 => ECDSA_SECP521R1_SHA512,
            0x0804 => RSA_PSS_RSAE_SHA256,
            0x0805 => RSA_PSS_RSAE_SHA384,
            0x0806 => RSA_PSS_RSAE_SHA512,
            0x0807 => ED25519,
            0x0808 => ED448,
            _ => Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        use SignatureScheme::*;
        match self {
            RSA_PKCS1_SHA1 => 0x0201,
            ECDSA_SHA1 => 0x0203,
            RSA_PKCS1_SHA256 => 0x0401,
            ECDSA_SECP256R1_SHA256 => 0x0403,
            RSA_PKCS1_SHA384 => 0x0501,
            ECDSA_SECP384R1_SHA384 => 0x0503,
            RSA_PKCS1_SHA512 => 0x0601,
            ECDSA_SECP521R1_SHA512 => 0x0603,
            RSA_PSS_RSAE_SHA256 => 0x0804,
            RSA_PSS_RSAE_SHA384 => 0x0805,
            RSA_PSS_RSAE_SHA512 => 0x0806,
            ED25519 => 0x0807,
            ED448 => 0x0808,
            Unknown(value) => *value,
        }
    }

    /// Hash to run over the signed content. `None` means the scheme signs
    /// the message directly (EdDSA).
    pub fn hash_algorithm(&self) -> Option<HashAlgorithm> {
        use SignatureScheme::*;
        match self {
            RSA_PKCS1_SHA1 | ECDSA_SHA1 => Some(HashAlgorithm::SHA1),
            RSA_PKCS1_SHA256 | ECDSA_SECP256R1_SHA256 | RSA_PSS_RSAE_SHA256 => {
                Some(HashAlgorithm::SHA256)
            }
            RSA_PKCS1_SHA384 | ECDSA_SECP384R1_SHA384 | RSA_PSS_RSAE_SHA384 => {
                Some(HashAlgorithm::SHA384)
            }
            RSA_PKCS1_SHA512 | ECDSA_SECP521R1_SHA512 | RSA_PSS_RSAE_SHA512 => {
                Some(HashAlgorithm::SHA512)
            }
            ED25519 | ED448 => None,
            Unknown(v) => Some(HashAlgorithm::from_u8((v >> 8) as u8)),
        }
    }

    /// The type of key that produces this signature.
    pub fn signature_algorithm(&self) -> SignatureAlgorithm {
        use SignatureScheme::*;
        match self {
            RSA_PKCS1_SHA1 | RSA_PKCS1_SHA256 | RSA_PKCS1_SHA384 | RSA_PKCS1_SHA512
            | RSA_PSS_RSAE_SHA256 | RSA_PSS_RSAE_SHA384 | RSA_PSS_RSAE_SHA512 => {
                SignatureAlgorithm::RSA
            }
            ECDSA_SHA1 | ECDSA_SECP256R1_SHA256 | ECDSA_SECP384R1_SHA384
            | ECDSA_SECP521R1_SHA512 => SignatureAlgorithm::ECDSA,
            ED25519 => SignatureAlgorithm::ED25519,
            ED448 => SignatureAlgorithm::ED448,
            Unknown(v) => SignatureAlgorithm::from_u8(*v as u8),
        }
    }

    /// RSA PKCS#1 v1.5 signatures, verified by recovering the padded digest.
    pub fn is_rsa_pkcs1(&self) -> bool {
        use SignatureScheme::*;
        matches!(
            self,
            RSA_PKCS1_SHA1 | RSA_PKCS1_SHA256 | RSA_PKCS1_SHA384 | RSA_PKCS1_SHA512
        )
    }

    pub fn is_pss(&self) -> bool {
        use SignatureScheme::*;
        matches!(
            self,
            RSA_PSS_RSAE_SHA256 | RSA_PSS_RSAE_SHA384 | RSA_PSS_RSAE_SHA512
        )
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], SignatureScheme> {
        let (input, value) = be_u16(input)?;
        Ok((input, Self::from_u16(value)))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&self.as_u16().to_be_bytes());
    }
}
