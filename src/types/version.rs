use std::fmt;

use nom::number::complete::be_u16;
use nom::IResult;

use crate::buffer::Buf;

/// Record and handshake protocol version.
///
/// DTLS versions are the ones' complement of their TLS counterparts, so
/// numeric comparison runs backwards for them. Use [`ProtocolVersion::rank`]
/// to order versions within a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum ProtocolVersion {
    TLS1_0,
    TLS1_1,
    TLS1_2,
    DTLS1_0,
    DTLS1_2,
    Unknown(u16),
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl ProtocolVersion {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0301 => ProtocolVersion::TLS1_0,
            0x0302 => ProtocolVersion::TLS1_1,
            0x0303 => ProtocolVersion::TLS1_2,
            0xFEFF => ProtocolVersion::DTLS1_0,
            0xFEFD => ProtocolVersion::DTLS1_2,
            _ => ProtocolVersion::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            ProtocolVersion::TLS1_0 => 0x0301,
            ProtocolVersion::TLS1_1 => 0x0302,
            ProtocolVersion::TLS1_2 => 0x0303,
            ProtocolVersion::DTLS1_0 => 0xFEFF,
            ProtocolVersion::DTLS1_2 => 0xFEFD,
            ProtocolVersion::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ProtocolVersion> {
        let (input, version) = be_u16(input)?;
        Ok((input, Self::from_u16(version)))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&self.as_u16().to_be_bytes());
    }

    pub fn is_dtls(&self) -> bool {
        matches!(self, ProtocolVersion::DTLS1_0 | ProtocolVersion::DTLS1_2)
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, ProtocolVersion::Unknown(_))
    }

    /// Ordering within a family. DTLS 1.0 is based on TLS 1.1 and
    /// DTLS 1.2 on TLS 1.2, which is reflected in the rank.
    pub fn rank(&self) -> u8 {
        match self {
            ProtocolVersion::TLS1_0 => 1,
            ProtocolVersion::TLS1_1 | ProtocolVersion::DTLS1_0 => 2,
            ProtocolVersion::TLS1_2 | ProtocolVersion::DTLS1_2 => 3,
            ProtocolVersion::Unknown(_) => 0,
        }
    }

    pub fn same_family(&self, other: ProtocolVersion) -> bool {
        self.is_known() && other.is_known() && self.is_dtls() == other.is_dtls()
    }

    /// The next lower version in the same family.
    pub fn one_step_down(&self) -> Option<ProtocolVersion> {
        match self {
            ProtocolVersion::TLS1_2 => Some(ProtocolVersion::TLS1_1),
            ProtocolVersion::TLS1_1 => Some(ProtocolVersion::TLS1_0),
            ProtocolVersion::DTLS1_2 => Some(ProtocolVersion::DTLS1_0),
            _ => None,
        }
    }

    /// Same family and at least as new as `other`.
    pub fn at_least(&self, other: ProtocolVersion) -> bool {
        self.same_family(other) && self.rank() >= other.rank()
    }

    /// TLS 1.2 style PRF, signature_algorithms and AEAD suites.
    pub fn is_tls12_family(&self) -> bool {
        self.rank() == 3
    }

    /// Block ciphers carry a per-record explicit IV (TLS 1.1 and later).
    pub fn has_explicit_iv(&self) -> bool {
        self.rank() >= 2
    }

    /// Version written in record headers of an initial ClientHello.
    pub fn hello_record_version(&self) -> ProtocolVersion {
        if self.is_dtls() {
            ProtocolVersion::DTLS1_0
        } else {
            ProtocolVersion::TLS1_0
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::TLS1_0 => write!(f, "TLS 1.0"),
            ProtocolVersion::TLS1_1 => write!(f, "TLS 1.1"),
            ProtocolVersion::TLS1_2 => write!(f, "TLS 1.2"),
            ProtocolVersion::DTLS1_0 => write!(f, "DTLS 1.0"),
            ProtocolVersion::DTLS1_2 => write!(f, "DTLS 1.2"),
            ProtocolVersion::Unknown(v) => write!(f, "unknown(0x{:04x})", v),
        }
    }
}
