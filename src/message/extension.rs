use nom::error::{Error, ErrorKind};
use nom::multi::many0;
use nom::number::complete::be_u16;
use nom::{Err, IResult};

use crate::buffer::Buf;
use crate::codec::{begin_u16_len, end_u16_len, put_opaque8, put_u16};
use crate::types::{NamedGroup, SignatureScheme};
use crate::util::{opaque16, opaque8};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionType {
    ServerName,
    SupportedGroups,
    EcPointFormats,
    SignatureAlgorithms,
    EncryptThenMac,
    ExtendedMasterSecret,
    SessionTicket,
    RenegotiationInfo,
    Unknown(u16),
}

impl ExtensionType {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0000 => ExtensionType::ServerName,
            0x000A => ExtensionType::SupportedGroups,
            0x000B => ExtensionType::EcPointFormats,
            0x000D => ExtensionType::SignatureAlgorithms,
            0x0016 => ExtensionType::EncryptThenMac,
            0x0017 => ExtensionType::ExtendedMasterSecret,
            0x0023 => ExtensionType::SessionTicket,
            0xFF01 => ExtensionType::RenegotiationInfo,
            _ => ExtensionType::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            ExtensionType::ServerName => 0x0000,
            ExtensionType::SupportedGroups => 0x000A,
            ExtensionType::EcPointFormats => 0x000B,
            ExtensionType::SignatureAlgorithms => 0x000D,
            ExtensionType::EncryptThenMac => 0x0016,
            ExtensionType::ExtendedMasterSecret => 0x0017,
            ExtensionType::SessionTicket => 0x0023,
            ExtensionType::RenegotiationInfo => 0xFF01,
            ExtensionType::Unknown(value) => *value,
        }
    }
}

/// Hello extensions this engine understands.
///
/// Unknown extensions are skipped but their types are kept, so a repeated
/// unknown extension is still caught as a duplicate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extensions {
    pub signature_algorithms: Option<Vec<SignatureScheme>>,
    pub supported_groups: Option<Vec<NamedGroup>>,
    pub ec_point_formats: Option<Vec<u8>>,
    /// Ticket bytes. Empty when asking for a new ticket.
    pub session_ticket: Option<Vec<u8>>,
    pub extended_master_secret: bool,
    pub renegotiation_info: Option<Vec<u8>>,
    pub unknown: Vec<u16>,
}

fn failure<T>(input: &[u8]) -> IResult<&[u8], T> {
    Err(Err::Failure(Error::new(input, ErrorKind::Verify)))
}

fn list16<'a, T>(
    input: &'a [u8],
    item: impl FnMut(&'a [u8]) -> IResult<&'a [u8], T>,
) -> IResult<&'a [u8], Vec<T>> {
    let (rest, data) = opaque16(input)?;
    let (left, items) = many0(item)(data)?;
    if !left.is_empty() {
        return failure(input);
    }
    Ok((rest, items))
}

impl Extensions {
    /// Parse an optional extensions block. Absent means no extensions.
    pub fn parse(input: &[u8]) -> IResult<&[u8], Extensions> {
        let mut ext = Extensions::default();
        if input.is_empty() {
            return Ok((input, ext));
        }

        let (rest, mut block) = opaque16(input)?;
        let mut seen: Vec<u16> = Vec::new();

        while !block.is_empty() {
            let (r, code) = be_u16(block)?;
            let (r, data) = opaque16(r)?;
            block = r;

            if seen.contains(&code) {
                return failure(input);
            }
            seen.push(code);

            match ExtensionType::from_u16(code) {
                ExtensionType::SignatureAlgorithms => {
                    let (left, v) = list16(data, SignatureScheme::parse)?;
                    if !left.is_empty() {
                        return failure(input);
                    }
                    ext.signature_algorithms = Some(v);
                }
                ExtensionType::SupportedGroups => {
                    let (left, v) = list16(data, NamedGroup::parse)?;
                    if !left.is_empty() {
                        return failure(input);
                    }
                    ext.supported_groups = Some(v);
                }
                ExtensionType::EcPointFormats => {
                    let (left, v) = opaque8(data)?;
                    if !left.is_empty() {
                        return failure(input);
                    }
                    ext.ec_point_formats = Some(v.to_vec());
                }
                ExtensionType::SessionTicket => {
                    ext.session_ticket = Some(data.to_vec());
                }
                ExtensionType::ExtendedMasterSecret => {
                    if !data.is_empty() {
                        return failure(input);
                    }
                    ext.extended_master_secret = true;
                }
                ExtensionType::RenegotiationInfo => {
                    let (left, v) = opaque8(data)?;
                    if !left.is_empty() {
                        return failure(input);
                    }
                    ext.renegotiation_info = Some(v.to_vec());
                }
                _ => ext.unknown.push(code),
            }
        }

        Ok((rest, ext))
    }

    fn is_empty(&self) -> bool {
        self.signature_algorithms.is_none()
            && self.supported_groups.is_none()
            && self.ec_point_formats.is_none()
            && self.session_ticket.is_none()
            && !self.extended_master_secret
            && self.renegotiation_info.is_none()
    }

    /// Write the block. Nothing is written when there are no extensions.
    /// Unknown extensions are never written.
    pub fn serialize(&self, output: &mut Buf) {
        if self.is_empty() {
            return;
        }
        let block = begin_u16_len(output);

        let open = |output: &mut Buf, t: ExtensionType| {
            put_u16(output, t.as_u16());
            begin_u16_len(output)
        };

        if let Some(schemes) = &self.signature_algorithms {
            let pos = open(output, ExtensionType::SignatureAlgorithms);
            let list = begin_u16_len(output);
            for s in schemes {
                s.serialize(output);
            }
            end_u16_len(output, list);
            end_u16_len(output, pos);
        }
        if let Some(groups) = &self.supported_groups {
            let pos = open(output, ExtensionType::SupportedGroups);
            let list = begin_u16_len(output);
            for g in groups {
                g.serialize(output);
            }
            end_u16_len(output, list);
            end_u16_len(output, pos);
        }
        if let Some(formats) = &self.ec_point_formats {
            let pos = open(output, ExtensionType::EcPointFormats);
            put_opaque8(output, formats);
            end_u16_len(output, pos);
        }
        if let Some(ticket) = &self.session_ticket {
            let pos = open(output, ExtensionType::SessionTicket);
            output.extend_from_slice(ticket);
            end_u16_len(output, pos);
        }
        if self.extended_master_secret {
            let pos = open(output, ExtensionType::ExtendedMasterSecret);
            end_u16_len(output, pos);
        }
        if let Some(info) = &self.renegotiation_info {
            let pos = open(output, ExtensionType::RenegotiationInfo);
            put_opaque8(output, info);
            end_u16_len(output, pos);
        }

        end_u16_len(output, block);
    }
}

/// ec_point_formats with only the uncompressed format.
pub(crate) const UNCOMPRESSED_POINTS: u8 = 0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn written_extensions_parse_back() {
        let ext = Extensions {
            signature_algorithms: Some(vec![
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::ECDSA_SECP256R1_SHA256,
            ]),
            supported_groups: Some(vec![NamedGroup::X25519, NamedGroup::Secp256r1]),
            ec_point_formats: Some(vec![UNCOMPRESSED_POINTS]),
            session_ticket: Some(vec![]),
            extended_master_secret: true,
            renegotiation_info: Some(vec![]),
            unknown: vec![],
        };
        let mut out = Buf::new();
        ext.serialize(&mut out);
        let (rest, parsed) = Extensions::parse(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, ext);
    }

    #[test]
    fn duplicate_extension_is_rejected() {
        // Two empty extended_master_secret extensions.
        let input = [0, 8, 0, 0x17, 0, 0, 0, 0x17, 0, 0];
        assert!(Extensions::parse(&input).is_err());
    }

    #[test]
    fn unknown_extensions_are_skipped() {
        let input = [0, 9, 0x12, 0x34, 0, 1, 0xAA, 0, 0x17, 0, 0];
        let (_, ext) = Extensions::parse(&input).unwrap();
        assert!(ext.extended_master_secret);
        assert_eq!(ext.unknown, vec![0x1234]);
    }

    #[test]
    fn no_extensions_writes_nothing() {
        let mut out = Buf::new();
        Extensions::default().serialize(&mut out);
        assert!(out.is_empty());
    }
}
