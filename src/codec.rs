//! Big endian integer helpers and the two framing headers.
//!
//! Record header, TLS: `type(1) version(2) length(2)`.
//! Record header, DTLS: `type(1) version(2) epoch(2) sequence(6) length(2)`.
//! Handshake header, TLS: `type(1) length(3)`.
//! Handshake header, DTLS: `type(1) length(3) message_seq(2) fragment_offset(3) fragment_length(3)`.

use nom::number::complete::{be_u16, be_u24};
use nom::IResult;

use crate::buffer::Buf;
use crate::types::{ContentType, HandshakeType, ProtocolVersion};
use crate::util::be_u48;
use crate::Error;

pub const MAX_U24: u32 = 0x00FF_FFFF;
pub const MAX_DTLS_SEQ: u64 = 0x0000_FFFF_FFFF_FFFF;

pub fn put_u16(out: &mut Buf, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn put_u24(out: &mut Buf, v: u32) {
    out.extend_from_slice(&v.to_be_bytes()[1..]);
}

pub fn put_u32(out: &mut Buf, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn put_u48(out: &mut Buf, v: u64) {
    out.extend_from_slice(&v.to_be_bytes()[2..]);
}

/// Write `data` with an 8-bit length prefix.
pub fn put_opaque8(out: &mut Buf, data: &[u8]) {
    debug_assert!(data.len() <= u8::MAX as usize);
    out.push(data.len() as u8);
    out.extend_from_slice(data);
}

/// Write `data` with a 16-bit length prefix.
pub fn put_opaque16(out: &mut Buf, data: &[u8]) {
    debug_assert!(data.len() <= u16::MAX as usize);
    put_u16(out, data.len() as u16);
    out.extend_from_slice(data);
}

/// Write `data` with a 24-bit length prefix.
pub fn put_opaque24(out: &mut Buf, data: &[u8]) {
    debug_assert!(data.len() <= MAX_U24 as usize);
    put_u24(out, data.len() as u32);
    out.extend_from_slice(data);
}

/// Reserve a 16-bit length field and return its position for [`end_u16_len`].
pub fn begin_u16_len(out: &mut Buf) -> usize {
    let pos = out.len();
    put_u16(out, 0);
    pos
}

pub fn end_u16_len(out: &mut Buf, pos: usize) {
    let len = (out.len() - pos - 2) as u16;
    out[pos..pos + 2].copy_from_slice(&len.to_be_bytes());
}

/// Reserve a 24-bit length field and return its position for [`end_u24_len`].
pub fn begin_u24_len(out: &mut Buf) -> usize {
    let pos = out.len();
    put_u24(out, 0);
    pos
}

pub fn end_u24_len(out: &mut Buf, pos: usize) {
    let len = (out.len() - pos - 3) as u32;
    out[pos..pos + 3].copy_from_slice(&len.to_be_bytes()[1..]);
}

/// Record header for both TLS and DTLS. `epoch` and `sequence` are zero and
/// unused for TLS, where the sequence number is implicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    pub epoch: u16,
    pub sequence: u64,
    pub length: u16,
}

impl RecordHeader {
    pub const TLS_LEN: usize = 5;
    pub const DTLS_LEN: usize = 13;

    pub fn len(dtls: bool) -> usize {
        if dtls {
            Self::DTLS_LEN
        } else {
            Self::TLS_LEN
        }
    }

    pub fn parse_tls(input: &[u8]) -> IResult<&[u8], RecordHeader> {
        let (input, content_type) = ContentType::parse(input)?;
        let (input, version) = ProtocolVersion::parse(input)?;
        let (input, length) = be_u16(input)?;
        Ok((
            input,
            RecordHeader {
                content_type,
                version,
                epoch: 0,
                sequence: 0,
                length,
            },
        ))
    }

    pub fn parse_dtls(input: &[u8]) -> IResult<&[u8], RecordHeader> {
        let (input, content_type) = ContentType::parse(input)?;
        let (input, version) = ProtocolVersion::parse(input)?;
        let (input, epoch) = be_u16(input)?;
        let (input, sequence) = be_u48(input)?;
        let (input, length) = be_u16(input)?;
        Ok((
            input,
            RecordHeader {
                content_type,
                version,
                epoch,
                sequence,
                length,
            },
        ))
    }

    /// Decode a header from the front of `input`.
    ///
    /// Short input is `IncompleteData`. An unknown content type is rejected
    /// here for both transports.
    pub fn decode(input: &[u8], dtls: bool) -> Result<RecordHeader, Error> {
        if input.len() < Self::len(dtls) {
            return Err(Error::IncompleteData);
        }
        let (_, header) = if dtls {
            Self::parse_dtls(input)?
        } else {
            Self::parse_tls(input)?
        };
        if let ContentType::Unknown(v) = header.content_type {
            return Err(Error::UnknownRecordType(v));
        }
        Ok(header)
    }

    pub fn serialize(&self, dtls: bool, out: &mut Buf) {
        self.content_type.serialize(out);
        self.version.serialize(out);
        if dtls {
            put_u16(out, self.epoch);
            put_u48(out, self.sequence);
        }
        put_u16(out, self.length);
    }

    /// The 8-byte sequence number fed to MAC and AEAD computations:
    /// the implicit counter for TLS, `epoch || seq48` for DTLS.
    pub fn mac_sequence(&self, dtls: bool, tls_seq: u64) -> [u8; 8] {
        if dtls {
            (((self.epoch as u64) << 48) | (self.sequence & MAX_DTLS_SEQ)).to_be_bytes()
        } else {
            tls_seq.to_be_bytes()
        }
    }
}

/// Handshake message header. The fragment fields are only on the wire for
/// DTLS; for TLS they describe the whole message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeHeader {
    pub msg_type: HandshakeType,
    pub length: u32,
    pub message_seq: u16,
    pub fragment_offset: u32,
    pub fragment_length: u32,
}

impl HandshakeHeader {
    pub const TLS_LEN: usize = 4;
    pub const DTLS_LEN: usize = 12;

    pub fn len(dtls: bool) -> usize {
        if dtls {
            Self::DTLS_LEN
        } else {
            Self::TLS_LEN
        }
    }

    pub fn parse_tls(input: &[u8]) -> IResult<&[u8], HandshakeHeader> {
        let (input, msg_type) = HandshakeType::parse(input)?;
        let (input, length) = be_u24(input)?;
        Ok((
            input,
            HandshakeHeader {
                msg_type,
                length,
                message_seq: 0,
                fragment_offset: 0,
                fragment_length: length,
            },
        ))
    }

    pub fn parse_dtls(input: &[u8]) -> IResult<&[u8], HandshakeHeader> {
        let (input, msg_type) = HandshakeType::parse(input)?;
        let (input, length) = be_u24(input)?;
        let (input, message_seq) = be_u16(input)?;
        let (input, fragment_offset) = be_u24(input)?;
        let (input, fragment_length) = be_u24(input)?;
        Ok((
            input,
            HandshakeHeader {
                msg_type,
                length,
                message_seq,
                fragment_offset,
                fragment_length,
            },
        ))
    }

    pub fn parse(input: &[u8], dtls: bool) -> IResult<&[u8], HandshakeHeader> {
        if dtls {
            Self::parse_dtls(input)
        } else {
            Self::parse_tls(input)
        }
    }

    pub fn serialize(&self, dtls: bool, out: &mut Buf) {
        out.push(self.msg_type.as_u8());
        put_u24(out, self.length);
        if dtls {
            put_u16(out, self.message_seq);
            put_u24(out, self.fragment_offset);
            put_u24(out, self.fragment_length);
        }
    }

    /// Header for an unfragmented message.
    pub fn whole(msg_type: HandshakeType, length: u32, message_seq: u16) -> Self {
        HandshakeHeader {
            msg_type,
            length,
            message_seq,
            fragment_offset: 0,
            fragment_length: length,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_are_big_endian() {
        let mut out = Buf::new();
        put_u16(&mut out, 0x0102);
        put_u24(&mut out, 0x030405);
        put_u32(&mut out, 0x06070809);
        put_u48(&mut out, 0x0A0B0C0D0E0F);
        assert_eq!(
            &out[..],
            &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]
        );
    }

    #[test]
    fn length_backpatch() {
        let mut out = Buf::new();
        let pos = begin_u24_len(&mut out);
        out.extend_from_slice(&[9; 300]);
        end_u24_len(&mut out, pos);
        assert_eq!(&out[..3], &[0x00, 0x01, 0x2C]);
        assert_eq!(out.len(), 303);
    }

    #[test]
    fn dtls_record_header_layout() {
        let header = RecordHeader {
            content_type: ContentType::Handshake,
            version: ProtocolVersion::DTLS1_2,
            epoch: 1,
            sequence: 0x0000_0102_0304,
            length: 0x20,
        };
        let mut out = Buf::new();
        header.serialize(true, &mut out);
        assert_eq!(
            &out[..],
            &[22, 0xFE, 0xFD, 0, 1, 0, 0, 1, 2, 3, 4, 0, 0x20]
        );
        assert_eq!(RecordHeader::decode(&out, true).unwrap(), header);
        assert_eq!(
            header.mac_sequence(true, 0),
            [0, 1, 0, 0, 1, 2, 3, 4]
        );
    }

    #[test]
    fn short_header_is_incomplete() {
        assert!(matches!(
            RecordHeader::decode(&[22, 3, 3, 0], false),
            Err(Error::IncompleteData)
        ));
    }

    #[test]
    fn unknown_record_type_is_rejected() {
        assert!(matches!(
            RecordHeader::decode(&[99, 3, 3, 0, 0], false),
            Err(Error::UnknownRecordType(99))
        ));
    }

    #[test]
    fn dtls_handshake_header() {
        let h = HandshakeHeader {
            msg_type: HandshakeType::Certificate,
            length: 1000,
            message_seq: 3,
            fragment_offset: 500,
            fragment_length: 200,
        };
        let mut out = Buf::new();
        h.serialize(true, &mut out);
        assert_eq!(out.len(), HandshakeHeader::DTLS_LEN);
        let (rest, parsed) = HandshakeHeader::parse(&out, true).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, h);
    }
}
