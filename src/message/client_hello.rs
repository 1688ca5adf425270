use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::number::complete::be_u16;
use nom::{Err, IResult};

use super::{Extensions, Random, SessionId};
use crate::buffer::Buf;
use crate::codec::{put_opaque8, put_u16};
use crate::suite::CipherSuite;
use crate::types::ProtocolVersion;
use crate::util::opaque8;

/// Longest DTLS cookie (RFC 6347).
pub const MAX_COOKIE_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub client_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionId,
    /// DTLS only. Always empty for TLS.
    pub cookie: Vec<u8>,
    pub cipher_suites: Vec<CipherSuite>,
    pub compression_methods: Vec<u8>,
    pub extensions: Extensions,
}

impl ClientHello {
    pub fn parse(input: &[u8], dtls: bool) -> IResult<&[u8], ClientHello> {
        let (input, client_version) = ProtocolVersion::parse(input)?;
        let (input, random) = Random::parse(input)?;
        let (input, session_id) = SessionId::parse(input)?;
        let (input, cookie) = if dtls {
            let (input, cookie) = opaque8(input)?;
            (input, cookie.to_vec())
        } else {
            (input, Vec::new())
        };

        let (input, suites_len) = be_u16(input)?;
        if suites_len == 0 || suites_len % 2 != 0 {
            return Err(Err::Failure(Error::new(input, ErrorKind::LengthValue)));
        }
        let (input, suites) = take(suites_len)(input)?;
        let cipher_suites = suites
            .chunks_exact(2)
            .map(|c| CipherSuite::from_u16(u16::from_be_bytes([c[0], c[1]])))
            .collect();

        let (input, compression) = opaque8(input)?;
        if compression.is_empty() {
            return Err(Err::Failure(Error::new(input, ErrorKind::LengthValue)));
        }

        let (input, extensions) = Extensions::parse(input)?;

        Ok((
            input,
            ClientHello {
                client_version,
                random,
                session_id,
                cookie,
                cipher_suites,
                compression_methods: compression.to_vec(),
                extensions,
            },
        ))
    }

    pub fn serialize(&self, dtls: bool, output: &mut Buf) {
        self.client_version.serialize(output);
        self.random.serialize(output);
        self.session_id.serialize(output);
        if dtls {
            put_opaque8(output, &self.cookie);
        }
        put_u16(output, (self.cipher_suites.len() * 2) as u16);
        for suite in &self.cipher_suites {
            suite.serialize(output);
        }
        put_opaque8(output, &self.compression_methods);
        self.extensions.serialize(output);
    }

    pub fn offers(&self, suite: CipherSuite) -> bool {
        self.cipher_suites.contains(&suite)
    }

    /// Null compression must be on offer.
    pub fn offers_null_compression(&self) -> bool {
        self.compression_methods.contains(&0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello() -> ClientHello {
        ClientHello {
            client_version: ProtocolVersion::DTLS1_2,
            random: Random([9; 32]),
            session_id: SessionId::empty(),
            cookie: vec![1, 2, 3],
            cipher_suites: vec![
                CipherSuite::ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
                CipherSuite::EMPTY_RENEGOTIATION_INFO_SCSV,
            ],
            compression_methods: vec![0],
            extensions: Extensions {
                extended_master_secret: true,
                ..Default::default()
            },
        }
    }

    #[test]
    fn dtls_hello_carries_cookie() {
        let ch = hello();
        let mut out = Buf::new();
        ch.serialize(true, &mut out);
        // version(2) random(32) session_id(1) cookie(1+3)
        assert_eq!(&out[35..39], &[3, 1, 2, 3]);
        let (rest, parsed) = ClientHello::parse(&out, true).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, ch);
    }

    #[test]
    fn tls_hello_has_no_cookie() {
        let mut ch = hello();
        ch.client_version = ProtocolVersion::TLS1_2;
        ch.cookie.clear();
        let mut out = Buf::new();
        ch.serialize(false, &mut out);
        let (_, parsed) = ClientHello::parse(&out, false).unwrap();
        assert_eq!(parsed, ch);
        assert!(parsed.offers_null_compression());
    }

    #[test]
    fn odd_suite_length_fails() {
        let mut out = Buf::new();
        hello().serialize(false, &mut out);
        // Patch suites length (after version, random, empty session id).
        out[35] = 0;
        out[36] = 3;
        assert!(ClientHello::parse(&out, false).is_err());
    }
}
