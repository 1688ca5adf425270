use nom::IResult;

use super::client_hello::MAX_COOKIE_LEN;
use crate::buffer::Buf;
use crate::codec::put_opaque8;
use crate::types::ProtocolVersion;
use crate::util::opaque8;

/// DTLS cookie challenge: `version(2) | cookie_len(1) | cookie`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloVerifyRequest {
    pub server_version: ProtocolVersion,
    pub cookie: Vec<u8>,
}

impl HelloVerifyRequest {
    pub fn parse(input: &[u8]) -> IResult<&[u8], HelloVerifyRequest> {
        let (input, server_version) = ProtocolVersion::parse(input)?;
        let (input, cookie) = opaque8(input)?;
        Ok((
            input,
            HelloVerifyRequest {
                server_version,
                cookie: cookie.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        debug_assert!(self.cookie.len() <= MAX_COOKIE_LEN);
        self.server_version.serialize(output);
        put_opaque8(output, &self.cookie);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_layout() {
        let hvr = HelloVerifyRequest {
            server_version: ProtocolVersion::DTLS1_0,
            cookie: vec![0xAA; 4],
        };
        let mut out = Buf::new();
        hvr.serialize(&mut out);
        assert_eq!(&out[..], &[0xFE, 0xFF, 4, 0xAA, 0xAA, 0xAA, 0xAA]);
        let (_, parsed) = HelloVerifyRequest::parse(&out).unwrap();
        assert_eq!(parsed, hvr);
    }
}
