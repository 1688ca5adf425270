use nom::number::complete::be_u8;
use nom::IResult;

use super::{Extensions, Random, SessionId};
use crate::buffer::Buf;
use crate::suite::CipherSuite;
use crate::types::ProtocolVersion;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub server_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionId,
    pub cipher_suite: CipherSuite,
    pub compression_method: u8,
    pub extensions: Extensions,
}

impl ServerHello {
    pub fn parse(input: &[u8]) -> IResult<&[u8], ServerHello> {
        let (input, server_version) = ProtocolVersion::parse(input)?;
        let (input, random) = Random::parse(input)?;
        let (input, session_id) = SessionId::parse(input)?;
        let (input, cipher_suite) = CipherSuite::parse(input)?;
        let (input, compression_method) = be_u8(input)?;
        let (input, extensions) = Extensions::parse(input)?;
        Ok((
            input,
            ServerHello {
                server_version,
                random,
                session_id,
                cipher_suite,
                compression_method,
                extensions,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        self.server_version.serialize(output);
        self.random.serialize(output);
        self.session_id.serialize(output);
        self.cipher_suite.serialize(output);
        output.push(self.compression_method);
        self.extensions.serialize(output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_hello_without_extensions() {
        let sh = ServerHello {
            server_version: ProtocolVersion::TLS1_2,
            random: Random([3; 32]),
            session_id: SessionId::try_new(&[5; 32]).unwrap(),
            cipher_suite: CipherSuite::RSA_WITH_AES_128_CBC_SHA256,
            compression_method: 0,
            extensions: Extensions::default(),
        };
        let mut out = Buf::new();
        sh.serialize(&mut out);
        assert_eq!(out.len(), 2 + 32 + 33 + 2 + 1);
        assert_eq!(&out[67..69], &[0x00, 0x3C]);
        let (rest, parsed) = ServerHello::parse(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, sh);
    }
}
