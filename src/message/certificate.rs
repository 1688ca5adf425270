use nom::error::{Error, ErrorKind};
use nom::{Err, IResult};

use crate::buffer::Buf;
use crate::codec::{begin_u24_len, end_u24_len, put_opaque24};
use crate::util::opaque24;

/// DER certificates, leaf first.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Certificate {
    pub chain: Vec<Vec<u8>>,
}

impl Certificate {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Certificate> {
        let (rest, mut list) = opaque24(input)?;
        let mut chain = Vec::new();
        while !list.is_empty() {
            let (r, cert) = opaque24(list)?;
            if cert.is_empty() {
                return Err(Err::Failure(Error::new(list, ErrorKind::LengthValue)));
            }
            chain.push(cert.to_vec());
            list = r;
        }
        Ok((rest, Certificate { chain }))
    }

    pub fn serialize(&self, output: &mut Buf) {
        let pos = begin_u24_len(output);
        for cert in &self.chain {
            put_opaque24(output, cert);
        }
        end_u24_len(output, pos);
    }
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("count", &self.chain.len())
            .finish()
    }
}
