use nom::IResult;

use crate::buffer::Buf;
use crate::codec::put_opaque16;
use crate::types::SignatureScheme;
use crate::util::opaque16;

/// A signature, with its scheme under TLS 1.2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigitallySigned {
    /// Absent before TLS 1.2.
    pub scheme: Option<SignatureScheme>,
    pub signature: Vec<u8>,
}

impl DigitallySigned {
    pub fn parse(input: &[u8], with_scheme: bool) -> IResult<&[u8], DigitallySigned> {
        let (input, scheme) = if with_scheme {
            let (input, s) = SignatureScheme::parse(input)?;
            (input, Some(s))
        } else {
            (input, None)
        };
        let (input, signature) = opaque16(input)?;
        Ok((
            input,
            DigitallySigned {
                scheme,
                signature: signature.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        if let Some(scheme) = self.scheme {
            scheme.serialize(output);
        }
        put_opaque16(output, &self.signature);
    }
}
