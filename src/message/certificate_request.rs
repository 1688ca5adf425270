use nom::multi::many0;
use nom::IResult;

use crate::buffer::Buf;
use crate::codec::{begin_u16_len, end_u16_len, put_opaque8};
use crate::types::SignatureScheme;
use crate::util::{opaque16, opaque8};

/// `rsa_sign` certificate type.
pub const RSA_SIGN: u8 = 1;
/// `ecdsa_sign` certificate type.
pub const ECDSA_SIGN: u8 = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    pub certificate_types: Vec<u8>,
    /// TLS 1.2 only.
    pub signature_schemes: Option<Vec<SignatureScheme>>,
    /// DER distinguished names, passed through untouched.
    pub authorities: Vec<u8>,
}

impl CertificateRequest {
    pub fn parse(input: &[u8], tls12: bool) -> IResult<&[u8], CertificateRequest> {
        let (input, types) = opaque8(input)?;
        let certificate_types = types.to_vec();
        let (input, signature_schemes) = if tls12 {
            let (input, list) = opaque16(input)?;
            let (left, schemes) = many0(SignatureScheme::parse)(list)?;
            if !left.is_empty() {
                return Err(nom::Err::Failure(nom::error::Error::new(
                    left,
                    nom::error::ErrorKind::LengthValue,
                )));
            }
            (input, Some(schemes))
        } else {
            (input, None)
        };
        let (input, authorities) = opaque16(input)?;
        Ok((
            input,
            CertificateRequest {
                certificate_types,
                signature_schemes,
                authorities: authorities.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        put_opaque8(output, &self.certificate_types);
        if let Some(schemes) = &self.signature_schemes {
            let pos = begin_u16_len(output);
            for s in schemes {
                s.serialize(output);
            }
            end_u16_len(output, pos);
        }
        let pos = begin_u16_len(output);
        output.extend_from_slice(&self.authorities);
        end_u16_len(output, pos);
    }
}
