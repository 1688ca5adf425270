use nom::error::{Error, ErrorKind};
use nom::{Err, IResult};

use super::DigitallySigned;
use crate::buffer::Buf;
use crate::codec::{put_opaque16, put_opaque8};
use crate::suite::KeyExchangeAlgorithm;
use crate::types::{CurveType, NamedGroup};
use crate::util::{opaque16, opaque8};

/// Ephemeral parameters in a ServerKeyExchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerKxParams {
    /// Plain PSK: only the identity hint is sent.
    None,
    Dh {
        p: Vec<u8>,
        g: Vec<u8>,
        ys: Vec<u8>,
    },
    Ecdh {
        group: NamedGroup,
        point: Vec<u8>,
    },
}

impl ServerKxParams {
    fn parse(input: &[u8], kx: KeyExchangeAlgorithm) -> IResult<&[u8], ServerKxParams> {
        if kx.uses_dh() {
            let (input, p) = opaque16(input)?;
            let (input, g) = opaque16(input)?;
            let (input, ys) = opaque16(input)?;
            return Ok((
                input,
                ServerKxParams::Dh {
                    p: p.to_vec(),
                    g: g.to_vec(),
                    ys: ys.to_vec(),
                },
            ));
        }
        if kx.uses_ecdh() {
            let (input, curve_type) = CurveType::parse(input)?;
            if curve_type != CurveType::NamedCurve {
                return Err(Err::Failure(Error::new(input, ErrorKind::Tag)));
            }
            let (input, group) = NamedGroup::parse(input)?;
            let (input, point) = opaque8(input)?;
            return Ok((
                input,
                ServerKxParams::Ecdh {
                    group,
                    point: point.to_vec(),
                },
            ));
        }
        Ok((input, ServerKxParams::None))
    }

    /// The wire encoding, which is also what the server signs.
    pub fn serialize(&self, output: &mut Buf) {
        match self {
            ServerKxParams::None => {}
            ServerKxParams::Dh { p, g, ys } => {
                put_opaque16(output, p);
                put_opaque16(output, g);
                put_opaque16(output, ys);
            }
            ServerKxParams::Ecdh { group, point } => {
                output.push(CurveType::NamedCurve.as_u8());
                group.serialize(output);
                put_opaque8(output, point);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerKeyExchange {
    /// PSK suites only.
    pub psk_hint: Option<Vec<u8>>,
    pub params: ServerKxParams,
    /// Certificate authenticated suites only.
    pub signature: Option<DigitallySigned>,
}

impl ServerKeyExchange {
    pub fn parse(
        input: &[u8],
        kx: KeyExchangeAlgorithm,
        signed: bool,
        tls12: bool,
    ) -> IResult<&[u8], ServerKeyExchange> {
        let (input, psk_hint) = if kx.uses_psk() {
            let (input, hint) = opaque16(input)?;
            (input, Some(hint.to_vec()))
        } else {
            (input, None)
        };
        let (input, params) = ServerKxParams::parse(input, kx)?;
        let (input, signature) = if signed {
            let (input, s) = DigitallySigned::parse(input, tls12)?;
            (input, Some(s))
        } else {
            (input, None)
        };
        Ok((
            input,
            ServerKeyExchange {
                psk_hint,
                params,
                signature,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        if let Some(hint) = &self.psk_hint {
            put_opaque16(output, hint);
        }
        self.params.serialize(output);
        if let Some(signature) = &self.signature {
            signature.serialize(output);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKeyExchange {
    /// PSK suites only.
    pub psk_identity: Option<Vec<u8>>,
    /// Encrypted premaster secret (RSA), `Yc` (DHE) or the EC point
    /// (ECDHE). Empty for plain PSK.
    pub exchange: Vec<u8>,
}

impl ClientKeyExchange {
    pub fn parse(input: &[u8], kx: KeyExchangeAlgorithm) -> IResult<&[u8], ClientKeyExchange> {
        let (input, psk_identity) = if kx.uses_psk() {
            let (input, id) = opaque16(input)?;
            (input, Some(id.to_vec()))
        } else {
            (input, None)
        };
        let (input, exchange) = match kx {
            KeyExchangeAlgorithm::Psk => (input, &[][..]),
            KeyExchangeAlgorithm::Ecdhe | KeyExchangeAlgorithm::EcdhePsk => opaque8(input)?,
            KeyExchangeAlgorithm::Rsa
            | KeyExchangeAlgorithm::Dhe
            | KeyExchangeAlgorithm::DhePsk => opaque16(input)?,
        };
        Ok((
            input,
            ClientKeyExchange {
                psk_identity,
                exchange: exchange.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, kx: KeyExchangeAlgorithm, output: &mut Buf) {
        if let Some(id) = &self.psk_identity {
            put_opaque16(output, id);
        }
        match kx {
            KeyExchangeAlgorithm::Psk => {}
            KeyExchangeAlgorithm::Ecdhe | KeyExchangeAlgorithm::EcdhePsk => {
                put_opaque8(output, &self.exchange)
            }
            _ => put_opaque16(output, &self.exchange),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SignatureScheme;

    #[test]
    fn signed_ecdhe_params() {
        let ske = ServerKeyExchange {
            psk_hint: None,
            params: ServerKxParams::Ecdh {
                group: NamedGroup::X25519,
                point: vec![4; 32],
            },
            signature: Some(DigitallySigned {
                scheme: Some(SignatureScheme::ECDSA_SECP256R1_SHA256),
                signature: vec![1, 2, 3],
            }),
        };
        let mut out = Buf::new();
        ske.serialize(&mut out);
        assert_eq!(&out[..4], &[3, 0, 29, 32]);
        let (rest, parsed) =
            ServerKeyExchange::parse(&out, KeyExchangeAlgorithm::Ecdhe, true, true).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, ske);
    }

    #[test]
    fn explicit_curves_are_rejected() {
        let input = [1, 0, 23, 1, 4];
        assert!(ServerKeyExchange::parse(&input, KeyExchangeAlgorithm::Ecdhe, false, true).is_err());
    }

    #[test]
    fn dhe_psk_carries_hint_and_group() {
        let ske = ServerKeyExchange {
            psk_hint: Some(b"hint".to_vec()),
            params: ServerKxParams::Dh {
                p: vec![0xFF; 8],
                g: vec![2],
                ys: vec![7; 8],
            },
            signature: None,
        };
        let mut out = Buf::new();
        ske.serialize(&mut out);
        let (_, parsed) =
            ServerKeyExchange::parse(&out, KeyExchangeAlgorithm::DhePsk, false, true).unwrap();
        assert_eq!(parsed, ske);
    }

    #[test]
    fn client_exchange_framing_follows_algorithm() {
        let cke = ClientKeyExchange {
            psk_identity: Some(b"id".to_vec()),
            exchange: vec![9; 3],
        };
        let mut out = Buf::new();
        cke.serialize(KeyExchangeAlgorithm::EcdhePsk, &mut out);
        assert_eq!(&out[..], &[0, 2, b'i', b'd', 3, 9, 9, 9]);
        let (_, parsed) = ClientKeyExchange::parse(&out, KeyExchangeAlgorithm::EcdhePsk).unwrap();
        assert_eq!(parsed, cke);

        let rsa = ClientKeyExchange {
            psk_identity: None,
            exchange: vec![1; 256],
        };
        let mut out = Buf::new();
        rsa.serialize(KeyExchangeAlgorithm::Rsa, &mut out);
        assert_eq!(&out[..2], &[1, 0]);
    }
}
