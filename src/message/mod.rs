//! Handshake message bodies.
//!
//! Every message parses from the body bytes of one reassembled handshake
//! message (header stripped) and serializes into a [`Buf`]. Parsers are
//! nom combinators; [`parse_complete`] turns them into engine errors and
//! rejects trailing bytes.

mod certificate;
mod certificate_request;
mod client_hello;
mod extension;
mod finished;
mod hello_verify;
mod key_exchange;
mod new_session_ticket;
mod server_hello;
mod signed;

pub use certificate::Certificate;
pub use certificate_request::{CertificateRequest, ECDSA_SIGN, RSA_SIGN};
pub use client_hello::ClientHello;
pub use extension::{ExtensionType, Extensions};
pub(crate) use extension::UNCOMPRESSED_POINTS;
pub use finished::Finished;
pub use hello_verify::HelloVerifyRequest;
pub use key_exchange::{ClientKeyExchange, ServerKeyExchange, ServerKxParams};
pub use new_session_ticket::NewSessionTicket;
pub use server_hello::ServerHello;
pub use signed::DigitallySigned;

use std::fmt;

use nom::bytes::complete::take;
use nom::IResult;
use tinyvec::ArrayVec;

use crate::buffer::Buf;
use crate::codec::put_opaque8;
use crate::util::opaque8;
use crate::Error;

/// Run `parser` over the whole of `input`.
pub(crate) fn parse_complete<'a, T>(
    input: &'a [u8],
    what: &'static str,
    parser: impl FnOnce(&'a [u8]) -> IResult<&'a [u8], T>,
) -> Result<T, Error> {
    let (rest, value) = parser(input).map_err(|e| {
        let e: Error = e.into();
        Error::DecodeError(format!("{}: {}", what, e))
    })?;
    if !rest.is_empty() {
        return Err(Error::DecodeError(format!(
            "{}: {} trailing bytes",
            what,
            rest.len()
        )));
    }
    Ok(value)
}

/// Hello random.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Random(pub [u8; 32]);

impl Random {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Random> {
        let (input, bytes) = take(32_usize)(input)?;
        let mut r = [0u8; 32];
        r.copy_from_slice(bytes);
        Ok((input, Random(r)))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&self.0);
    }
}

impl fmt::Debug for Random {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Random({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// Session id, 0 to 32 bytes.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct SessionId(ArrayVec<[u8; 32]>);

impl SessionId {
    pub const MAX_LEN: usize = 32;

    pub fn empty() -> Self {
        SessionId::default()
    }

    pub fn try_new(data: &[u8]) -> Option<Self> {
        if data.len() > Self::MAX_LEN {
            return None;
        }
        let mut v = ArrayVec::new();
        v.extend_from_slice(data);
        Some(SessionId(v))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], SessionId> {
        let (rest, data) = opaque8(input)?;
        match SessionId::try_new(data) {
            Some(id) => Ok((rest, id)),
            None => Err(nom::Err::Failure(nom::error::Error::new(
                input,
                nom::error::ErrorKind::LengthValue,
            ))),
        }
    }

    pub fn serialize(&self, output: &mut Buf) {
        put_opaque8(output, &self.0);
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId(len={})", self.0.len())
    }
}
