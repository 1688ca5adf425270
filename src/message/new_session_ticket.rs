use nom::number::complete::be_u32;
use nom::IResult;

use crate::buffer::Buf;
use crate::codec::{put_opaque16, put_u32};
use crate::util::opaque16;

/// RFC 5077 ticket issued by the server.
#[derive(Clone, PartialEq, Eq)]
pub struct NewSessionTicket {
    /// Seconds, zero for unspecified.
    pub lifetime_hint: u32,
    pub ticket: Vec<u8>,
}

impl NewSessionTicket {
    pub fn parse(input: &[u8]) -> IResult<&[u8], NewSessionTicket> {
        let (input, lifetime_hint) = be_u32(input)?;
        let (input, ticket) = opaque16(input)?;
        Ok((
            input,
            NewSessionTicket {
                lifetime_hint,
                ticket: ticket.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Buf) {
        put_u32(output, self.lifetime_hint);
        put_opaque16(output, &self.ticket);
    }
}

impl std::fmt::Debug for NewSessionTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewSessionTicket")
            .field("lifetime_hint", &self.lifetime_hint)
            .field("len", &self.ticket.len())
            .finish()
    }
}
