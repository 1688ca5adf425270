//! Datagram specifics: handshake reassembly, flight retransmission and
//! HelloVerifyRequest cookies.

pub(crate) mod cookie;
pub(crate) mod reassembly;
pub(crate) mod retransmit;
