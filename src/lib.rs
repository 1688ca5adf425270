//! Sans-IO TLS 1.0–1.2 and DTLS 1.0/1.2 engine.
//!
//! The engine implements the record layer, the handshake state machine and
//! the key exchanges of the classic (pre TLS 1.3) protocols for both
//! stream and datagram transports. It owns no sockets and no clocks: see
//! [`Connection`] for the driving model.
//!
//! All cryptography goes through a [`CryptoProvider`](crypto::CryptoProvider).
//! Any provider call may report [`Async::Pending`](crypto::Async), for
//! instance when the private key lives in a hardware module, and the
//! connection resumes where it stopped.

#![forbid(unsafe_code)]
#![warn(clippy::all)]
// #![deny(missing_docs)]

#[macro_use]
extern crate log;

mod buffer;
mod builder;
mod certificate;
mod codec;
mod config;
mod connection;
pub mod crypto;
mod dtls;
mod error;
mod kx;
pub mod message;
mod order;
mod pending;
mod record;
mod rng;
mod sequence;
mod session;
pub mod suite;
mod timer;
pub mod types;
mod util;
mod window;

pub use builder::MacHook;
pub use certificate::Identity;
pub use config::{Config, ConfigBuilder, PskProvider, StaticPsk, Transport};
pub use connection::{Connection, Output, Status};
pub use error::{Error, ErrorKind};
pub use session::{AeadTicketEncrypter, MemorySessionCache, Session, SessionCache, TicketEncrypter};

/// Which end of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    pub fn peer(&self) -> Side {
        match self {
            Side::Client => Side::Server,
            Side::Server => Side::Client,
        }
    }
}
