//! Shared helpers driving a client and a server in memory.

#![allow(unused)]

use std::sync::Arc;
use std::time::Instant;

use tlscore::{Config, ConfigBuilder, Connection, Error, Identity, Output, Session, Side, Status};

pub const RSA_CERT: &[u8] = include_bytes!("../fixtures/rsa_cert.der");
pub const RSA_KEY: &[u8] = include_bytes!("../fixtures/rsa_key.der");
pub const EC_CERT: &[u8] = include_bytes!("../fixtures/ec_cert.der");
pub const EC_KEY: &[u8] = include_bytes!("../fixtures/ec_key.der");

/// Record content types.
pub const CHANGE_CIPHER_SPEC: u8 = 20;
pub const ALERT: u8 = 21;
pub const HANDSHAKE: u8 = 22;
pub const APPLICATION_DATA: u8 = 23;

/// Handshake message types.
pub const CLIENT_HELLO: u8 = 1;
pub const SERVER_HELLO: u8 = 2;
pub const HELLO_VERIFY_REQUEST: u8 = 3;
pub const CERTIFICATE: u8 = 11;

const BUF_SIZE: usize = 32 * 1024;

pub fn rsa_identity(config: &Config) -> Identity {
    Identity::new(config, vec![RSA_CERT.to_vec()], RSA_KEY).expect("rsa identity")
}

pub fn ec_identity(config: &Config) -> Identity {
    Identity::new(config, vec![EC_CERT.to_vec()], EC_KEY).expect("ec identity")
}

/// One side of a test connection and everything it emitted.
pub struct Endpoint {
    pub conn: Connection,
    pub connected: bool,
    pub peer_cert: Option<Vec<u8>>,
    pub session: Option<Session>,
    pub received: Vec<u8>,
    pub timeout: Option<Instant>,
    /// How often an operation reported `Pending`.
    pub pendings: usize,
}

impl Endpoint {
    pub fn new(conn: Connection) -> Self {
        Endpoint {
            conn,
            connected: false,
            peer_cert: None,
            session: None,
            received: Vec::new(),
            timeout: None,
            pendings: 0,
        }
    }

    /// Feed one packet, resuming until nothing pends.
    pub fn feed(&mut self, packet: &[u8]) -> Result<Status, Error> {
        let mut status = self.conn.process_incoming(packet)?;
        while status == Status::Pending {
            self.pendings += 1;
            status = self.conn.process_incoming(&[])?;
        }
        Ok(status)
    }

    pub fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        let mut status = self.conn.send_application_data(data)?;
        while status == Status::Pending {
            self.pendings += 1;
            status = self.conn.process_incoming(&[])?;
        }
        Ok(())
    }

    /// Poll until `Timeout`, returning the packets and recording events.
    pub fn drain(&mut self) -> Vec<Vec<u8>> {
        let mut packets = Vec::new();
        let mut buf = vec![0u8; BUF_SIZE];
        loop {
            match self.conn.poll_output(&mut buf) {
                Output::Packet(p) => packets.push(p.to_vec()),
                Output::ApplicationData(d) => self.received.extend_from_slice(d),
                Output::Connected => self.connected = true,
                Output::PeerCertificate(c) => self.peer_cert = Some(c.to_vec()),
                Output::Session(s) => self.session = Some(s),
                Output::Timeout(t) => {
                    self.timeout = Some(t);
                    break;
                }
            }
        }
        packets
    }

    pub fn take_received(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.received)
    }
}

/// A client and a server talking over an in-memory link.
pub struct Pair {
    pub client: Endpoint,
    pub server: Endpoint,
}

impl Pair {
    pub fn new(client: Connection, server: Connection) -> Self {
        Pair {
            client: Endpoint::new(client),
            server: Endpoint::new(server),
        }
    }

    /// Run until neither side has anything to send.
    pub fn handshake(&mut self) -> Result<(), Error> {
        self.client.conn.start_handshake()?;
        self.run()
    }

    /// Exchange packets until both sides are quiet.
    pub fn run(&mut self) -> Result<(), Error> {
        for _ in 0..50 {
            let to_server = self.client.drain();
            for p in &to_server {
                self.server.feed(p)?;
            }
            let to_client = self.server.drain();
            for p in &to_client {
                self.client.feed(p)?;
            }
            if to_server.is_empty() && to_client.is_empty() {
                return Ok(());
            }
        }
        panic!("endpoints never went quiet");
    }

    /// Send `data` from the client and return what the server received.
    pub fn client_to_server(&mut self, data: &[u8]) -> Vec<u8> {
        self.client.send(data).expect("client send");
        self.run().expect("deliver");
        self.server.take_received()
    }

    /// Send `data` from the server and return what the client received.
    pub fn server_to_client(&mut self, data: &[u8]) -> Vec<u8> {
        self.server.send(data).expect("server send");
        self.run().expect("deliver");
        self.client.take_received()
    }
}

/// Client without identity, server with `server_identity`.
pub fn pair(config: Config, server_identity: Option<fn(&Config) -> Identity>) -> Pair {
    pair_with(config.clone(), config, server_identity)
}

pub fn pair_with(
    client_config: Config,
    server_config: Config,
    server_identity: Option<fn(&Config) -> Identity>,
) -> Pair {
    let client = Connection::new(Arc::new(client_config), Side::Client).expect("client");
    let server = match server_identity {
        Some(identity) => {
            let id = identity(&server_config);
            Connection::with_identity(Arc::new(server_config), Side::Server, id)
        }
        None => Connection::new(Arc::new(server_config), Side::Server),
    }
    .expect("server");
    Pair::new(client, server)
}

/// Record headers of a packet: `(content_type, epoch, sequence, body)`.
/// Epoch and sequence are zero for TLS.
pub fn records(packet: &[u8], dtls: bool) -> Vec<(u8, u16, u64, Vec<u8>)> {
    let header_len = if dtls { 13 } else { 5 };
    let mut out = Vec::new();
    let mut i = 0;
    while i + header_len <= packet.len() {
        let content_type = packet[i];
        let (epoch, seq) = if dtls {
            let epoch = u16::from_be_bytes([packet[i + 3], packet[i + 4]]);
            let mut seq = [0u8; 8];
            seq[2..].copy_from_slice(&packet[i + 5..i + 11]);
            (epoch, u64::from_be_bytes(seq))
        } else {
            (0, 0)
        };
        let len = u16::from_be_bytes([
            packet[i + header_len - 2],
            packet[i + header_len - 1],
        ]) as usize;
        let end = (i + header_len + len).min(packet.len());
        out.push((content_type, epoch, seq, packet[i + header_len..end].to_vec()));
        i += header_len + len;
    }
    out
}

/// Handshake message types of the plaintext handshake records in a
/// packet.
pub fn handshake_types(packet: &[u8], dtls: bool) -> Vec<u8> {
    records(packet, dtls)
        .into_iter()
        .filter(|(t, epoch, _, body)| *t == HANDSHAKE && *epoch == 0 && !body.is_empty())
        .map(|(_, _, _, body)| body[0])
        .collect()
}

pub fn stream() -> ConfigBuilder {
    Config::builder()
}

pub fn datagram() -> ConfigBuilder {
    Config::builder().dtls().rng_seed(42)
}
