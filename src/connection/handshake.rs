//! Handshake state and the steps both sides share.
//!
//! Complete messages come out of the TLS message buffer or the DTLS
//! reassembly. Each one is order checked and hashed once, then handed to
//! the side specific handler, which may pend. A pending message is kept
//! in [`Handshake::resume`] and offered again when the connection is
//! driven with an empty input.

use std::fmt;

use zeroize::Zeroizing;

use super::{Connection, LocalEvent, State};
use crate::buffer::Buf;
use crate::codec::HandshakeHeader;
use crate::config::Config;
use crate::crypto::{prf, Async, CipherSpec, KeyMaterial, Transcript};
use crate::dtls::reassembly::Reassembly;
use crate::kx::{
    KeyExchange, KxContext, RecvCertVerify, RecvClientKx, RecvServerKx, SendCertVerify,
    SendClientKx, SendServerKx,
};
use crate::message::{parse_complete, CertificateRequest, Finished};
use crate::order::{self, Arrival, HandshakeLedger, OrderContext};
use crate::pending::AsyncOp;
use crate::record::Protection;
use crate::session::Session;
use crate::suite::SuiteParams;
use crate::types::{
    Alert, AlertDescription, ContentType, HandshakeType, NamedGroup, ProtocolVersion,
    SignatureScheme,
};
use crate::util::ct_eq;
use crate::{Error, Side};

/// The key exchange procedure in flight, if it pended.
#[derive(Debug)]
pub(super) enum HsOp {
    RecvServerKx(AsyncOp<RecvServerKx>),
    SendClientKx(AsyncOp<SendClientKx>),
    SendCertVerify(AsyncOp<SendCertVerify>),
    SendServerKx(AsyncOp<SendServerKx>),
    RecvClientKx(AsyncOp<RecvClientKx>),
    RecvCertVerify(AsyncOp<RecvCertVerify>),
}

/// Progress through a handler that sends several messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Step {
    Start,
    KeyExchange,
    CertVerify,
    Request,
    Finish,
    Done,
}

/// One complete incoming handshake message.
pub(super) struct Message {
    pub msg_type: HandshakeType,
    pub seq: u16,
    pub body: Vec<u8>,
    /// Order checked and, where due, hashed.
    pub checked: bool,
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("msg_type", &self.msg_type)
            .field("seq", &self.seq)
            .field("len", &self.body.len())
            .finish()
    }
}

pub(super) struct Handshake {
    pub client_random: [u8; 32],
    pub server_random: [u8; 32],
    /// Client: the id offered, then the one the server chose. Server: the
    /// id of this session.
    pub session_id: Vec<u8>,
    pub transcript: Transcript,
    pub ledger: HandshakeLedger,
    pub params: Option<&'static SuiteParams>,
    pub version: Option<ProtocolVersion>,
    /// Version in the ClientHello, bound into the RSA premaster secret.
    pub client_version: ProtocolVersion,
    pub resuming: bool,
    pub ems: bool,
    pub kx: Option<KeyExchange>,
    pub master_secret: Option<Zeroizing<Vec<u8>>>,
    /// Write keys waiting for our ChangeCipherSpec.
    pub pending_write: Option<Protection>,
    pub peer_spki: Option<Vec<u8>>,
    pub op: Option<HsOp>,
    pub step: Step,
    pub resume: Option<Message>,
    /// TLS: handshake bytes not yet forming a whole message.
    pub tls_buffer: Buf,
    pub reassembly: Reassembly,
    /// DTLS `message_seq` of our next message.
    pub next_send_seq: u16,
    /// Client: the server asked for a certificate.
    pub cert_request: Option<CertificateRequest>,
    /// Client: a non-empty certificate was sent.
    pub send_client_cert: bool,
    /// Server: a CertificateRequest was sent.
    pub cert_requested: bool,
    pub peer_schemes: Option<Vec<SignatureScheme>>,
    pub peer_groups: Option<Vec<NamedGroup>>,
    /// Client: the session_ticket extension sent, empty when only
    /// signalling support.
    pub offered_ticket: Option<Vec<u8>>,
    /// Both sides agreed a NewSessionTicket follows.
    pub issue_ticket: bool,
    /// Client: ticket received in this handshake.
    pub ticket: Option<Vec<u8>>,
    /// Server: a ClientHello passed the cookie check.
    pub hello_accepted: bool,
    pub secure_renegotiation: bool,
}

impl Handshake {
    pub fn new(config: &Config) -> Result<Self, Error> {
        Ok(Handshake {
            client_random: [0; 32],
            server_random: [0; 32],
            session_id: Vec::new(),
            transcript: Transcript::new(config.crypto_provider().hash_provider)?,
            ledger: HandshakeLedger::default(),
            params: None,
            version: None,
            client_version: config.max_version(),
            resuming: false,
            ems: false,
            kx: None,
            master_secret: None,
            pending_write: None,
            peer_spki: None,
            op: None,
            step: Step::Start,
            resume: None,
            tls_buffer: Buf::new(),
            reassembly: Reassembly::new(config.max_handshake_message_len()),
            next_send_seq: 0,
            cert_request: None,
            send_client_cert: false,
            cert_requested: false,
            peer_schemes: None,
            peer_groups: None,
            offered_ticket: None,
            issue_ticket: false,
            ticket: None,
            hello_accepted: false,
            secure_renegotiation: false,
        })
    }
}

impl fmt::Debug for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handshake")
            .field("ledger", &self.ledger)
            .field("suite", &self.params.map(|p| p.suite))
            .field("version", &self.version)
            .field("resuming", &self.resuming)
            .field("ems", &self.ems)
            .field("step", &self.step)
            .field("op", &self.op)
            .field("resume", &self.resume)
            .field("reassembly", &self.reassembly)
            .finish()
    }
}

/// Key exchange inputs for one procedure call.
pub(super) fn kx_context<'a>(
    config: &'a Config,
    params: &'static SuiteParams,
    version: ProtocolVersion,
    randoms: &'a ([u8; 32], [u8; 32]),
) -> KxContext<'a> {
    KxContext {
        provider: config.crypto_provider(),
        config,
        params,
        version,
        client_random: &randoms.0,
        server_random: &randoms.1,
    }
}

/// Added to the transcript before the handler runs. The others are
/// hashed by their handler: the server's ClientHello after the cookie,
/// CertificateVerify and Finished after they verified.
fn hashed_on_arrival(t: HandshakeType) -> bool {
    !matches!(
        t,
        HandshakeType::HelloRequest
            | HandshakeType::HelloVerifyRequest
            | HandshakeType::ClientHello
            | HandshakeType::CertificateVerify
            | HandshakeType::Finished
    )
}

impl Connection {
    pub(super) fn order_context(&self) -> OrderContext {
        OrderContext {
            side: self.side,
            dtls: self.layer.is_dtls(),
            params: self.hs.params,
            resuming: self.hs.resuming,
        }
    }

    pub(super) fn negotiated(&self) -> Result<(&'static SuiteParams, ProtocolVersion), Error> {
        match (self.hs.params, self.hs.version) {
            (Some(p), Some(v)) => Ok((p, v)),
            _ => Err(Error::InternalError("cipher suite not negotiated")),
        }
    }

    /// Handle complete messages until none is ready or one pends.
    pub(super) fn drain_handshake(&mut self) -> Result<Async<()>, Error> {
        loop {
            let mut msg = match self.hs.resume.take() {
                Some(m) => m,
                None => match self.next_message()? {
                    Some(m) => m,
                    None => return Ok(Async::Ready(())),
                },
            };
            if self.handle_message(&mut msg)?.is_pending() {
                self.hs.resume = Some(msg);
                return Ok(Async::Pending);
            }
        }
    }

    fn next_message(&mut self) -> Result<Option<Message>, Error> {
        if self.layer.is_dtls() {
            return Ok(self
                .hs
                .reassembly
                .pop_ready()
                .map(|(msg_type, seq, body)| Message {
                    msg_type,
                    seq,
                    body,
                    checked: false,
                }));
        }

        let buf = &self.hs.tls_buffer;
        if buf.len() < 4 {
            return Ok(None);
        }
        let length = (buf[1] as usize) << 16 | (buf[2] as usize) << 8 | buf[3] as usize;
        if length > self.config.max_handshake_message_len() {
            return Err(Error::HandshakeFailure(format!(
                "handshake message of {} bytes exceeds limit",
                length
            )));
        }
        if buf.len() < 4 + length {
            return Ok(None);
        }
        let msg_type = HandshakeType::from_u8(buf[0]);
        let body = buf[4..4 + length].to_vec();
        self.hs.tls_buffer.consume_front(4 + length);
        Ok(Some(Message {
            msg_type,
            seq: 0,
            body,
            checked: false,
        }))
    }

    fn handle_message(&mut self, msg: &mut Message) -> Result<Async<()>, Error> {
        let t = msg.msg_type;

        if !msg.checked {
            trace!("Handshake {:?} seq {} len {}", t, msg.seq, msg.body.len());
            if t == HandshakeType::HelloRequest && self.side == Side::Client {
                self.on_hello_request(msg)?;
                return Ok(Async::Ready(()));
            }
            if t == HandshakeType::ClientHello && self.state == State::Connected {
                return Err(Error::RenegotiationAttempt);
            }
            order::check(Arrival::Handshake(t), &self.hs.ledger, &self.order_context())?;
            if hashed_on_arrival(t) {
                self.hash_message(msg);
            }
            self.hs.step = Step::Start;
            msg.checked = true;
        }

        let result = match self.side {
            Side::Client => self.client_message(msg)?,
            Side::Server => self.server_message(msg)?,
        };
        if result.is_pending() {
            return Ok(Async::Pending);
        }

        let mark = match t {
            HandshakeType::HelloVerifyRequest => false,
            HandshakeType::ClientHello => self.hs.hello_accepted,
            _ => true,
        };
        if mark {
            self.hs.ledger.mark(Arrival::Handshake(t));
        }
        Ok(Async::Ready(()))
    }

    fn on_hello_request(&mut self, msg: &Message) -> Result<(), Error> {
        if !msg.body.is_empty() {
            return Err(Error::decode("HelloRequest with a body"));
        }
        if self.state == State::Connected {
            debug!("Refusing renegotiation");
            self.queue_alert(Alert::warning(AlertDescription::NoRenegotiation))?;
        } else {
            trace!("Ignoring HelloRequest during handshake");
        }
        Ok(())
    }

    /// Add an incoming message to the transcript. DTLS hashes it with the
    /// header of an unfragmented message.
    pub(super) fn hash_message(&mut self, msg: &Message) {
        let mut header = Buf::new();
        HandshakeHeader::whole(msg.msg_type, msg.body.len() as u32, msg.seq)
            .serialize(self.layer.is_dtls(), &mut header);
        self.hs.transcript.update(&header);
        self.hs.transcript.update(&msg.body);
    }

    pub(super) fn compute_master_secret(&mut self, pre_master_secret: &[u8]) -> Result<(), Error> {
        let (params, version) = self.negotiated()?;
        let prf_hash = params.prf_hash(version);
        let hmac = self.config.crypto_provider().hmac_provider;

        let master_secret = if self.hs.ems {
            let mut session_hash = Buf::new();
            self.hs.transcript.prf_hash(prf_hash, &mut session_hash)?;
            prf::extended_master_secret(hmac, prf_hash, pre_master_secret, &session_hash)?
        } else {
            prf::master_secret(
                hmac,
                prf_hash,
                pre_master_secret,
                &self.hs.client_random,
                &self.hs.server_random,
            )?
        };
        self.hs.master_secret = Some(Zeroizing::new(master_secret.to_vec()));
        Ok(())
    }

    /// Expand the master secret into both directions' keys. Write keys
    /// wait for our ChangeCipherSpec, read keys for the peer's.
    pub(super) fn derive_keys(&mut self) -> Result<(), Error> {
        let (params, version) = self.negotiated()?;
        let master_secret = self
            .hs
            .master_secret
            .as_ref()
            .ok_or(Error::InternalError("no master secret"))?;
        let provider = self.config.crypto_provider();
        let keys = KeyMaterial::derive(
            provider.hmac_provider,
            params,
            version,
            master_secret,
            &self.hs.client_random,
            &self.hs.server_random,
        )?;
        let spec = CipherSpec {
            params,
            version,
            keys,
        };
        let write = Protection::new(provider, &spec, self.side, true)?;
        let read = Protection::new(provider, &spec, self.side, false)?;
        self.hs.pending_write = Some(write);
        self.layer.set_pending_read(read);
        Ok(())
    }

    /// Finished verify_data as sent by `sender` over the transcript so far.
    fn verify_data(&self, sender: Side) -> Result<Buf, Error> {
        let (params, version) = self.negotiated()?;
        let master_secret = self
            .hs
            .master_secret
            .as_ref()
            .ok_or(Error::InternalError("no master secret"))?;
        let prf_hash = params.prf_hash(version);
        let mut hash = Buf::new();
        self.hs.transcript.prf_hash(prf_hash, &mut hash)?;
        let label = match sender {
            Side::Client => "client finished",
            Side::Server => "server finished",
        };
        prf::verify_data(
            self.config.crypto_provider().hmac_provider,
            prf_hash,
            master_secret,
            label,
            &hash,
        )
    }

    /// Check the peer's Finished, then add it to the transcript.
    pub(super) fn receive_finished(&mut self, msg: &Message) -> Result<(), Error> {
        let finished = parse_complete(&msg.body, "Finished", Finished::parse)?;
        let expected = self.verify_data(self.side.peer())?;
        if !ct_eq(&expected, &finished.verify_data) {
            return Err(Error::BadFinished);
        }
        self.hash_message(msg);
        Ok(())
    }

    /// ChangeCipherSpec under the old write keys, then Finished under the
    /// new ones.
    pub(super) fn send_ccs_and_finished(&mut self) -> Result<(), Error> {
        self.queue_record(ContentType::ChangeCipherSpec, &[1])?;
        let protection = self
            .hs
            .pending_write
            .take()
            .ok_or(Error::InternalError("no pending write keys"))?;
        self.layer.install_write(protection)?;

        let verify_data = self.verify_data(self.side)?;
        self.queue_handshake(HandshakeType::Finished, &verify_data)
    }

    pub(super) fn complete_handshake(&mut self) -> Result<(), Error> {
        let (params, version) = self.negotiated()?;
        let master_secret = self
            .hs
            .master_secret
            .clone()
            .ok_or(Error::InternalError("no master secret"))?;

        let ticket = match self.side {
            Side::Client => {
                let previous = self
                    .session
                    .as_ref()
                    .filter(|_| self.hs.resuming)
                    .and_then(|s| s.ticket.clone());
                self.hs.ticket.take().or(previous)
            }
            Side::Server => None,
        };
        let session = Session {
            id: self.hs.session_id.clone(),
            version,
            cipher_suite: params.suite,
            master_secret,
            extended_master_secret: self.hs.ems,
            ticket,
        };

        if self.side == Side::Server && !self.hs.resuming && !session.id.is_empty() {
            if let Some(cache) = self.config.session_cache() {
                cache.put(session.clone());
            }
        }

        debug!(
            "Handshake complete: {} {:?}{}",
            version,
            params.suite,
            if self.hs.resuming { " (resumed)" } else { "" }
        );
        self.state = State::Connected;
        self.hs.kx = None;
        self.hs.op = None;
        self.events.push_back(LocalEvent::Connected);
        if self.side == Side::Client {
            self.events.push_back(LocalEvent::Session(session.clone()));
        }
        self.session = Some(session);
        self.flush_queued_send()
    }
}

