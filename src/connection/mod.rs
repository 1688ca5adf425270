//! The sans-IO connection.
//!
//! A [`Connection`] never touches a socket or a clock. Bytes go in through
//! [`Connection::process_incoming`], packets, application data and events
//! come out of [`Connection::poll_output`], and time is fed through
//! [`Connection::handle_timeout`].
//!
//! Any provider operation may pend. The connection then reports
//! [`Status::Pending`] and must be driven again with an empty input once
//! the operation can make progress. Only one operation is in flight at a
//! time.

mod client;
mod handshake;
mod record_io;
mod server;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use self::handshake::Handshake;
use self::record_io::RxRecord;
use crate::buffer::Buf;
use crate::builder::MessageBuilder;
use crate::certificate::Identity;
use crate::config::Config;
use crate::crypto::Async;
use crate::dtls::cookie::CookieSecret;
use crate::dtls::retransmit::{Flight, TimerAction};
use crate::pending::{OpKind, PendingSlot};
use crate::record::{QueueRx, RecordLayer};
use crate::session::Session;
use crate::types::{Alert, AlertDescription, AlertLevel};
use crate::{Error, Side};

/// Timeout reported when no timer is running.
const IDLE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Outcome of driving the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// All input was consumed.
    Progress,
    /// Stream transport: a partial record is buffered.
    NeedMoreData,
    /// A provider operation pends. Call again with empty input.
    Pending,
}

/// Output polled from a [`Connection`].
#[derive(Debug)]
pub enum Output<'a> {
    /// Bytes to send to the peer. One datagram for DTLS.
    Packet(&'a [u8]),
    /// Decrypted application data.
    ApplicationData(&'a [u8]),
    /// The handshake completed.
    Connected,
    /// DER leaf certificate of the peer, after it was verified.
    PeerCertificate(&'a [u8]),
    /// Client: the established session, for later resumption.
    Session(Session),
    /// Nothing else to do. Call [`Connection::handle_timeout`] at this
    /// instant.
    Timeout(Instant),
}

/// Events queued for delivery via `poll_output`.
#[derive(Debug)]
pub(crate) enum LocalEvent {
    Connected,
    PeerCertificate(Vec<u8>),
    Session(Session),
}

impl LocalEvent {
    fn into_output(self, buf: &mut [u8]) -> Output<'_> {
        match self {
            LocalEvent::Connected => Output::Connected,
            LocalEvent::PeerCertificate(der) => {
                let l = der.len();
                assert!(l <= buf.len(), "Buffer too small for peer certificate");
                buf[..l].copy_from_slice(&der);
                Output::PeerCertificate(&buf[..l])
            }
            LocalEvent::Session(session) => Output::Session(session),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    /// Client before `start_handshake`, server before the first record.
    Idle,
    Handshaking,
    Connected,
    Closed,
}

/// One TLS or DTLS connection, client or server.
pub struct Connection {
    config: Arc<Config>,
    side: Side,
    state: State,
    layer: RecordLayer,
    /// Records waiting for their MAC and encryption, in order.
    outbound: VecDeque<MessageBuilder>,
    pending: PendingSlot,
    /// Unprocessed input. A partial record for TLS, the rest of the
    /// current datagram for DTLS.
    input: Buf,
    /// Record being opened.
    rx: Option<RxRecord>,
    hs: Handshake,
    identity: Option<Identity>,
    events: VecDeque<LocalEvent>,
    app_data: VecDeque<Buf>,
    /// Application data given before the handshake completed.
    queued_send: VecDeque<Vec<u8>>,
    peer_address: Vec<u8>,
    session: Option<Session>,
    last_now: Instant,
    flight: Flight,
    /// The peer repeated a message of a flight we answered.
    resend_due: bool,
    queue_rx: QueueRx,
    /// DTLS server only.
    cookie: Option<CookieSecret>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("side", &self.side)
            .field("state", &self.state)
            .field("pending", &self.pending)
            .field("input_len", &self.input.len())
            .field("rx", &self.rx)
            .field("outbound", &self.outbound.len())
            .field("hs", &self.hs)
            .field("events", &self.events.len())
            .field("app_data", &self.app_data.len())
            .field("queued_send", &self.queued_send.len())
            .field("flight", &self.flight)
            .field("queue_rx", &self.queue_rx)
            .finish()
    }
}

impl Connection {
    /// Create a connection without a certificate. Enough for clients that
    /// are not asked for one and for PSK suites.
    pub fn new(config: Arc<Config>, side: Side) -> Result<Connection, Error> {
        let cookie = if config.is_datagram() && side == Side::Server {
            Some(CookieSecret::new(config.crypto_provider())?)
        } else {
            None
        };
        Ok(Connection {
            side,
            state: State::Idle,
            layer: RecordLayer::new(&config, side),
            outbound: VecDeque::new(),
            pending: PendingSlot::default(),
            input: Buf::new(),
            rx: None,
            hs: Handshake::new(&config)?,
            identity: None,
            events: VecDeque::new(),
            app_data: VecDeque::new(),
            queued_send: VecDeque::new(),
            peer_address: Vec::new(),
            session: None,
            last_now: Instant::now(),
            flight: Flight::new(&config),
            resend_due: false,
            queue_rx: QueueRx::new(),
            cookie,
            config,
        })
    }

    /// Create a connection that authenticates with `identity`.
    pub fn with_identity(
        config: Arc<Config>,
        side: Side,
        identity: Identity,
    ) -> Result<Connection, Error> {
        let mut connection = Self::new(config, side)?;
        connection.identity = Some(identity);
        Ok(connection)
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn is_connected(&self) -> bool {
        self.state == State::Connected
    }

    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }

    /// Client: queue the ClientHello. Server: nothing to send, the
    /// handshake starts with the first record received.
    pub fn start_handshake(&mut self) -> Result<(), Error> {
        if self.state != State::Idle {
            return Err(Error::InternalError("handshake already started"));
        }
        self.state = State::Handshaking;
        if self.side == Side::Server {
            return Ok(());
        }
        debug!("Client handshake started");
        let result = self.start_client().and_then(|_| self.drive_outbound());
        match result {
            Ok(Async::Pending) => {
                self.pending.suspend(OpKind::Send);
                Ok(())
            }
            Ok(Async::Ready(())) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Feed received bytes. For DTLS `data` is exactly one datagram.
    ///
    /// An empty `data` resumes a pending operation.
    pub fn process_incoming(&mut self, data: &[u8]) -> Result<Status, Error> {
        let pending = self.pending.get();
        let flushing = data.is_empty() && pending == Some(OpKind::Send);
        if self.state == State::Closed && !flushing {
            return Err(Error::ConnectionClosed);
        }

        if !data.is_empty() {
            if let Some(kind) = pending {
                debug!("Input while {:?} is pending", kind);
                return Err(Error::AsyncConflict);
            }
            if self.app_data.len() >= self.config.max_queue_rx() {
                return Err(Error::ReceiveQueueFull);
            }
            match (self.side, self.state) {
                (Side::Server, State::Idle) => {
                    debug!("Server handshake started");
                    self.state = State::Handshaking;
                }
                (Side::Client, State::Idle) => {
                    return Err(Error::UnexpectedMessage(
                        "data before start_handshake".into(),
                    ));
                }
                _ => {}
            }
            if self.layer.is_dtls() {
                self.input.clear();
            }
            self.input.extend_from_slice(data);
        }

        match self.run() {
            Ok(status) => Ok(status),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn run(&mut self) -> Result<Status, Error> {
        if self.state == State::Closed {
            if self.drive_outbound()?.is_pending() {
                return Ok(self.suspend(OpKind::Send));
            }
            self.pending.release();
            return Ok(Status::Progress);
        }

        loop {
            if self.process_record()?.is_pending() {
                return Ok(self.suspend(OpKind::Receive));
            }
            if self.drain_handshake()?.is_pending() {
                return Ok(self.suspend(OpKind::Handshake));
            }
            if self.drive_outbound()?.is_pending() {
                return Ok(self.suspend(OpKind::Send));
            }
            self.pending.release();

            match self.next_record()? {
                Some(rec) => self.rx = Some(rec),
                None if self.resend_due => {
                    self.resend_due = false;
                    if self.flight.has_saved() {
                        debug!("Peer repeated its flight");
                        self.resend_flight()?;
                    }
                }
                None => break,
            }
        }

        if !self.layer.is_dtls() && !self.input.is_empty() {
            Ok(Status::NeedMoreData)
        } else {
            Ok(Status::Progress)
        }
    }

    fn suspend(&mut self, kind: OpKind) -> Status {
        trace!("Suspended on {:?}", kind);
        self.pending.suspend(kind);
        Status::Pending
    }

    /// Close on a fatal error. Sends the matching alert when the error
    /// has one.
    fn fail(&mut self, e: Error) -> Error {
        if self.state == State::Closed {
            return e;
        }
        debug!("Connection failed: {}", e);

        if let Some(description) = e.alert() {
            if let Err(alert_error) = self.queue_alert(Alert::fatal(description)) {
                debug!("Fatal alert not sent: {}", alert_error);
            }
        }
        self.state = State::Closed;
        self.flight.stop_timers();
        self.rx = None;
        self.hs.resume = None;
        match self.drive_outbound() {
            Ok(Async::Pending) => self.pending.suspend(OpKind::Send),
            _ => self.pending.release(),
        }

        let orderly = matches!(e, Error::AlertReceived(AlertDescription::CloseNotify));
        if self.side == Side::Server && !orderly && !self.hs.session_id.is_empty() {
            if let Some(cache) = self.config.session_cache() {
                cache.remove(&self.hs.session_id);
            }
        }
        e
    }

    /// Queue application data. Data given before the handshake completes
    /// is sent right after it.
    pub fn send_application_data(&mut self, data: &[u8]) -> Result<Status, Error> {
        match self.state {
            State::Closed => return Err(Error::ConnectionClosed),
            State::Connected => {}
            State::Idle | State::Handshaking => {
                if self.queued_send.len() >= self.config.max_queue_tx() {
                    return Err(Error::TransmitQueueFull);
                }
                self.queued_send.push_back(data.to_vec());
                return Ok(Status::Progress);
            }
        }
        self.pending.claim(OpKind::Send)?;

        let result = self
            .queue_application_data(data)
            .and_then(|_| self.drive_outbound());
        match result {
            Ok(Async::Pending) => Ok(self.suspend(OpKind::Send)),
            Ok(Async::Ready(())) => {
                self.pending.release();
                Ok(Status::Progress)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    pub(super) fn flush_queued_send(&mut self) -> Result<(), Error> {
        while let Some(data) = self.queued_send.pop_front() {
            self.queue_application_data(&data)?;
        }
        Ok(())
    }

    /// Next output. `buf` must fit the largest packet, record or
    /// certificate; a maximum fragment plus 2048 bytes is always enough
    /// for packets and application data.
    pub fn poll_output<'a>(&mut self, buf: &'a mut [u8]) -> Output<'a> {
        if let Some(event) = self.events.pop_front() {
            return event.into_output(buf);
        }

        if let Some(data) = self.app_data.pop_front() {
            let l = data.len();
            assert!(l <= buf.len(), "Buffer too small for application data");
            buf[..l].copy_from_slice(&data);
            self.layer.recycle(data);
            return Output::ApplicationData(&buf[..l]);
        }

        if let Some(packet) = self.layer.pop_packet() {
            let l = packet.len();
            assert!(l <= buf.len(), "Buffer too small for packet");
            buf[..l].copy_from_slice(&packet);
            self.layer.recycle(packet);
            return Output::Packet(&buf[..l]);
        }

        Output::Timeout(self.next_timeout())
    }

    fn next_timeout(&self) -> Instant {
        let timers_running = self.layer.is_dtls()
            && self.state == State::Handshaking
            && !self.flight.timers_disabled();
        if !timers_running {
            return self.last_now + IDLE_TIMEOUT;
        }
        // Unarmed timers are armed by the next handle_timeout.
        self.flight.next_timeout().unwrap_or(self.last_now)
    }

    /// Drive the DTLS retransmission timers.
    pub fn handle_timeout(&mut self, now: Instant) -> Result<(), Error> {
        self.last_now = now;
        if !self.layer.is_dtls() || self.state != State::Handshaking {
            return Ok(());
        }
        if matches!(
            self.pending.get(),
            Some(OpKind::Handshake | OpKind::Receive)
        ) {
            return Ok(());
        }

        let result = self.flight.handle_timeout(now).and_then(|action| {
            if action == TimerAction::Resend && self.flight.has_saved() {
                self.resend_flight()?;
                return self.drive_outbound();
            }
            Ok(Async::Ready(()))
        });
        match result {
            Ok(Async::Pending) => {
                self.pending.suspend(OpKind::Send);
                Ok(())
            }
            Ok(Async::Ready(())) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Send an alert. A fatal alert closes the connection.
    ///
    /// Fails with [`Error::AsyncConflict`] while a receive or handshake
    /// operation is pending.
    pub fn send_alert(
        &mut self,
        level: AlertLevel,
        description: AlertDescription,
    ) -> Result<(), Error> {
        if self.state == State::Closed {
            return Err(Error::ConnectionClosed);
        }
        self.pending.claim(OpKind::Send)?;
        self.queue_alert(Alert { level, description })?;
        if level == AlertLevel::Fatal {
            self.state = State::Closed;
            self.flight.stop_timers();
        }
        self.flush_alert()
    }

    /// Send close_notify and close the connection.
    pub fn close(&mut self) -> Result<(), Error> {
        if self.state == State::Closed {
            return Ok(());
        }
        self.pending.claim(OpKind::Send)?;
        debug!("Closing connection");
        self.queue_alert(Alert::warning(AlertDescription::CloseNotify))?;
        self.state = State::Closed;
        self.flight.stop_timers();
        self.flush_alert()
    }

    fn flush_alert(&mut self) -> Result<(), Error> {
        match self.drive_outbound()? {
            Async::Pending => self.pending.suspend(OpKind::Send),
            Async::Ready(()) => self.pending.release(),
        }
        Ok(())
    }

    /// The established session, once connected.
    pub fn session(&self) -> Option<Session> {
        self.session.clone()
    }

    /// Client: offer `session` for resumption. Call before
    /// `start_handshake`.
    pub fn set_session(&mut self, session: Session) {
        self.session = Some(session);
    }

    /// Peer transport address, bound into DTLS cookies.
    pub fn set_peer_address(&mut self, address: &[u8]) {
        self.peer_address = address.to_vec();
    }
}
