//! Server side of the handshake.

use std::sync::Arc;

use zeroize::Zeroizing;

use super::handshake::{kx_context, HsOp, Message, Step};
use super::{Connection, LocalEvent};
use crate::buffer::Buf;
use crate::crypto::Async;
use crate::kx::{
    check_peer_key, choose_group, Agreement, KeyExchange, RecvCertVerify, RecvClientKx,
    SendServerKx,
};
use crate::message::{
    parse_complete, Certificate, CertificateRequest, ClientHello, Extensions, HelloVerifyRequest,
    NewSessionTicket, Random, ServerHello, SessionId, ECDSA_SIGN, RSA_SIGN,
    UNCOMPRESSED_POINTS,
};
use crate::pending::AsyncOp;
use crate::session::Session;
use crate::suite::{
    negotiate, select_signature_scheme, Authentication, Capabilities, CipherSuite, Negotiation,
};
use crate::types::{HandshakeType, ProtocolVersion, SignatureAlgorithm, SignatureScheme};
use crate::{Error, Side};

impl Connection {
    pub(super) fn server_message(&mut self, msg: &Message) -> Result<Async<()>, Error> {
        use HandshakeType as H;
        match msg.msg_type {
            H::ClientHello => self.on_client_hello(msg),
            H::Certificate => self.on_client_certificate(msg).map(Async::Ready),
            H::ClientKeyExchange => self.on_client_key_exchange(msg),
            H::CertificateVerify => self.on_certificate_verify(msg),
            H::Finished => self.on_client_finished(msg).map(Async::Ready),
            t => Err(Error::UnexpectedMessage(format!("{:?} on server", t))),
        }
    }

    /// Answer a ClientHello with the server's flight: ServerHello,
    /// Certificate, ServerKeyExchange, CertificateRequest, ServerHelloDone
    /// or, when resuming, ServerHello, NewSessionTicket, ChangeCipherSpec,
    /// Finished.
    fn on_client_hello(&mut self, msg: &Message) -> Result<Async<()>, Error> {
        if self.hs.step == Step::Start {
            let dtls = self.layer.is_dtls();
            let hello = parse_complete(&msg.body, "ClientHello", |i| ClientHello::parse(i, dtls))?;

            if dtls && !self.cookie_valid(&hello)? {
                self.send_hello_verify_request(msg.seq, &hello)?;
                return Ok(Async::Ready(()));
            }

            self.hs.hello_accepted = true;
            if dtls {
                self.hs.next_send_seq = msg.seq;
            }
            self.hs.transcript.reset()?;
            self.hash_message(msg);

            if self.accept_client_hello(&hello)? {
                self.hs.step = Step::Done;
            } else {
                self.hs.step = Step::KeyExchange;
            }
        }

        if self.hs.step == Step::KeyExchange {
            if self.send_server_key_exchange()?.is_pending() {
                return Ok(Async::Pending);
            }
            self.hs.step = Step::Request;
        }

        if self.hs.step == Step::Request {
            let config = Arc::clone(&self.config);
            let (params, version) = self.negotiated()?;
            let request =
                config.request_client_certificate() || config.require_client_certificate();
            if request && params.needs_certificate() {
                let request = CertificateRequest {
                    certificate_types: vec![RSA_SIGN, ECDSA_SIGN],
                    signature_schemes: version
                        .is_tls12_family()
                        .then(|| config.signature_schemes().to_vec()),
                    authorities: Vec::new(),
                };
                let mut body = Buf::new();
                request.serialize(&mut body);
                self.queue_handshake(HandshakeType::CertificateRequest, &body)?;
                self.hs.cert_requested = true;
            }
            self.queue_handshake(HandshakeType::ServerHelloDone, &[])?;
            self.hs.step = Step::Done;
        }

        Ok(Async::Ready(()))
    }

    fn cookie_valid(&self, hello: &ClientHello) -> Result<bool, Error> {
        let secret = self
            .cookie
            .as_ref()
            .ok_or(Error::InternalError("no cookie secret"))?;
        secret.verify(self.config.crypto_provider(), hello, &self.peer_address)
    }

    /// The HelloVerifyRequest echoes the ClientHello's `message_seq` and
    /// is neither hashed nor retransmitted on a timer.
    fn send_hello_verify_request(&mut self, seq: u16, hello: &ClientHello) -> Result<(), Error> {
        let secret = self
            .cookie
            .as_ref()
            .ok_or(Error::InternalError("no cookie secret"))?;
        let cookie = secret.generate(self.config.crypto_provider(), hello, &self.peer_address)?;
        debug!("ClientHello without valid cookie, sending HelloVerifyRequest");

        let mut body = Buf::new();
        HelloVerifyRequest {
            server_version: ProtocolVersion::DTLS1_0,
            cookie,
        }
        .serialize(&mut body);

        self.flight.begin(2);
        self.hs.next_send_seq = seq;
        self.queue_handshake(HandshakeType::HelloVerifyRequest, &body)?;
        self.flight.stop_timers();
        Ok(())
    }

    fn select_version(&self, offered: ProtocolVersion) -> Result<ProtocolVersion, Error> {
        let max = self.config.max_version();
        if !offered.same_family(max) {
            return Err(Error::UnsupportedVersion(offered));
        }
        if offered.at_least(max) {
            return Ok(max);
        }
        let downgrade = self.config.allow_downgrade()
            && max.one_step_down() == Some(offered)
            && offered.at_least(self.config.min_version());
        if downgrade {
            Ok(offered)
        } else {
            Err(Error::UnsupportedVersion(offered))
        }
    }

    fn server_capabilities(&self) -> Capabilities {
        let config = &self.config;
        let key = self.identity.as_ref().map(|i| i.key.algorithm());
        Capabilities {
            rsa: key == Some(SignatureAlgorithm::RSA),
            ecdsa: key == Some(SignatureAlgorithm::ECDSA),
            psk: config.psk_provider().is_some(),
            dh: true,
            ecdhe: choose_group(
                config.named_groups(),
                self.hs.peer_groups.as_deref(),
                config.crypto_provider(),
            )
            .is_some(),
        }
    }

    /// Negotiate and queue the start of the flight. Returns whether the
    /// session is resumed, in which case the flight is complete.
    fn accept_client_hello(&mut self, hello: &ClientHello) -> Result<bool, Error> {
        let config = Arc::clone(&self.config);
        let provider = config.crypto_provider();

        let version = self.select_version(hello.client_version)?;
        if !hello.offers_null_compression() {
            return Err(Error::HandshakeFailure(
                "null compression not offered".into(),
            ));
        }
        let renegotiation_info = &hello.extensions.renegotiation_info;
        if renegotiation_info.as_ref().is_some_and(|i| !i.is_empty()) {
            return Err(Error::HandshakeFailure("renegotiation_info not empty".into()));
        }
        self.hs.secure_renegotiation = renegotiation_info.is_some()
            || hello.offers(CipherSuite::EMPTY_RENEGOTIATION_INFO_SCSV);

        self.hs.client_version = hello.client_version;
        self.hs.client_random = hello.random.0;
        self.hs.version = Some(version);
        self.layer.set_version(version);
        self.hs.ems = config.extended_master_secret() && hello.extensions.extended_master_secret;
        self.hs.issue_ticket =
            config.ticket_encrypter().is_some() && hello.extensions.session_ticket.is_some();
        self.hs.peer_schemes = hello.extensions.signature_algorithms.clone();
        self.hs.peer_groups = hello.extensions.supported_groups.clone();
        provider.random(&mut self.hs.server_random)?;

        if self.layer.is_dtls() {
            self.flight.begin(4);
        }

        if let Some(session) = self.find_session(hello, version) {
            self.resume_session(session, hello)?;
            return Ok(true);
        }

        let params = negotiate(&Negotiation {
            local: config.cipher_suites(),
            peer: &hello.cipher_suites,
            side: Side::Server,
            use_client_order: config.use_client_preference(),
            version,
            capabilities: self.server_capabilities(),
        })?;
        debug!("Negotiated {} {:?}", version, params.suite);
        self.hs.params = Some(params);

        let mut kx = KeyExchange::new(params.kx);
        if params.kx.uses_dh() {
            let (p, g) = config.dh_params();
            kx.agreement = Agreement::Dh {
                p: p.to_vec(),
                g: g.to_vec(),
            };
        }
        if params.kx.uses_ecdh() {
            let group = choose_group(
                config.named_groups(),
                self.hs.peer_groups.as_deref(),
                provider,
            )
            .ok_or(Error::HandshakeFailure("no shared group".into()))?;
            kx.agreement = Agreement::Ecdh(group);
        }
        self.hs.kx = Some(kx);

        self.hs.session_id.clear();
        if config.session_cache().is_some() {
            let mut id = vec![0u8; 32];
            provider.random(&mut id)?;
            self.hs.session_id = id;
        }

        self.send_server_hello()?;

        if params.needs_certificate() {
            let identity = self
                .identity
                .as_ref()
                .ok_or(Error::NoPrivateKey("server certificate"))?;
            let mut body = Buf::new();
            Certificate {
                chain: identity.chain.clone(),
            }
            .serialize(&mut body);
            self.queue_handshake(HandshakeType::Certificate, &body)?;
        }
        Ok(false)
    }

    /// A session the client offered by ticket or id that can be resumed
    /// with this hello.
    fn find_session(&self, hello: &ClientHello, version: ProtocolVersion) -> Option<Session> {
        if hello.session_id.is_empty() {
            return None;
        }
        let config = &self.config;

        let mut session = None;
        let ticket = hello.extensions.session_ticket.as_ref();
        if let (Some(encrypter), Some(ticket)) = (config.ticket_encrypter(), ticket) {
            if !ticket.is_empty() {
                match encrypter.decrypt(ticket).map(|s| Session::decode_state(&s)) {
                    Some(Ok(s)) => session = Some(s),
                    Some(Err(e)) => debug!("Ignoring malformed ticket: {}", e),
                    None => debug!("Ticket not accepted, full handshake"),
                }
            }
        }
        if session.is_none() {
            if let Some(cache) = config.session_cache() {
                session = cache.get(hello.session_id.as_slice());
            }
        }
        let session = session?;

        let usable = session.version == version
            && hello.offers(session.cipher_suite)
            && config.cipher_suites().contains(&session.cipher_suite)
            && session
                .cipher_suite
                .params()
                .is_some_and(|p| p.usable_with(version))
            && session.extended_master_secret == self.hs.ems;
        if !usable {
            debug!("Offered session not resumable");
            return None;
        }
        Some(session)
    }

    fn resume_session(&mut self, session: Session, hello: &ClientHello) -> Result<(), Error> {
        let params = session
            .cipher_suite
            .params()
            .ok_or(Error::InternalError("resumed suite unknown"))?;
        debug!("Resuming session, {:?}", params.suite);
        self.hs.resuming = true;
        self.hs.params = Some(params);
        self.hs.session_id = hello.session_id.as_slice().to_vec();
        self.hs.master_secret = Some(session.master_secret.clone());
        self.derive_keys()?;

        self.send_server_hello()?;
        if self.hs.issue_ticket {
            self.send_new_session_ticket()?;
        }
        self.send_ccs_and_finished()
    }

    fn send_server_hello(&mut self) -> Result<(), Error> {
        let (params, version) = self.negotiated()?;

        let mut extensions = Extensions::default();
        extensions.extended_master_secret = self.hs.ems;
        if self.hs.secure_renegotiation {
            extensions.renegotiation_info = Some(Vec::new());
        }
        if self.hs.issue_ticket {
            extensions.session_ticket = Some(Vec::new());
        }
        let ecc = params.kx.uses_ecdh() || params.auth == Authentication::Ecdsa;
        if ecc && !self.hs.resuming {
            extensions.ec_point_formats = Some(vec![UNCOMPRESSED_POINTS]);
        }

        let hello = ServerHello {
            server_version: version,
            random: Random(self.hs.server_random),
            session_id: SessionId::try_new(&self.hs.session_id)
                .ok_or(Error::InternalError("session id too long"))?,
            cipher_suite: params.suite,
            compression_method: 0,
            extensions,
        };
        let mut body = Buf::new();
        hello.serialize(&mut body);
        self.queue_handshake(HandshakeType::ServerHello, &body)
    }

    fn send_server_key_exchange(&mut self) -> Result<Async<()>, Error> {
        let config = Arc::clone(&self.config);
        let (params, version) = self.negotiated()?;
        let hint = if params.kx.uses_psk() {
            config.psk_provider().and_then(|p| p.identity_hint())
        } else {
            None
        };
        if !params.needs_server_kx(hint.is_some()) {
            return Ok(Async::Ready(()));
        }

        let mut op = match self.hs.op.take() {
            Some(HsOp::SendServerKx(op)) => op,
            _ => {
                let scheme = if params.needs_certificate() {
                    let key = &self
                        .identity
                        .as_ref()
                        .ok_or(Error::NoPrivateKey("server key"))?
                        .key;
                    let supported: Vec<SignatureScheme> = config
                        .signature_schemes()
                        .iter()
                        .filter(|s| key.schemes().contains(s))
                        .copied()
                        .collect();
                    select_signature_scheme(
                        version,
                        key.algorithm(),
                        self.hs.peer_schemes.as_deref(),
                        &supported,
                    )?
                } else {
                    None
                };
                AsyncOp::new(SendServerKx::new(scheme, hint))
            }
        };

        let randoms = (self.hs.client_random, self.hs.server_random);
        let ctx = kx_context(&config, params, version, &randoms);
        let kx = self
            .hs
            .kx
            .as_mut()
            .ok_or(Error::InternalError("no key exchange"))?;
        let key = self.identity.as_mut().map(|i| &mut i.key);

        let mut body = Buf::new();
        if SendServerKx::poll(&mut op, &ctx, kx, key, &mut body)?.is_pending() {
            self.hs.op = Some(HsOp::SendServerKx(op));
            return Ok(Async::Pending);
        }
        self.queue_handshake(HandshakeType::ServerKeyExchange, &body)?;
        Ok(Async::Ready(()))
    }

    fn on_client_certificate(&mut self, msg: &Message) -> Result<(), Error> {
        if !self.hs.cert_requested {
            return Err(Error::UnexpectedMessage(
                "Certificate without CertificateRequest".into(),
            ));
        }
        let config = Arc::clone(&self.config);
        let certificate = parse_complete(&msg.body, "Certificate", Certificate::parse)?;

        let Some(leaf) = certificate.chain.first() else {
            if config.require_client_certificate() {
                return Err(Error::HandshakeFailure(
                    "client certificate required".into(),
                ));
            }
            debug!("Client sent no certificate");
            return Ok(());
        };

        let spki = config
            .cert_verifier()
            .verify_chain(&certificate.chain)
            .map_err(Error::CertificateError)?;
        check_peer_key(config.crypto_provider(), &config, &spki, None)?;

        self.events
            .push_back(LocalEvent::PeerCertificate(leaf.clone()));
        self.hs.peer_spki = Some(spki);
        Ok(())
    }

    fn on_client_key_exchange(&mut self, msg: &Message) -> Result<Async<()>, Error> {
        if self.hs.cert_requested && !self.hs.ledger.seen(HandshakeType::Certificate) {
            return Err(Error::OutOfOrder(HandshakeType::ClientKeyExchange));
        }
        let config = Arc::clone(&self.config);
        let (params, version) = self.negotiated()?;
        let randoms = (self.hs.client_random, self.hs.server_random);
        let ctx = kx_context(&config, params, version, &randoms);

        let mut op = match self.hs.op.take() {
            Some(HsOp::RecvClientKx(op)) => op,
            _ => AsyncOp::new(RecvClientKx::new(&msg.body, self.hs.client_version)),
        };
        let kx = self
            .hs
            .kx
            .as_mut()
            .ok_or(Error::InternalError("no key exchange"))?;
        let key = self.identity.as_mut().map(|i| &mut i.key);

        let pre_master_secret = match RecvClientKx::poll(&mut op, &ctx, kx, key)? {
            Async::Ready(pms) => pms,
            Async::Pending => {
                self.hs.op = Some(HsOp::RecvClientKx(op));
                return Ok(Async::Pending);
            }
        };
        self.compute_master_secret(&pre_master_secret)?;
        self.derive_keys()?;
        Ok(Async::Ready(()))
    }

    fn on_certificate_verify(&mut self, msg: &Message) -> Result<Async<()>, Error> {
        let config = Arc::clone(&self.config);
        let (params, version) = self.negotiated()?;
        let spki = self.hs.peer_spki.clone().ok_or(Error::UnexpectedMessage(
            "CertificateVerify without client certificate".into(),
        ))?;
        let randoms = (self.hs.client_random, self.hs.server_random);
        let ctx = kx_context(&config, params, version, &randoms);

        let mut op = match self.hs.op.take() {
            Some(HsOp::RecvCertVerify(op)) => op,
            _ => AsyncOp::new(RecvCertVerify::new(&msg.body)),
        };
        if RecvCertVerify::poll(&mut op, &ctx, &self.hs.transcript, &spki)?.is_pending() {
            self.hs.op = Some(HsOp::RecvCertVerify(op));
            return Ok(Async::Pending);
        }
        debug!("Client certificate verified");
        self.hash_message(msg);
        Ok(Async::Ready(()))
    }

    fn send_new_session_ticket(&mut self) -> Result<(), Error> {
        let config = Arc::clone(&self.config);
        let encrypter = config
            .ticket_encrypter()
            .ok_or(Error::InternalError("no ticket encrypter"))?;
        let (params, version) = self.negotiated()?;
        let master_secret = self
            .hs
            .master_secret
            .clone()
            .ok_or(Error::InternalError("no master secret"))?;

        let state = Session {
            id: Vec::new(),
            version,
            cipher_suite: params.suite,
            master_secret,
            extended_master_secret: self.hs.ems,
            ticket: None,
        };
        let mut plaintext = Zeroizing::new(Buf::new());
        state.encode_state(&mut plaintext);
        let ticket = encrypter
            .encrypt(&plaintext)
            .map_err(Error::CryptoError)?;

        let mut body = Buf::new();
        NewSessionTicket {
            lifetime_hint: encrypter.lifetime_hint(),
            ticket,
        }
        .serialize(&mut body);
        self.queue_handshake(HandshakeType::NewSessionTicket, &body)
    }

    fn on_client_finished(&mut self, msg: &Message) -> Result<(), Error> {
        self.receive_finished(msg)?;
        let dtls = self.layer.is_dtls();

        if self.hs.resuming {
            if dtls {
                self.flight.complete();
            }
        } else {
            if dtls {
                self.flight.begin(6);
            }
            if self.hs.issue_ticket {
                self.send_new_session_ticket()?;
            }
            self.send_ccs_and_finished()?;
            if dtls {
                self.flight.stop_timers();
            }
        }

        self.complete_handshake()
    }
}
