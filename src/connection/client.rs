//! Client side of the handshake.

use std::sync::Arc;

use super::handshake::{kx_context, HsOp, Message, Step};
use super::{Connection, LocalEvent};
use crate::buffer::Buf;
use crate::crypto::Async;
use crate::kx::{
    check_peer_key, choose_group, KeyExchange, RecvServerKx, SendCertVerify, SendClientKx,
};
use crate::message::{
    parse_complete, Certificate, CertificateRequest, ClientHello, Extensions, HelloVerifyRequest,
    NewSessionTicket, Random, ServerHello, SessionId, UNCOMPRESSED_POINTS,
};
use crate::pending::AsyncOp;
use crate::suite::{
    negotiate, select_signature_scheme, Authentication, Capabilities, CipherSuite, Negotiation,
};
use crate::types::{HandshakeType, SignatureScheme};
use crate::{Error, Side};

impl Connection {
    pub(super) fn start_client(&mut self) -> Result<(), Error> {
        self.config
            .crypto_provider()
            .random(&mut self.hs.client_random)?;
        self.hs.client_version = self.config.max_version();
        self.offer_session()?;
        self.send_client_hello(Vec::new())
    }

    /// Pick up the session given through `set_session`, if it fits the
    /// configuration.
    fn offer_session(&mut self) -> Result<(), Error> {
        let config = Arc::clone(&self.config);
        let max = config.max_version();
        let session = self.session.as_ref().filter(|s| {
            s.version.same_family(max)
                && max.at_least(s.version)
                && s.version.at_least(config.min_version())
                && config.cipher_suites().contains(&s.cipher_suite)
        });

        match session {
            Some(s) => {
                debug!("Offering session for resumption");
                self.hs.session_id = s.id.clone();
                self.hs.offered_ticket = Some(s.ticket.clone().unwrap_or_default());
                if s.ticket.is_some() && s.id.is_empty() {
                    // A ticket is only recognized as accepted by the echo
                    // of a session id.
                    let mut id = vec![0u8; 32];
                    config.crypto_provider().random(&mut id)?;
                    self.hs.session_id = id;
                }
            }
            None => {
                self.hs.session_id.clear();
                self.hs.offered_ticket = Some(Vec::new());
            }
        }
        Ok(())
    }

    fn send_client_hello(&mut self, cookie: Vec<u8>) -> Result<(), Error> {
        let config = Arc::clone(&self.config);
        let dtls = self.layer.is_dtls();

        if dtls {
            self.flight.begin(if cookie.is_empty() { 1 } else { 3 });
        }

        let mut cipher_suites = config.cipher_suites().to_vec();
        cipher_suites.push(CipherSuite::EMPTY_RENEGOTIATION_INFO_SCSV);

        let mut extensions = Extensions::default();
        if config.max_version().is_tls12_family() {
            extensions.signature_algorithms = Some(config.signature_schemes().to_vec());
        }
        let ecc = config
            .cipher_suites()
            .iter()
            .filter_map(|s| s.params())
            .any(|p| p.kx.uses_ecdh() || p.auth == Authentication::Ecdsa);
        if ecc {
            extensions.supported_groups = Some(config.named_groups().to_vec());
            extensions.ec_point_formats = Some(vec![UNCOMPRESSED_POINTS]);
        }
        extensions.extended_master_secret = config.extended_master_secret();
        extensions.session_ticket = self.hs.offered_ticket.clone();

        let hello = ClientHello {
            client_version: self.hs.client_version,
            random: Random(self.hs.client_random),
            session_id: SessionId::try_new(&self.hs.session_id)
                .ok_or(Error::InternalError("session id too long"))?,
            cookie,
            cipher_suites,
            compression_methods: vec![0],
            extensions,
        };
        debug!(
            "Send ClientHello {} with {} suites",
            hello.client_version,
            hello.cipher_suites.len()
        );

        let mut body = Buf::new();
        hello.serialize(dtls, &mut body);
        self.queue_handshake(HandshakeType::ClientHello, &body)
    }

    fn client_capabilities(&self) -> Capabilities {
        let config = &self.config;
        Capabilities {
            rsa: true,
            ecdsa: true,
            psk: config.psk_provider().is_some(),
            dh: true,
            ecdhe: choose_group(config.named_groups(), None, config.crypto_provider()).is_some(),
        }
    }

    pub(super) fn client_message(&mut self, msg: &Message) -> Result<Async<()>, Error> {
        use HandshakeType as H;
        match msg.msg_type {
            H::HelloVerifyRequest => self.on_hello_verify_request(msg).map(Async::Ready),
            H::ServerHello => self.on_server_hello(msg).map(Async::Ready),
            H::Certificate => self.on_server_certificate(msg).map(Async::Ready),
            H::ServerKeyExchange => self.on_server_key_exchange(msg),
            H::CertificateRequest => self.on_certificate_request(msg).map(Async::Ready),
            H::ServerHelloDone => self.on_server_hello_done(msg),
            H::NewSessionTicket => self.on_new_session_ticket(msg).map(Async::Ready),
            H::Finished => self.on_server_finished(msg).map(Async::Ready),
            t => Err(Error::UnexpectedMessage(format!("{:?} on client", t))),
        }
    }

    fn on_hello_verify_request(&mut self, msg: &Message) -> Result<(), Error> {
        let hvr = parse_complete(&msg.body, "HelloVerifyRequest", HelloVerifyRequest::parse)?;
        if !hvr.server_version.is_dtls() {
            return Err(Error::UnsupportedVersion(hvr.server_version));
        }
        if hvr.cookie.is_empty() {
            return Err(Error::CookieError("empty cookie".into()));
        }
        debug!("HelloVerifyRequest with {} byte cookie", hvr.cookie.len());

        // The exchange so far is not part of the handshake.
        self.hs.transcript.reset()?;
        self.hs.ledger.reset();
        self.send_client_hello(hvr.cookie)
    }

    fn on_server_hello(&mut self, msg: &Message) -> Result<(), Error> {
        let config = Arc::clone(&self.config);
        let hello = parse_complete(&msg.body, "ServerHello", ServerHello::parse)?;

        let version = hello.server_version;
        let max = config.max_version();
        if !version.same_family(max)
            || !max.at_least(version)
            || !version.at_least(config.min_version())
            || (version != max && !config.allow_downgrade())
        {
            return Err(Error::UnsupportedVersion(version));
        }
        if hello.compression_method != 0 {
            return Err(Error::HandshakeFailure("server chose compression".into()));
        }
        if hello
            .extensions
            .renegotiation_info
            .as_ref()
            .is_some_and(|info| !info.is_empty())
        {
            return Err(Error::HandshakeFailure("renegotiation_info not empty".into()));
        }

        let params = negotiate(&Negotiation {
            local: config.cipher_suites(),
            peer: &[hello.cipher_suite],
            side: Side::Client,
            use_client_order: true,
            version,
            capabilities: self.client_capabilities(),
        })?;

        self.hs.version = Some(version);
        self.layer.set_version(version);
        self.hs.params = Some(params);
        self.hs.server_random = hello.random.0;
        self.hs.ems = config.extended_master_secret() && hello.extensions.extended_master_secret;
        self.hs.issue_ticket =
            self.hs.offered_ticket.is_some() && hello.extensions.session_ticket.is_some();

        let server_id = hello.session_id.as_slice();
        let resumed = self
            .session
            .as_ref()
            .filter(|_| !self.hs.session_id.is_empty() && server_id == self.hs.session_id)
            .cloned();

        match resumed {
            Some(session) => {
                if session.cipher_suite != params.suite || session.version != version {
                    return Err(Error::HandshakeFailure(
                        "resumed session parameters differ".into(),
                    ));
                }
                if session.extended_master_secret != self.hs.ems {
                    return Err(Error::HandshakeFailure(
                        "extended master secret mismatch on resumption".into(),
                    ));
                }
                debug!("Resuming session, {} {:?}", version, params.suite);
                self.hs.resuming = true;
                self.hs.master_secret = Some(session.master_secret.clone());
                self.derive_keys()?;
            }
            None => {
                debug!("Negotiated {} {:?}", version, params.suite);
                self.hs.session_id = server_id.to_vec();
                self.hs.kx = Some(KeyExchange::new(params.kx));
            }
        }
        Ok(())
    }

    fn on_server_certificate(&mut self, msg: &Message) -> Result<(), Error> {
        let config = Arc::clone(&self.config);
        let (params, _) = self.negotiated()?;
        let certificate = parse_complete(&msg.body, "Certificate", Certificate::parse)?;
        let Some(leaf) = certificate.chain.first() else {
            return Err(Error::CertificateError("server sent no certificate".into()));
        };

        let spki = config
            .cert_verifier()
            .verify_chain(&certificate.chain)
            .map_err(Error::CertificateError)?;
        check_peer_key(
            config.crypto_provider(),
            &config,
            &spki,
            params.auth.key_type(),
        )?;

        self.events
            .push_back(LocalEvent::PeerCertificate(leaf.clone()));
        self.hs.peer_spki = Some(spki);
        Ok(())
    }

    fn on_server_key_exchange(&mut self, msg: &Message) -> Result<Async<()>, Error> {
        let config = Arc::clone(&self.config);
        let (params, version) = self.negotiated()?;
        let randoms = (self.hs.client_random, self.hs.server_random);
        let ctx = kx_context(&config, params, version, &randoms);

        let mut op = match self.hs.op.take() {
            Some(HsOp::RecvServerKx(op)) => op,
            _ => AsyncOp::new(RecvServerKx::new(&msg.body)),
        };
        let kx = self
            .hs
            .kx
            .as_mut()
            .ok_or(Error::InternalError("no key exchange"))?;

        let result = RecvServerKx::poll(&mut op, &ctx, kx, self.hs.peer_spki.as_deref())?;
        if result.is_pending() {
            self.hs.op = Some(HsOp::RecvServerKx(op));
        }
        Ok(result)
    }

    fn on_certificate_request(&mut self, msg: &Message) -> Result<(), Error> {
        let (params, version) = self.negotiated()?;
        if params.auth == Authentication::Psk {
            return Err(Error::UnexpectedMessage(
                "CertificateRequest on a PSK suite".into(),
            ));
        }
        let tls12 = version.is_tls12_family();
        let request = parse_complete(&msg.body, "CertificateRequest", |i| {
            CertificateRequest::parse(i, tls12)
        })?;
        debug!("Server requests a certificate");
        self.hs.cert_request = Some(request);
        Ok(())
    }

    /// Our chain if the request accepts the identity's key type.
    fn client_chain(&mut self) -> Vec<Vec<u8>> {
        let (Some(request), Some(identity)) = (&self.hs.cert_request, &self.identity) else {
            return Vec::new();
        };
        let alg = identity.key.algorithm();
        let type_ok = alg
            .certificate_type()
            .is_some_and(|t| request.certificate_types.contains(&t));
        let scheme_ok = match &request.signature_schemes {
            Some(list) => list
                .iter()
                .any(|s| s.signature_algorithm() == alg && identity.key.schemes().contains(s)),
            None => true,
        };
        if type_ok && scheme_ok {
            self.hs.send_client_cert = true;
            identity.chain.clone()
        } else {
            debug!("No client certificate matches the request");
            Vec::new()
        }
    }

    /// The client's second flight: Certificate, ClientKeyExchange,
    /// CertificateVerify, ChangeCipherSpec, Finished.
    fn on_server_hello_done(&mut self, msg: &Message) -> Result<Async<()>, Error> {
        if self.hs.step == Step::Start {
            if !msg.body.is_empty() {
                return Err(Error::decode("ServerHelloDone with a body"));
            }
            if self.layer.is_dtls() {
                self.flight.begin(5);
            }
            if self.hs.cert_request.is_some() {
                let chain = self.client_chain();
                let mut body = Buf::new();
                Certificate { chain }.serialize(&mut body);
                self.queue_handshake(HandshakeType::Certificate, &body)?;
            }
            self.hs.step = Step::KeyExchange;
        }

        if self.hs.step == Step::KeyExchange {
            let config = Arc::clone(&self.config);
            let (params, version) = self.negotiated()?;
            let randoms = (self.hs.client_random, self.hs.server_random);
            let ctx = kx_context(&config, params, version, &randoms);

            let mut op = match self.hs.op.take() {
                Some(HsOp::SendClientKx(op)) => op,
                _ => AsyncOp::new(SendClientKx::new(self.hs.client_version)),
            };
            let kx = self
                .hs
                .kx
                .as_mut()
                .ok_or(Error::InternalError("no key exchange"))?;

            let mut body = Buf::new();
            let pre_master_secret = match SendClientKx::poll(
                &mut op,
                &ctx,
                kx,
                self.hs.peer_spki.as_deref(),
                &mut body,
            )? {
                Async::Ready(pms) => pms,
                Async::Pending => {
                    self.hs.op = Some(HsOp::SendClientKx(op));
                    return Ok(Async::Pending);
                }
            };
            self.queue_handshake(HandshakeType::ClientKeyExchange, &body)?;
            self.compute_master_secret(&pre_master_secret)?;
            self.derive_keys()?;
            self.hs.step = Step::CertVerify;
        }

        if self.hs.step == Step::CertVerify {
            if self.hs.send_client_cert {
                let (_, version) = self.negotiated()?;
                let identity = self
                    .identity
                    .as_mut()
                    .ok_or(Error::NoPrivateKey("client certificate key"))?;

                let mut op = match self.hs.op.take() {
                    Some(HsOp::SendCertVerify(op)) => op,
                    _ => {
                        let supported: Vec<SignatureScheme> = self
                            .config
                            .signature_schemes()
                            .iter()
                            .filter(|s| identity.key.schemes().contains(s))
                            .copied()
                            .collect();
                        let peer = self
                            .hs
                            .cert_request
                            .as_ref()
                            .and_then(|r| r.signature_schemes.as_deref());
                        let scheme = select_signature_scheme(
                            version,
                            identity.key.algorithm(),
                            peer,
                            &supported,
                        )?;
                        AsyncOp::new(SendCertVerify::new(scheme))
                    }
                };

                let mut body = Buf::new();
                let result =
                    SendCertVerify::poll(&mut op, &self.hs.transcript, &mut identity.key, &mut body)?;
                if result.is_pending() {
                    self.hs.op = Some(HsOp::SendCertVerify(op));
                    return Ok(Async::Pending);
                }
                self.queue_handshake(HandshakeType::CertificateVerify, &body)?;
            }
            self.hs.step = Step::Finish;
        }

        if self.hs.step == Step::Finish {
            self.send_ccs_and_finished()?;
            self.hs.step = Step::Done;
        }

        Ok(Async::Ready(()))
    }

    fn on_new_session_ticket(&mut self, msg: &Message) -> Result<(), Error> {
        if !self.hs.issue_ticket {
            return Err(Error::UnexpectedMessage(
                "NewSessionTicket without session_ticket extension".into(),
            ));
        }
        let nst = parse_complete(&msg.body, "NewSessionTicket", NewSessionTicket::parse)?;
        debug!(
            "Session ticket of {} bytes, lifetime hint {}s",
            nst.ticket.len(),
            nst.lifetime_hint
        );
        self.hs.ticket = (!nst.ticket.is_empty()).then_some(nst.ticket);
        Ok(())
    }

    fn on_server_finished(&mut self, msg: &Message) -> Result<(), Error> {
        self.receive_finished(msg)?;
        let dtls = self.layer.is_dtls();

        if self.hs.resuming {
            if dtls {
                self.flight.begin(5);
            }
            self.send_ccs_and_finished()?;
            if dtls {
                self.flight.stop_timers();
            }
        } else if dtls {
            self.flight.complete();
        }

        self.complete_handshake()
    }
}
