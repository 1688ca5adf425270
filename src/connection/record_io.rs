//! Records in and out.
//!
//! Outgoing messages become [`MessageBuilder`]s, drained in order into the
//! record layer's packet queue. Incoming bytes are cut into records,
//! classified by epoch (DTLS), opened and dispatched by content type.
//! DTLS silently drops what a stream transport would treat as fatal.

use std::fmt;

use super::{Connection, State};
use crate::buffer::Buf;
use crate::builder::MessageBuilder;
use crate::codec::{HandshakeHeader, RecordHeader};
use crate::crypto::{Async, HmacProvider};
use crate::dtls::reassembly::Stored;
use crate::message::parse_complete;
use crate::order::{self, Arrival};
use crate::record::{validate_header, HeldRecord, OpenParams, Protection, ReadKeys, VersionPolicy};
use crate::sequence::EpochVerdict;
use crate::types::{Alert, AlertDescription, AlertLevel, ContentType, HandshakeType};
use crate::{Error, Side};

/// Slack for block cipher padding when sizing DTLS fragments.
const PADDING_SLACK: usize = 16;

/// An incoming record on its way from the wire to its consumer.
pub(super) struct RxRecord {
    header: RecordHeader,
    payload: Buf,
    keys: ReadKeys,
    /// Set once the decryption step has started.
    params: Option<OpenParams>,
    /// DTLS epoch and replay check done.
    classified: bool,
}

impl RxRecord {
    fn new(header: RecordHeader, payload: Buf) -> Self {
        RxRecord {
            header,
            payload,
            keys: ReadKeys::Current,
            params: None,
            classified: false,
        }
    }
}

impl fmt::Debug for RxRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RxRecord")
            .field("content_type", &self.header.content_type)
            .field("epoch", &self.header.epoch)
            .field("sequence", &self.header.sequence)
            .field("len", &self.payload.len())
            .field("opening", &self.params.is_some())
            .finish()
    }
}

impl Connection {
    /// Queue a handshake message. TLS splits the message over records of
    /// at most the maximum fragment size. DTLS fragments it to fit the
    /// MTU and saves every fragment for retransmission.
    pub(super) fn queue_handshake(
        &mut self,
        msg_type: HandshakeType,
        body: &[u8],
    ) -> Result<(), Error> {
        let hashed = !matches!(
            msg_type,
            HandshakeType::HelloRequest | HandshakeType::HelloVerifyRequest
        );
        let generation = self.layer.write_generation();
        let length = body.len() as u32;
        trace!("Queue {:?} len {}", msg_type, body.len());

        if !self.layer.is_dtls() {
            let mut message = Buf::new();
            HandshakeHeader::whole(msg_type, length, 0).serialize(false, &mut message);
            message.extend_from_slice(body);
            let max = self.layer.max_fragment();
            for (i, chunk) in message.chunks(max).enumerate() {
                let transcript = if hashed && i == 0 {
                    Some((&mut self.hs.transcript, &message[..]))
                } else {
                    None
                };
                let builder = MessageBuilder::new(
                    &mut self.layer,
                    ContentType::Handshake,
                    generation,
                    chunk,
                    transcript,
                )?;
                self.outbound.push_back(builder);
            }
            return Ok(());
        }

        let seq = self.hs.next_send_seq;
        self.hs.next_send_seq = seq.wrapping_add(1);

        let mut whole = Buf::new();
        if hashed {
            HandshakeHeader::whole(msg_type, length, seq).serialize(true, &mut whole);
            whole.extend_from_slice(body);
        }

        let overhead = self.layer.record_overhead(0) + PADDING_SLACK;
        let room = self
            .layer
            .max_fragment()
            .min(self.layer.mtu().saturating_sub(overhead));
        let chunk_len = room.saturating_sub(HandshakeHeader::len(true)).max(1);

        let mut offset = 0;
        loop {
            let end = (offset + chunk_len).min(body.len());
            let mut fragment = Buf::new();
            HandshakeHeader {
                msg_type,
                length,
                message_seq: seq,
                fragment_offset: offset as u32,
                fragment_length: (end - offset) as u32,
            }
            .serialize(true, &mut fragment);
            fragment.extend_from_slice(&body[offset..end]);

            let transcript = if hashed && offset == 0 {
                Some((&mut self.hs.transcript, &whole[..]))
            } else {
                None
            };
            let builder = MessageBuilder::new(
                &mut self.layer,
                ContentType::Handshake,
                generation,
                &fragment,
                transcript,
            )?;
            self.outbound.push_back(builder);
            self.flight
                .save(ContentType::Handshake, generation, &fragment);

            offset = end;
            if offset >= body.len() {
                break;
            }
        }
        Ok(())
    }

    /// Queue one record under the current write keys.
    pub(super) fn queue_record(
        &mut self,
        content_type: ContentType,
        payload: &[u8],
    ) -> Result<(), Error> {
        let generation = self.layer.write_generation();
        let builder = MessageBuilder::new(&mut self.layer, content_type, generation, payload, None)?;
        self.outbound.push_back(builder);
        if self.layer.is_dtls() && content_type == ContentType::ChangeCipherSpec {
            self.flight.save(content_type, generation, payload);
        }
        Ok(())
    }

    pub(super) fn queue_alert(&mut self, alert: Alert) -> Result<(), Error> {
        debug!("Sending alert {:?} {:?}", alert.level, alert.description);
        let mut body = Buf::new();
        alert.serialize(&mut body);
        self.queue_record(ContentType::Alert, &body)
    }

    pub(super) fn queue_application_data(&mut self, data: &[u8]) -> Result<(), Error> {
        let max = self.layer.max_fragment();
        for chunk in data.chunks(max) {
            self.queue_record(ContentType::ApplicationData, chunk)?;
        }
        Ok(())
    }

    /// Queue the saved flight again with fresh sequence numbers.
    pub(super) fn resend_flight(&mut self) -> Result<(), Error> {
        debug!("Resending flight of {} records", self.flight.saved().len());
        for entry in self.flight.saved() {
            let builder = MessageBuilder::new(
                &mut self.layer,
                entry.content_type,
                entry.generation,
                &entry.fragment,
                None,
            )?;
            self.outbound.push_back(builder);
        }
        Ok(())
    }

    /// Seal queued records in order. Stops at the first one that pends.
    pub(super) fn drive_outbound(&mut self) -> Result<Async<()>, Error> {
        while let Some(builder) = self.outbound.front_mut() {
            if builder.poll(&mut self.layer)?.is_pending() {
                return Ok(Async::Pending);
            }
            self.outbound.pop_front();
        }
        Ok(Async::Ready(()))
    }

    fn version_policy(&self, epoch: u16) -> VersionPolicy {
        let negotiated = if self.layer.is_dtls() && epoch == 0 {
            // Hellos and their retransmissions may carry the initial
            // record version.
            None
        } else {
            self.hs.version
        };
        VersionPolicy {
            negotiated,
            max: self.config.max_version(),
            min: self.config.min_version(),
            allow_downgrade: self.config.allow_downgrade(),
        }
    }

    /// Cut the next record from the input. Held DTLS records of the
    /// current read epoch come first.
    pub(super) fn next_record(&mut self) -> Result<Option<RxRecord>, Error> {
        let dtls = self.layer.is_dtls();

        if dtls {
            let epoch = self.layer.seq.read_epoch();
            let held = self.queue_rx.iter().position(|r| r.header.epoch == epoch);
            if let Some(held) = held.and_then(|i| self.queue_rx.remove(i)) {
                trace!("Replaying held record seq {}", held.header.sequence);
                return Ok(Some(RxRecord::new(held.header, held.payload)));
            }
        }

        loop {
            if self.input.is_empty() {
                return Ok(None);
            }

            let header = match RecordHeader::decode(&self.input, dtls) {
                Ok(h) => h,
                Err(Error::IncompleteData) if !dtls => return Ok(None),
                Err(e) if dtls => {
                    debug!("Dropping rest of datagram: {}", e);
                    self.input.clear();
                    return Ok(None);
                }
                Err(e) => return Err(e),
            };
            let total = RecordHeader::len(dtls) + header.length as usize;

            let encrypted = if dtls {
                header.epoch > 0
            } else {
                self.layer.read_encrypted()
            };
            let policy = self.version_policy(header.epoch);
            if let Err(e) = validate_header(&header, &policy, self.layer.max_fragment(), encrypted)
            {
                if !dtls {
                    return Err(e);
                }
                debug!("Dropping record: {}", e);
                let skip = total.min(self.input.len());
                self.input.consume_front(skip);
                continue;
            }

            if self.input.len() < total {
                if dtls {
                    debug!("Dropping truncated record");
                    self.input.clear();
                }
                return Ok(None);
            }

            let mut payload = self.layer.buffer();
            payload.extend_from_slice(&self.input[RecordHeader::len(dtls)..total]);
            self.input.consume_front(total);
            return Ok(Some(RxRecord::new(header, payload)));
        }
    }

    /// Open and dispatch the record in [`Connection::rx`], resuming a
    /// decryption that pended.
    pub(super) fn process_record(&mut self) -> Result<Async<()>, Error> {
        let Some(mut rec) = self.rx.take() else {
            return Ok(Async::Ready(()));
        };
        match self.open_record(&mut rec)? {
            Async::Pending => {
                self.rx = Some(rec);
                return Ok(Async::Pending);
            }
            Async::Ready(true) => self.dispatch(rec)?,
            Async::Ready(false) => self.layer.recycle(rec.payload),
        }
        Ok(Async::Ready(()))
    }

    /// Classify, decrypt and authenticate. `Ready(false)` means the record
    /// was dropped or held back.
    fn open_record(&mut self, rec: &mut RxRecord) -> Result<Async<bool>, Error> {
        let dtls = self.layer.is_dtls();

        if dtls && !rec.classified {
            let (epoch, sequence) = (rec.header.epoch, rec.header.sequence);
            match self.layer.seq.check_dtls(epoch, sequence) {
                EpochVerdict::Current => rec.keys = ReadKeys::Current,
                EpochVerdict::Previous => rec.keys = ReadKeys::Previous,
                EpochVerdict::Next => {
                    self.hold_record(rec);
                    return Ok(Async::Ready(false));
                }
                EpochVerdict::Drop => {
                    debug!("Dropping replayed or stale record {}:{}", epoch, sequence);
                    return Ok(Async::Ready(false));
                }
            }
            rec.classified = true;
        }

        let seq = rec.header.mac_sequence(dtls, self.layer.seq.rx());
        let hmac = self.layer.hmac_provider();
        if let Some(protection) = self.layer.read_protection(rec.keys) {
            match unprotect(protection, hmac, rec, seq) {
                Ok(Async::Ready(())) => {}
                Ok(Async::Pending) => return Ok(Async::Pending),
                Err(e) if dtls => {
                    debug!(
                        "Dropping record {}:{} that failed to open: {}",
                        rec.header.epoch, rec.header.sequence, e
                    );
                    return Ok(Async::Ready(false));
                }
                Err(e) => return Err(e),
            }
            if rec.payload.len() > self.layer.max_fragment() {
                return Err(Error::RecordOverflow(rec.payload.len()));
            }
        }

        if dtls {
            self.layer
                .seq
                .accept_dtls(rec.header.epoch, rec.header.sequence);
        } else {
            self.layer.seq.advance_rx()?;
        }
        Ok(Async::Ready(true))
    }

    fn hold_record(&mut self, rec: &mut RxRecord) {
        if self.queue_rx.len() >= self.config.max_queue_rx() {
            debug!("Receive queue full, dropping next epoch record");
            return;
        }
        trace!("Holding next epoch record seq {}", rec.header.sequence);
        self.queue_rx.push_back(HeldRecord {
            header: rec.header,
            payload: std::mem::take(&mut rec.payload),
        });
    }

    /// Hand an opened record to its consumer.
    fn dispatch(&mut self, rec: RxRecord) -> Result<(), Error> {
        let content_type = rec.header.content_type;
        trace!(
            "Record {:?} {}:{} len {}",
            content_type,
            rec.header.epoch,
            rec.header.sequence,
            rec.payload.len()
        );

        if rec.keys == ReadKeys::Previous
            && !matches!(
                content_type,
                ContentType::Handshake | ContentType::ChangeCipherSpec
            )
        {
            debug!("Dropping {:?} from previous epoch", content_type);
            self.layer.recycle(rec.payload);
            return Ok(());
        }

        let result = match content_type {
            ContentType::Handshake => self.receive_handshake(&rec.payload),
            ContentType::ChangeCipherSpec => self.receive_change_cipher_spec(&rec.payload),
            ContentType::Alert => self.receive_alert(&rec.payload),
            ContentType::ApplicationData => {
                return self.receive_application_data(rec);
            }
            ContentType::Unknown(v) => Err(Error::UnknownRecordType(v)),
        };
        self.layer.recycle(rec.payload);
        result
    }

    fn receive_handshake(&mut self, payload: &[u8]) -> Result<(), Error> {
        if !self.layer.is_dtls() {
            self.hs.tls_buffer.extend_from_slice(payload);
            return Ok(());
        }

        let mut input = payload;
        while !input.is_empty() {
            let (rest, header) = HandshakeHeader::parse_dtls(input)?;
            let len = header.fragment_length as usize;
            if rest.len() < len {
                return Err(Error::decode("handshake fragment truncated"));
            }
            let (fragment, rest) = rest.split_at(len);
            input = rest;

            if let Stored::Processed {
                message_seq,
                first: true,
            } = self.hs.reassembly.store(&header, fragment)?
            {
                trace!("Peer repeated message {}", message_seq);
                self.resend_due = true;
            }
        }
        Ok(())
    }

    fn receive_change_cipher_spec(&mut self, payload: &[u8]) -> Result<(), Error> {
        let dtls = self.layer.is_dtls();
        if payload != [1] {
            return Err(Error::decode("ChangeCipherSpec body"));
        }
        if !dtls && !self.hs.tls_buffer.is_empty() {
            return Err(Error::UnexpectedRecord(ContentType::ChangeCipherSpec));
        }

        if let Err(e) = order::check(
            Arrival::ChangeCipherSpec,
            &self.hs.ledger,
            &self.order_context(),
        ) {
            if e.is_fatal() {
                return Err(e.into());
            }
            debug!("Dropping ChangeCipherSpec: {:?}", e);
            return Ok(());
        }

        let verify_missing = self.side == Side::Server
            && self.hs.peer_spki.is_some()
            && !self.hs.ledger.seen(HandshakeType::CertificateVerify);
        if verify_missing {
            if dtls {
                debug!("Dropping ChangeCipherSpec before CertificateVerify");
                return Ok(());
            }
            return Err(Error::OutOfOrder(HandshakeType::CertificateVerify));
        }

        self.layer.activate_read()?;
        self.hs.ledger.mark(Arrival::ChangeCipherSpec);
        Ok(())
    }

    fn receive_alert(&mut self, payload: &[u8]) -> Result<(), Error> {
        let alert = parse_complete(payload, "Alert", Alert::parse)?;
        match (alert.level, alert.description) {
            (_, AlertDescription::CloseNotify) => {
                debug!("Peer sent close_notify");
                if self.state != State::Closed {
                    self.queue_alert(Alert::warning(AlertDescription::CloseNotify))?;
                }
                Err(Error::AlertReceived(AlertDescription::CloseNotify))
            }
            (AlertLevel::Fatal, description) => {
                debug!("Fatal alert from peer: {:?}", description);
                Err(Error::AlertReceived(description))
            }
            (level, description) => {
                debug!("Alert from peer: {:?} {:?}", level, description);
                Ok(())
            }
        }
    }

    fn receive_application_data(&mut self, rec: RxRecord) -> Result<(), Error> {
        let protected = rec.keys == ReadKeys::Current && self.layer.read_encrypted();
        if self.state != State::Connected || !protected {
            self.layer.recycle(rec.payload);
            if self.layer.is_dtls() {
                debug!("Dropping application data outside the connected state");
                return Ok(());
            }
            return Err(Error::UnexpectedRecord(ContentType::ApplicationData));
        }
        if !rec.payload.is_empty() {
            self.app_data.push_back(rec.payload);
        }
        Ok(())
    }
}

/// Decrypt and verify in place. Resumes a decryption that pended.
fn unprotect(
    protection: &mut Protection,
    hmac: &dyn HmacProvider,
    rec: &mut RxRecord,
    seq: [u8; 8],
) -> Result<Async<()>, Error> {
    let params = match rec.params.take() {
        Some(p) => p,
        None => protection.prepare_open(&rec.header, seq, &mut rec.payload)?,
    };
    if protection.open(&params, &mut rec.payload)?.is_pending() {
        rec.params = Some(params);
        return Ok(Async::Pending);
    }
    protection.verify(hmac, &params, &mut rec.payload).map(Async::Ready)
}
