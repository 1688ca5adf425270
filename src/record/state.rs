//! Per connection record layer state.
//!
//! Holds the protections of both directions, the sequence numbers and the
//! outgoing packet queue. Write protections are tagged with a generation:
//! the DTLS epoch, or for TLS a counter bumped on every key change. The
//! previous generation survives one key change so records queued before
//! a ChangeCipherSpec, and DTLS retransmissions, still seal correctly.

use std::sync::Arc;

use super::queue::QueueTx;
use super::{mac_header, Protection, CIPHERTEXT_EXPANSION};
use crate::buffer::{Buf, BufferPool};
use crate::builder::MacHook;
use crate::codec::RecordHeader;
use crate::config::Config;
use crate::crypto::{Async, CryptoProvider};
use crate::sequence::SequenceState;
use crate::types::{ContentType, ProtocolVersion};
use crate::{Error, Side};

#[derive(Debug)]
struct WriteState {
    generation: u16,
    /// `None` until the first ChangeCipherSpec.
    protection: Option<Protection>,
}

/// Where an incoming record's keys come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadKeys {
    Current,
    /// DTLS previous epoch.
    Previous,
}

#[derive(Debug)]
pub(crate) struct RecordLayer {
    dtls: bool,
    side: Side,
    pub seq: SequenceState,
    /// Version written in record headers.
    version: ProtocolVersion,
    write: WriteState,
    prev_write: Option<WriteState>,
    read: Option<Protection>,
    prev_read: Option<Protection>,
    /// Read keys derived but not yet switched to by a ChangeCipherSpec.
    pending_read: Option<Protection>,
    max_fragment: usize,
    mtu: usize,
    max_queue_tx: usize,
    queue_tx: QueueTx,
    buffers: BufferPool,
    provider: CryptoProvider,
    mac_hook: Option<Arc<dyn MacHook>>,
}

impl RecordLayer {
    pub fn new(config: &Config, side: Side) -> Self {
        let dtls = config.is_datagram();
        RecordLayer {
            dtls,
            side,
            seq: SequenceState::new(dtls, config.replay_window()),
            version: config.max_version().hello_record_version(),
            write: WriteState {
                generation: 0,
                protection: None,
            },
            prev_write: None,
            read: None,
            prev_read: None,
            pending_read: None,
            max_fragment: config.max_fragment_len(),
            mtu: config.mtu(),
            max_queue_tx: config.max_queue_tx(),
            queue_tx: QueueTx::new(),
            buffers: BufferPool::default(),
            provider: config.crypto_provider().clone(),
            mac_hook: config.mac_hook().cloned(),
        }
    }

    pub fn is_dtls(&self) -> bool {
        self.dtls
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn provider(&self) -> &CryptoProvider {
        &self.provider
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Version for outgoing record headers. Set to the negotiated version
    /// once the hellos are exchanged.
    pub fn set_version(&mut self, version: ProtocolVersion) {
        self.version = version;
    }

    pub fn max_fragment(&self) -> usize {
        self.max_fragment
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    pub fn write_generation(&self) -> u16 {
        self.write.generation
    }

    /// Switch the write direction to new keys. Records queued from now on
    /// use them.
    pub fn install_write(&mut self, protection: Protection) -> Result<(), Error> {
        self.seq.change_write()?;
        let generation = self
            .write
            .generation
            .checked_add(1)
            .ok_or(Error::WrappedEpoch)?;
        let old = std::mem::replace(
            &mut self.write,
            WriteState {
                generation,
                protection: Some(protection),
            },
        );
        debug!("Write keys changed, generation {}", generation);
        self.prev_write = Some(old);
        Ok(())
    }

    pub fn set_pending_read(&mut self, protection: Protection) {
        self.pending_read = Some(protection);
    }

    pub fn has_pending_read(&self) -> bool {
        self.pending_read.is_some()
    }

    /// Switch the read direction to the pending keys, on ChangeCipherSpec.
    pub fn activate_read(&mut self) -> Result<(), Error> {
        let next = self.pending_read.take().ok_or_else(|| {
            Error::UnexpectedMessage("ChangeCipherSpec before key exchange".into())
        })?;
        self.seq.change_read()?;
        self.prev_read = self.read.replace(next);
        debug!("Read keys changed, epoch {}", self.seq.read_epoch());
        Ok(())
    }

    /// Whether records of the current read epoch are protected.
    pub fn read_encrypted(&self) -> bool {
        self.read.is_some()
    }

    pub fn read_protection(&mut self, keys: ReadKeys) -> Option<&mut Protection> {
        match keys {
            ReadKeys::Current => self.read.as_mut(),
            ReadKeys::Previous => self.prev_read.as_mut(),
        }
    }

    pub fn hmac_provider(&self) -> &'static dyn crate::crypto::HmacProvider {
        self.provider.hmac_provider
    }

    fn write_state(&mut self, generation: u16) -> Result<&mut WriteState, Error> {
        if self.write.generation == generation {
            return Ok(&mut self.write);
        }
        match &mut self.prev_write {
            Some(w) if w.generation == generation => Ok(w),
            _ => Err(Error::InternalError("no write keys for generation")),
        }
    }

    fn protection(&mut self, generation: u16) -> Result<Option<&mut Protection>, Error> {
        Ok(self.write_state(generation)?.protection.as_mut())
    }

    /// Wire overhead of one record of `len` plaintext bytes in the current
    /// generation.
    pub fn record_overhead(&self, len: usize) -> usize {
        let sealed = match &self.write.protection {
            Some(p) => p.sealed_len(len),
            None => len,
        };
        RecordHeader::len(self.dtls) + sealed - len
    }

    /// Header for the next record in `generation`. Consumes a sequence
    /// number.
    pub fn next_header(
        &mut self,
        content_type: ContentType,
        generation: u16,
        length: usize,
    ) -> Result<(RecordHeader, [u8; 8]), Error> {
        // Fail before consuming a sequence number.
        self.write_state(generation)?;
        let seq = if self.dtls {
            self.seq.next_tx_for_epoch(generation)?
        } else if generation == self.write.generation {
            self.seq.next_tx()?
        } else {
            return Err(Error::InternalError("TLS record for old keys"));
        };
        let header = RecordHeader {
            content_type,
            version: self.version,
            epoch: if self.dtls { generation } else { 0 },
            sequence: seq,
            length: length as u16,
        };
        let mac_seq = header.mac_sequence(self.dtls, seq);
        Ok((header, mac_seq))
    }

    /// What a record of `generation` needs before sealing.
    pub fn write_shape(&mut self, generation: u16) -> Result<WriteShape, Error> {
        Ok(match self.protection(generation)? {
            None => WriteShape::Plain,
            Some(p) => WriteShape::Protected {
                mac: p.mac().is_some(),
                block: p.is_block(),
                explicit_iv: p.explicit_iv(),
                aead: matches!(p, Protection::Aead { .. }),
            },
        })
    }

    /// Append the record MAC to `payload`. Nothing is appended while the
    /// MAC hook pends.
    pub fn append_mac(
        &mut self,
        header: &RecordHeader,
        generation: u16,
        mac_seq: &[u8; 8],
        payload: &mut Buf,
    ) -> Result<Async<()>, Error> {
        let hmac = self.provider.hmac_provider;
        let hook = self.mac_hook.clone();
        let Some(p) = self.protection(generation)? else {
            return Ok(Async::Ready(()));
        };
        let Some((alg, key)) = p.mac() else {
            return Ok(Async::Ready(()));
        };
        let pseudo = mac_header(mac_seq, header.content_type, header.version, payload.len());
        let mut tag = Buf::new();
        match hook {
            Some(hook) => match hook
                .mac(alg, key, &[&pseudo[..], &payload[..]], &mut tag)
                .map_err(Error::CryptoError)?
            {
                Async::Ready(()) => {}
                Async::Pending => return Ok(Async::Pending),
            },
            None => hmac
                .hmac(alg, key, &[&pseudo[..], &payload[..]], &mut tag)
                .map_err(Error::CryptoError)?,
        }
        payload.extend_from_slice(&tag);
        Ok(Async::Ready(()))
    }

    pub fn seal(
        &mut self,
        header: &RecordHeader,
        generation: u16,
        mac_seq: &[u8; 8],
        explicit: &[u8; 16],
        payload: &mut Buf,
    ) -> Result<Async<()>, Error> {
        match self.protection(generation)? {
            Some(p) => p.seal(mac_seq, header.content_type, header.version, explicit, payload),
            None => Ok(Async::Ready(())),
        }
    }

    /// Queue one finished record for transmission.
    ///
    /// DTLS packs records into datagrams up to the MTU. TLS packs whole
    /// records into packets up to the largest record size.
    pub fn push_record(
        &mut self,
        header: &RecordHeader,
        prefix: &[u8],
        body: &[u8],
    ) -> Result<(), Error> {
        let len = RecordHeader::len(self.dtls) + prefix.len() + body.len();
        let limit = if self.dtls {
            self.mtu
        } else {
            RecordHeader::TLS_LEN + self.max_fragment + CIPHERTEXT_EXPANSION
        };

        let fits = self
            .queue_tx
            .back()
            .map(|last| last.len() + len <= limit)
            .unwrap_or(false);

        if !fits {
            if self.queue_tx.len() >= self.max_queue_tx {
                warn!(
                    "Transmit queue full (max {}): {:?}",
                    self.max_queue_tx, self.queue_tx
                );
                return Err(Error::TransmitQueueFull);
            }
            let buf = self.buffers.pop();
            self.queue_tx.push_back(buf);
        }

        let out = self
            .queue_tx
            .back_mut()
            .ok_or(Error::InternalError("no packet"))?;
        let mut header = *header;
        header.length = (prefix.len() + body.len()) as u16;
        header.serialize(self.dtls, out);
        out.extend_from_slice(prefix);
        out.extend_from_slice(body);

        trace!(
            "Queued record {:?} epoch {} seq {} len {}",
            header.content_type,
            header.epoch,
            header.sequence,
            header.length
        );
        Ok(())
    }

    pub fn pop_packet(&mut self) -> Option<Buf> {
        self.queue_tx.pop_front()
    }

    pub fn has_packets(&self) -> bool {
        !self.queue_tx.is_empty()
    }

    pub fn recycle(&mut self, buf: Buf) {
        self.buffers.push(buf);
    }

    pub fn buffer(&mut self) -> Buf {
        self.buffers.pop()
    }
}

/// Protection steps a record goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteShape {
    Plain,
    Protected {
        mac: bool,
        block: bool,
        explicit_iv: bool,
        aead: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(dtls: bool, mtu: usize, max_queue_tx: usize) -> RecordLayer {
        let mut b = Config::builder().mtu(mtu).max_queue_tx(max_queue_tx);
        if dtls {
            b = b.dtls();
        }
        RecordLayer::new(&b.build().unwrap(), Side::Client)
    }

    #[test]
    fn datagrams_pack_up_to_mtu() {
        let mut l = layer(true, 300, 4);
        for _ in 0..3 {
            let (h, _) = l.next_header(ContentType::Handshake, 0, 100).unwrap();
            l.push_record(&h, &[], &[0; 100]).unwrap();
        }
        // 113 + 113 fits, the third does not.
        assert_eq!(l.pop_packet().unwrap().len(), 226);
        assert_eq!(l.pop_packet().unwrap().len(), 113);
        assert!(l.pop_packet().is_none());
    }

    #[test]
    fn full_queue_is_an_error() {
        let mut l = layer(true, 300, 1);
        let (h, _) = l.next_header(ContentType::Handshake, 0, 250).unwrap();
        l.push_record(&h, &[], &[0; 250]).unwrap();
        let (h, _) = l.next_header(ContentType::Handshake, 0, 250).unwrap();
        assert!(matches!(
            l.push_record(&h, &[], &[0; 250]),
            Err(Error::TransmitQueueFull)
        ));
    }

    #[test]
    fn sequence_numbers_follow_generation() {
        let mut l = layer(true, 1150, 4);
        let (h0, mac0) = l.next_header(ContentType::Handshake, 0, 1).unwrap();
        let (h1, _) = l.next_header(ContentType::Handshake, 0, 1).unwrap();
        assert_eq!((h0.epoch, h0.sequence, h1.sequence), (0, 0, 1));
        assert_eq!(mac0, [0; 8]);
        assert!(l.next_header(ContentType::Handshake, 1, 1).is_err());
    }

    #[test]
    fn activating_read_without_keys_fails() {
        let mut l = layer(false, 1150, 4);
        assert!(!l.has_pending_read());
        assert!(matches!(
            l.activate_read(),
            Err(Error::UnexpectedMessage(_))
        ));
    }
}
