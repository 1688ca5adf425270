//! Outgoing record assembly.
//!
//! A [`MessageBuilder`] turns one plaintext fragment into one record. The
//! logical effects (sequence number, explicit IV, transcript update) happen
//! when the builder is created, in the order records are queued. Only the
//! MAC and the encryption can pend, and they run when the builder is
//! polled. Builders are polled strictly in creation order, which keeps
//! chained CBC IVs and packet order consistent.

use std::fmt;

use crate::buffer::Buf;
use crate::codec::RecordHeader;
use crate::crypto::{Async, Transcript};
use crate::record::{RecordLayer, WriteShape};
use crate::types::{ContentType, HashAlgorithm};
use crate::Error;

/// Computes record MACs in place of the provider's HMAC, for instance in
/// an offload engine. May pend like any other provider operation.
pub trait MacHook: Send + Sync + fmt::Debug {
    fn mac(
        &self,
        alg: HashAlgorithm,
        key: &[u8],
        data: &[&[u8]],
        out: &mut Buf,
    ) -> Result<Async<()>, String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum BuildStage {
    Begin,
    Hash,
    Mac,
    Encrypt,
    End,
}

pub(crate) struct MessageBuilder {
    stage: BuildStage,
    header: RecordHeader,
    generation: u16,
    mac_seq: [u8; 8],
    shape: WriteShape,
    explicit: [u8; 16],
    payload: Buf,
}

impl MessageBuilder {
    /// Start a record of `content_type` in write `generation`.
    ///
    /// `transcript` is updated with the given bytes. For TLS these are the
    /// handshake message itself; DTLS passes the whole message with a
    /// canonical header on its first fragment only.
    pub fn new(
        layer: &mut RecordLayer,
        content_type: ContentType,
        generation: u16,
        payload: &[u8],
        transcript: Option<(&mut Transcript, &[u8])>,
    ) -> Result<Self, Error> {
        // Begin
        if payload.len() > layer.max_fragment() {
            return Err(Error::RecordOverflow(payload.len()));
        }
        let shape = layer.write_shape(generation)?;
        let (header, mac_seq) = layer.next_header(content_type, generation, payload.len())?;

        let mut explicit = [0u8; 16];
        match shape {
            WriteShape::Protected {
                explicit_iv: true, ..
            } => layer.provider().random(&mut explicit)?,
            WriteShape::Protected { aead: true, .. } => explicit[..8].copy_from_slice(&mac_seq),
            _ => {}
        }

        let mut buf = layer.buffer();
        buf.reserve(payload.len() + 64);
        buf.extend_from_slice(payload);

        let mut builder = MessageBuilder {
            stage: BuildStage::Begin,
            header,
            generation,
            mac_seq,
            shape,
            explicit,
            payload: buf,
        };
        builder.stage = BuildStage::Hash;

        if let Some((t, bytes)) = transcript {
            t.update(bytes);
        }
        builder.stage = BuildStage::Mac;

        Ok(builder)
    }

    pub fn content_type(&self) -> ContentType {
        self.header.content_type
    }

    /// Run the deferred steps and queue the record. On `Pending` call
    /// again later; completed steps are not repeated.
    pub fn poll(&mut self, layer: &mut RecordLayer) -> Result<Async<()>, Error> {
        if self.stage == BuildStage::Mac {
            if let WriteShape::Protected { mac: true, block, .. } = self.shape {
                match layer.append_mac(
                    &self.header,
                    self.generation,
                    &self.mac_seq,
                    &mut self.payload,
                )? {
                    Async::Ready(()) => {}
                    Async::Pending => return Ok(Async::Pending),
                }
                if block {
                    crate::record::Protection::pad(&mut self.payload);
                }
            }
            self.stage = BuildStage::Encrypt;
        }

        if self.stage == BuildStage::Encrypt {
            match layer.seal(
                &self.header,
                self.generation,
                &self.mac_seq,
                &self.explicit,
                &mut self.payload,
            )? {
                Async::Ready(()) => {}
                Async::Pending => return Ok(Async::Pending),
            }
            let prefix: &[u8] = match self.shape {
                WriteShape::Protected { aead: true, .. } => &self.explicit[..8],
                WriteShape::Protected {
                    explicit_iv: true, ..
                } => &self.explicit[..],
                _ => &[],
            };
            layer.push_record(&self.header, prefix, &self.payload)?;
            self.stage = BuildStage::End;
            let payload = std::mem::take(&mut self.payload);
            layer.recycle(payload);
        }

        Ok(Async::Ready(()))
    }

    pub fn is_done(&self) -> bool {
        self.stage == BuildStage::End
    }
}

impl fmt::Debug for MessageBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBuilder")
            .field("stage", &self.stage)
            .field("content_type", &self.header.content_type)
            .field("generation", &self.generation)
            .field("sequence", &self.header.sequence)
            .field("len", &self.payload.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::config::Config;
    use crate::crypto::{CipherSpec, KeyMaterial};
    use crate::record::Protection;
    use crate::suite::CipherSuite;
    use crate::types::ProtocolVersion;
    use crate::Side;

    /// Pends every other call, then delegates to the default HMAC.
    #[derive(Debug, Default)]
    struct FlakyMac {
        calls: AtomicUsize,
    }

    impl MacHook for FlakyMac {
        fn mac(
            &self,
            alg: HashAlgorithm,
            key: &[u8],
            data: &[&[u8]],
            out: &mut Buf,
        ) -> Result<Async<()>, String> {
            if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                return Ok(Async::Pending);
            }
            let p = crate::crypto::rust_crypto::default_provider();
            p.hmac_provider.hmac(alg, key, data, out)?;
            Ok(Async::Ready(()))
        }
    }

    fn protection(config: &Config, side: Side, write: bool) -> Protection {
        let p = config.crypto_provider();
        let params = CipherSuite::RSA_WITH_AES_128_CBC_SHA256.params().unwrap();
        let version = ProtocolVersion::TLS1_2;
        let keys =
            KeyMaterial::derive(p.hmac_provider, params, version, &[3; 48], &[1; 32], &[2; 32])
                .unwrap();
        let spec = CipherSpec {
            params,
            version,
            keys,
        };
        Protection::new(p, &spec, side, write).unwrap()
    }

    #[test]
    fn plaintext_record_is_queued_as_is() {
        let _ = env_logger::try_init();
        let config = Config::default();
        let mut layer = RecordLayer::new(&config, Side::Client);
        let mut b =
            MessageBuilder::new(&mut layer, ContentType::Alert, 0, &[1, 0], None).unwrap();
        assert_eq!(b.poll(&mut layer).unwrap(), Async::Ready(()));
        assert!(b.is_done());
        let packet = layer.pop_packet().unwrap();
        assert_eq!(&packet[..], &[21, 3, 1, 0, 2, 1, 0]);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let config = Config::default();
        let mut layer = RecordLayer::new(&config, Side::Client);
        let big = vec![0; 16385];
        assert!(matches!(
            MessageBuilder::new(&mut layer, ContentType::ApplicationData, 0, &big, None),
            Err(Error::RecordOverflow(16385))
        ));
    }

    #[test]
    fn pending_mac_resumes_once() {
        let _ = env_logger::try_init();
        let hook = Arc::new(FlakyMac::default());
        let config = Config::builder().mac_hook(hook.clone()).build().unwrap();
        let mut layer = RecordLayer::new(&config, Side::Client);
        layer.set_version(ProtocolVersion::TLS1_2);
        layer
            .install_write(protection(&config, Side::Client, true))
            .unwrap();
        let generation = layer.write_generation();

        let mut b = MessageBuilder::new(
            &mut layer,
            ContentType::ApplicationData,
            generation,
            b"ping",
            None,
        )
        .unwrap();
        assert_eq!(b.poll(&mut layer).unwrap(), Async::Pending);
        assert!(!layer.has_packets());
        assert_eq!(b.poll(&mut layer).unwrap(), Async::Ready(()));
        assert_eq!(hook.calls.load(Ordering::SeqCst), 2);

        // 5 header + 16 IV + (4 + 32 MAC + 1 -> 48)
        let packet = layer.pop_packet().unwrap();
        assert_eq!(packet.len(), 5 + 16 + 48);
        assert_eq!(&packet[..3], &[23, 3, 3]);

        // The peer opens it.
        let mut rx = protection(&config, Side::Server, false);
        let header = RecordHeader::decode(&packet, false).unwrap();
        let mut body = Buf::from_slice(&packet[5..]);
        let params = rx.prepare_open(&header, [0; 8], &mut body).unwrap();
        rx.open(&params, &mut body).unwrap();
        rx.verify(config.crypto_provider().hmac_provider, &params, &mut body)
            .unwrap();
        assert_eq!(&body[..], b"ping");
    }

    #[test]
    fn mac_covers_the_header_version() {
        let config = Config::default();
        let mut layer = RecordLayer::new(&config, Side::Client);
        layer.set_version(ProtocolVersion::TLS1_2);
        layer
            .install_write(protection(&config, Side::Client, true))
            .unwrap();
        let generation = layer.write_generation();

        let mut b = MessageBuilder::new(
            &mut layer,
            ContentType::ApplicationData,
            generation,
            b"versioned",
            None,
        )
        .unwrap();
        layer.set_version(ProtocolVersion::TLS1_1);
        assert_eq!(b.poll(&mut layer).unwrap(), Async::Ready(()));

        let packet = layer.pop_packet().unwrap();
        assert_eq!(&packet[..3], &[23, 3, 3]);
        let mut rx = protection(&config, Side::Server, false);
        let header = RecordHeader::decode(&packet, false).unwrap();
        let mut body = Buf::from_slice(&packet[5..]);
        let params = rx.prepare_open(&header, [0; 8], &mut body).unwrap();
        rx.open(&params, &mut body).unwrap();
        rx.verify(config.crypto_provider().hmac_provider, &params, &mut body)
            .unwrap();
        assert_eq!(&body[..], b"versioned");
    }

    #[test]
    fn transcript_sees_plaintext_once() {
        let config = Config::default();
        let mut layer = RecordLayer::new(&config, Side::Client);
        let mut t = Transcript::new(config.crypto_provider().hash_provider).unwrap();
        let mut reference = Transcript::new(config.crypto_provider().hash_provider).unwrap();
        reference.update(&[1, 0, 0, 0]);

        let mut b = MessageBuilder::new(
            &mut layer,
            ContentType::Handshake,
            0,
            &[1, 0, 0, 0],
            Some((&mut t, &[1, 0, 0, 0])),
        )
        .unwrap();
        b.poll(&mut layer).unwrap();

        let (mut a, mut r) = (Buf::new(), Buf::new());
        t.hash(HashAlgorithm::SHA256, &mut a).unwrap();
        reference.hash(HashAlgorithm::SHA256, &mut r).unwrap();
        assert_eq!(a, r);
    }
}
