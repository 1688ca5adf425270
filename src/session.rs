//! Session resumption state.
//!
//! A [`Session`] is what a completed full handshake leaves behind. It can
//! be resumed by id through a [`SessionCache`] or statelessly through a
//! ticket sealed by a [`TicketEncrypter`] (RFC 5077).

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Mutex;

use nom::bytes::complete::take;
use nom::number::complete::be_u8;
use nom::IResult;
use zeroize::Zeroizing;

use crate::buffer::Buf;
use crate::crypto::{Async, CryptoProvider};
use crate::suite::{BulkCipher, CipherSuite};
use crate::types::ProtocolVersion;
use crate::util::all_consumed;
use crate::Error;

/// Parameters needed to resume a session.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    /// Session id as sent in the ServerHello. Empty for ticket-only
    /// sessions.
    pub id: Vec<u8>,
    pub version: ProtocolVersion,
    pub cipher_suite: CipherSuite,
    pub master_secret: Zeroizing<Vec<u8>>,
    /// The session was established with the extended master secret.
    pub extended_master_secret: bool,
    /// Opaque ticket issued by the server, client side only.
    pub ticket: Option<Vec<u8>>,
}

impl Session {
    /// Serialized state sealed into a ticket:
    /// `version(2) || suite(2) || ems(1) || len(1) || master_secret`.
    pub(crate) fn encode_state(&self, out: &mut Buf) {
        self.version.serialize(out);
        self.cipher_suite.serialize(out);
        out.push(self.extended_master_secret as u8);
        out.push(self.master_secret.len() as u8);
        out.extend_from_slice(&self.master_secret);
    }

    pub(crate) fn decode_state(input: &[u8]) -> Result<Session, Error> {
        fn parse(input: &[u8]) -> IResult<&[u8], Session> {
            let (input, version) = ProtocolVersion::parse(input)?;
            let (input, cipher_suite) = CipherSuite::parse(input)?;
            let (input, ems) = be_u8(input)?;
            let (input, len) = be_u8(input)?;
            let (input, ms) = take(len as usize)(input)?;
            let (input, _) = all_consumed(input)?;
            Ok((
                input,
                Session {
                    id: Vec::new(),
                    version,
                    cipher_suite,
                    master_secret: Zeroizing::new(ms.to_vec()),
                    extended_master_secret: ems != 0,
                    ticket: None,
                },
            ))
        }
        let (_, session) = parse(input)?;
        if session.master_secret.len() != 48 {
            return Err(Error::decode("ticket master secret length"));
        }
        Ok(session)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id_len", &self.id.len())
            .field("version", &self.version)
            .field("cipher_suite", &self.cipher_suite)
            .field("extended_master_secret", &self.extended_master_secret)
            .field("ticket", &self.ticket.as_ref().map(|t| t.len()))
            .finish()
    }
}

/// Server side store of sessions resumable by id.
pub trait SessionCache: Send + Sync + fmt::Debug {
    fn get(&self, id: &[u8]) -> Option<Session>;

    fn put(&self, session: Session);

    /// Forget a session, for instance after a fatal alert.
    fn remove(&self, _id: &[u8]) {}
}

/// A bounded in-memory [`SessionCache`] evicting the oldest entry.
pub struct MemorySessionCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    map: HashMap<Vec<u8>, Session>,
    order: VecDeque<Vec<u8>>,
}

impl MemorySessionCache {
    pub fn new(capacity: usize) -> Self {
        MemorySessionCache {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner::default()),
        }
    }
}

impl SessionCache for MemorySessionCache {
    fn get(&self, id: &[u8]) -> Option<Session> {
        let inner = self.inner.lock().ok()?;
        inner.map.get(id).cloned()
    }

    fn put(&self, session: Session) {
        if session.id.is_empty() {
            return;
        }
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.map.insert(session.id.clone(), session.clone()).is_none() {
            inner.order.push_back(session.id);
        }
        while inner.map.len() > self.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            inner.map.remove(&oldest);
        }
    }

    fn remove(&self, id: &[u8]) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.map.remove(id);
            inner.order.retain(|k| k != id);
        }
    }
}

impl fmt::Debug for MemorySessionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.inner.lock().map(|i| i.map.len()).unwrap_or(0);
        f.debug_struct("MemorySessionCache")
            .field("capacity", &self.capacity)
            .field("len", &len)
            .finish()
    }
}

/// Seals and opens session tickets. Ticket contents are opaque to the
/// client.
pub trait TicketEncrypter: Send + Sync + fmt::Debug {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, String>;

    /// `None` for tickets that do not authenticate. The handshake then
    /// falls back to a full one.
    fn decrypt(&self, ticket: &[u8]) -> Option<Zeroizing<Vec<u8>>>;

    /// Lifetime hint sent in NewSessionTicket, in seconds.
    fn lifetime_hint(&self) -> u32 {
        0
    }
}

const TICKET_KEY_NAME_LEN: usize = 16;
const TICKET_NONCE_LEN: usize = 12;

/// AES-256-GCM [`TicketEncrypter`] with a random key.
///
/// Ticket layout is `key_name(16) || nonce(12) || ciphertext || tag`,
/// with the key name as additional data.
pub struct AeadTicketEncrypter {
    provider: CryptoProvider,
    key_name: [u8; TICKET_KEY_NAME_LEN],
    key: Zeroizing<[u8; 32]>,
    lifetime: u32,
}

impl AeadTicketEncrypter {
    pub fn new(provider: CryptoProvider, lifetime: u32) -> Result<Self, Error> {
        let mut key_name = [0; TICKET_KEY_NAME_LEN];
        let mut key = Zeroizing::new([0; 32]);
        provider.random(&mut key_name)?;
        provider.random(&mut key[..])?;
        if !provider.ciphers.supports(BulkCipher::Aes256Gcm) {
            return Err(Error::ConfigError("ticket cipher AES-256-GCM unsupported".into()));
        }
        Ok(AeadTicketEncrypter {
            provider,
            key_name,
            key,
            lifetime,
        })
    }
}

impl TicketEncrypter for AeadTicketEncrypter {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, String> {
        let mut cipher = self.provider.ciphers.create_aead(BulkCipher::Aes256Gcm, &self.key[..])?;
        let mut nonce = [0u8; TICKET_NONCE_LEN];
        self.provider.secure_random.fill(&mut nonce)?;

        let mut data = Buf::from_slice(plaintext);
        match cipher.seal(&nonce, &self.key_name, &mut data)? {
            Async::Ready(()) => {}
            Async::Pending => return Err("ticket cipher cannot pend".into()),
        }

        let mut out = Vec::with_capacity(TICKET_KEY_NAME_LEN + TICKET_NONCE_LEN + data.len());
        out.extend_from_slice(&self.key_name);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&data);
        Ok(out)
    }

    fn decrypt(&self, ticket: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
        if ticket.len() < TICKET_KEY_NAME_LEN + TICKET_NONCE_LEN {
            return None;
        }
        let (name, rest) = ticket.split_at(TICKET_KEY_NAME_LEN);
        if name != self.key_name {
            trace!("Ticket for unknown key name");
            return None;
        }
        let (nonce, sealed) = rest.split_at(TICKET_NONCE_LEN);

        let mut cipher = self
            .provider
            .ciphers
            .create_aead(BulkCipher::Aes256Gcm, &self.key[..])
            .ok()?;
        let mut data = Buf::from_slice(sealed);
        match cipher.open(nonce, &self.key_name, &mut data) {
            Ok(Async::Ready(())) => Some(Zeroizing::new(data.into_vec())),
            _ => None,
        }
    }

    fn lifetime_hint(&self) -> u32 {
        self.lifetime
    }
}

impl fmt::Debug for AeadTicketEncrypter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AeadTicketEncrypter")
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::rust_crypto::default_provider;

    fn session(id: &[u8]) -> Session {
        Session {
            id: id.to_vec(),
            version: ProtocolVersion::TLS1_2,
            cipher_suite: CipherSuite::ECDHE_RSA_WITH_AES_128_GCM_SHA256,
            master_secret: Zeroizing::new(vec![0x42; 48]),
            extended_master_secret: true,
            ticket: None,
        }
    }

    #[test]
    fn ticket_state_layout() {
        let mut out = Buf::new();
        session(b"").encode_state(&mut out);
        assert_eq!(&out[..6], &[0x03, 0x03, 0xC0, 0x2F, 1, 48]);
        assert_eq!(out.len(), 54);

        let back = Session::decode_state(&out).unwrap();
        assert_eq!(back, session(b""));

        assert!(Session::decode_state(&out[..40]).is_err());
    }

    #[test]
    fn cache_evicts_oldest() {
        let cache = MemorySessionCache::new(2);
        cache.put(session(b"a"));
        cache.put(session(b"b"));
        cache.put(session(b"c"));
        assert!(cache.get(b"a").is_none());
        assert!(cache.get(b"b").is_some());
        cache.remove(b"b");
        assert!(cache.get(b"b").is_none());
        assert!(cache.get(b"c").is_some());
    }

    #[test]
    fn ticket_seal_and_tamper() {
        let enc = AeadTicketEncrypter::new(default_provider(), 3600).unwrap();
        let ticket = enc.encrypt(b"state").unwrap();
        assert_eq!(&enc.decrypt(&ticket).unwrap()[..], b"state");

        let mut bad = ticket.clone();
        let last = bad.len() - 1;
        bad[last] ^= 1;
        assert!(enc.decrypt(&bad).is_none());

        let other = AeadTicketEncrypter::new(default_provider(), 0).unwrap();
        assert!(other.decrypt(&ticket).is_none());
    }
}
