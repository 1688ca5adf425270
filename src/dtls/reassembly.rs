//! Reassembly of fragmented DTLS handshake messages.
//!
//! Fragments may arrive in any order, overlap or repeat. Each message
//! keeps a buffer of its declared length and a sorted list of filled
//! ranges; only bytes not yet covered are copied in. Messages leave in
//! `message_seq` order, one at a time.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use crate::codec::HandshakeHeader;
use crate::types::HandshakeType;
use crate::Error;

/// How far ahead of the expected sequence fragments are buffered.
const MAX_AHEAD: u16 = 16;

/// What [`Reassembly::store`] did with a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stored {
    /// New bytes were added.
    Added,
    /// Nothing new, the message is still being assembled.
    Redundant,
    /// A message that was already processed. `first` is set for the
    /// fragment at offset zero, which is what triggers a retransmission.
    Processed { message_seq: u16, first: bool },
    /// Too far ahead.
    Dropped,
}

struct Partial {
    msg_type: HandshakeType,
    body: Vec<u8>,
    filled: Vec<Range<usize>>,
}

impl Partial {
    fn filled_len(&self) -> usize {
        self.filled.iter().map(|r| r.len()).sum()
    }

    fn is_complete(&self) -> bool {
        self.filled_len() == self.body.len()
    }

    /// Copy the parts of `range` not yet filled and merge the range list.
    fn insert(&mut self, range: Range<usize>, data: &[u8]) -> bool {
        let mut added = false;
        let mut cursor = range.start;

        for r in &self.filled {
            if r.end <= cursor {
                continue;
            }
            if r.start >= range.end {
                break;
            }
            if r.start > cursor {
                let src = &data[cursor - range.start..r.start - range.start];
                self.body[cursor..r.start].copy_from_slice(src);
                added = true;
            }
            cursor = r.end;
            if cursor >= range.end {
                break;
            }
        }
        if cursor < range.end {
            self.body[cursor..range.end].copy_from_slice(&data[cursor - range.start..]);
            added = true;
        }

        if added {
            self.filled.push(range);
            self.filled.sort_by_key(|r| r.start);
            let mut merged: Vec<Range<usize>> = Vec::with_capacity(self.filled.len());
            for r in self.filled.drain(..) {
                match merged.last_mut() {
                    Some(last) if r.start <= last.end => last.end = last.end.max(r.end),
                    _ => merged.push(r),
                }
            }
            self.filled = merged;
        }
        added
    }
}

/// Incoming handshake messages of one DTLS handshake.
pub(crate) struct Reassembly {
    next_seq: u16,
    max_len: usize,
    messages: BTreeMap<u16, Partial>,
}

impl Reassembly {
    pub fn new(max_len: usize) -> Self {
        Reassembly {
            next_seq: 0,
            max_len,
            messages: BTreeMap::new(),
        }
    }

    /// `message_seq` of the next message to hand out.
    pub fn next_seq(&self) -> u16 {
        self.next_seq
    }

    /// Forget everything and expect `next_seq`. Used when the server
    /// restarts after a HelloVerifyRequest.
    pub fn reset(&mut self, next_seq: u16) {
        self.messages.clear();
        self.next_seq = next_seq;
    }

    /// Store one fragment.
    pub fn store(&mut self, header: &HandshakeHeader, fragment: &[u8]) -> Result<Stored, Error> {
        let length = header.length as usize;
        let offset = header.fragment_offset as usize;
        let frag_len = header.fragment_length as usize;

        if fragment.len() != frag_len || offset + frag_len > length {
            return Err(Error::decode("handshake fragment outside its message"));
        }
        if length > self.max_len {
            return Err(Error::HandshakeFailure(format!(
                "handshake message of {} bytes exceeds limit",
                length
            )));
        }

        let seq = header.message_seq;
        if seq < self.next_seq {
            return Ok(Stored::Processed {
                message_seq: seq,
                first: offset == 0,
            });
        }
        if seq - self.next_seq > MAX_AHEAD {
            trace!("Dropping fragment of message {} (expecting {})", seq, self.next_seq);
            return Ok(Stored::Dropped);
        }

        let partial = self.messages.entry(seq).or_insert_with(|| Partial {
            msg_type: header.msg_type,
            body: vec![0; length],
            filled: Vec::new(),
        });
        if partial.msg_type != header.msg_type || partial.body.len() != length {
            return Err(Error::decode("fragments disagree on message type or length"));
        }

        if frag_len == 0 {
            // An empty message is complete as soon as it is seen.
            return Ok(if length == 0 {
                Stored::Added
            } else {
                Stored::Redundant
            });
        }

        if partial.insert(offset..offset + frag_len, fragment) {
            Ok(Stored::Added)
        } else {
            Ok(Stored::Redundant)
        }
    }

    /// The next message in sequence, if complete. Returns its type,
    /// sequence number and body.
    pub fn pop_ready(&mut self) -> Option<(HandshakeType, u16, Vec<u8>)> {
        let complete = self
            .messages
            .get(&self.next_seq)
            .map(|p| p.is_complete())
            .unwrap_or(false);
        if !complete {
            return None;
        }
        let seq = self.next_seq;
        let partial = self.messages.remove(&seq)?;
        self.next_seq = seq.wrapping_add(1);
        Some((partial.msg_type, seq, partial.body))
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl fmt::Debug for Reassembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let partial: Vec<(u16, usize, usize)> = self
            .messages
            .iter()
            .map(|(seq, p)| (*seq, p.filled_len(), p.body.len()))
            .collect();
        f.debug_struct("Reassembly")
            .field("next_seq", &self.next_seq)
            .field("partial", &partial)
            .finish()
    }
}
