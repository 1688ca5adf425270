//! DTLS flight retransmission.
//!
//! Every handshake record of the current flight is saved as plaintext,
//! tagged with the write generation it was sent under. On timeout, or
//! when the peer repeats its previous flight, the records are queued
//! again with fresh sequence numbers of that generation.

use std::fmt;
use std::time::Instant;

use crate::buffer::{Buf, BufferPool};
use crate::config::Config;
use crate::rng::SeededRng;
use crate::timer::ExponentialBackoff;
use crate::types::ContentType;
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Timeout {
    Disabled,
    Unarmed,
    Armed(Instant),
}

/// One saved record of a flight.
pub(crate) struct Entry {
    pub content_type: ContentType,
    pub generation: u16,
    pub fragment: Buf,
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("content_type", &self.content_type)
            .field("generation", &self.generation)
            .field("len", &self.fragment.len())
            .finish()
    }
}

/// What [`Flight::handle_timeout`] wants done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerAction {
    None,
    Resend,
}

#[derive(Debug)]
pub(crate) struct Flight {
    saved: Vec<Entry>,
    buffers: BufferPool,
    backoff: ExponentialBackoff,
    rng: SeededRng,
    flight_timeout: Timeout,
    connect_timeout: Timeout,
    handshake_timeout: std::time::Duration,
}

impl Flight {
    pub fn new(config: &Config) -> Self {
        let mut rng = SeededRng::new(config.rng_seed());
        let backoff = ExponentialBackoff::new(
            config.flight_start_rto(),
            config.flight_max_rto(),
            config.flight_retries(),
            &mut rng,
        );
        Flight {
            saved: Vec::new(),
            buffers: BufferPool::default(),
            backoff,
            rng,
            flight_timeout: Timeout::Unarmed,
            connect_timeout: Timeout::Unarmed,
            handshake_timeout: config.handshake_timeout(),
        }
    }

    /// Start a new flight. The previous one is implicitly acknowledged.
    pub fn begin(&mut self, flight_no: u8) {
        debug!("Begin flight {}", flight_no);
        self.backoff.reset(&mut self.rng);
        self.clear();
        self.flight_timeout = Timeout::Unarmed;
    }

    pub fn save(&mut self, content_type: ContentType, generation: u16, fragment: &[u8]) {
        let mut buf = self.buffers.pop();
        buf.extend_from_slice(fragment);
        self.saved.push(Entry {
            content_type,
            generation,
            fragment: buf,
        });
    }

    pub fn saved(&self) -> &[Entry] {
        &self.saved
    }

    pub fn has_saved(&self) -> bool {
        !self.saved.is_empty()
    }

    fn clear(&mut self) {
        for entry in self.saved.drain(..) {
            self.buffers.push(entry.fragment);
        }
    }

    /// Stop all timers. Saved records stay, so a repeated final flight of
    /// the peer can still be answered.
    pub fn stop_timers(&mut self) {
        debug!("Stop flight timers");
        self.flight_timeout = Timeout::Disabled;
        self.connect_timeout = Timeout::Disabled;
    }

    /// The peer's final flight arrived. Nothing of ours will be needed
    /// again.
    pub fn complete(&mut self) {
        self.stop_timers();
        self.clear();
    }

    /// Arm unarmed timers relative to `now`, then check for expiry.
    pub fn handle_timeout(&mut self, now: Instant) -> Result<TimerAction, Error> {
        if self.connect_timeout == Timeout::Unarmed {
            debug!(
                "Connect timeout in: {:.03}s",
                self.handshake_timeout.as_secs_f32()
            );
            self.connect_timeout = Timeout::Armed(now + self.handshake_timeout);
        }
        if self.flight_timeout == Timeout::Unarmed {
            debug!("Flight timeout in: {:.03}s", self.backoff.rto().as_secs_f32());
            self.flight_timeout = Timeout::Armed(now + self.backoff.rto());
        }

        if let Timeout::Armed(connect_timeout) = self.connect_timeout {
            if now >= connect_timeout {
                return Err(Error::Timeout("connect"));
            }
        }

        let Timeout::Armed(flight_timeout) = self.flight_timeout else {
            return Ok(TimerAction::None);
        };

        if now < flight_timeout {
            return Ok(TimerAction::None);
        }

        if !self.backoff.can_retry() {
            return Err(Error::Timeout("handshake"));
        }
        self.backoff.attempt(&mut self.rng);
        debug!(
            "Re-arm flight timeout due to resend in {}",
            self.backoff.rto().as_secs_f32()
        );
        self.flight_timeout = Timeout::Armed(now + self.backoff.rto());
        Ok(TimerAction::Resend)
    }

    /// Earliest armed deadline. `None` when both timers are disabled.
    pub fn next_timeout(&self) -> Option<Instant> {
        match (self.connect_timeout, self.flight_timeout) {
            (Timeout::Armed(c), Timeout::Armed(f)) => Some(c.min(f)),
            (Timeout::Armed(c), _) => Some(c),
            (_, Timeout::Armed(f)) => Some(f),
            _ => None,
        }
    }

    pub fn timers_disabled(&self) -> bool {
        self.connect_timeout == Timeout::Disabled && self.flight_timeout == Timeout::Disabled
    }
}
