//! Record sequence numbers and DTLS epochs.
//!
//! TLS keeps one implicit 64-bit counter per direction, reset when the
//! direction changes keys. DTLS carries `epoch || seq48` explicitly: the
//! write side keeps a counter per epoch (the previous one survives for
//! retransmitting the last flight) and the read side keeps a replay window
//! for the current and the previous epoch.

use crate::codec::MAX_DTLS_SEQ;
use crate::window::ReplayWindow;
use crate::Error;

/// 64-bit sequence number kept as two 32-bit halves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceNumber {
    hi: u32,
    lo: u32,
}

impl SequenceNumber {
    pub fn new(value: u64) -> Self {
        SequenceNumber {
            hi: (value >> 32) as u32,
            lo: value as u32,
        }
    }

    pub fn value(&self) -> u64 {
        ((self.hi as u64) << 32) | self.lo as u64
    }

    /// Advance by one, carrying into the high half. Wrapping the full
    /// 64 bits is an error.
    pub fn increment(&mut self) -> Result<(), Error> {
        let (lo, carry) = self.lo.overflowing_add(1);
        if carry {
            self.hi = self.hi.checked_add(1).ok_or(Error::SequenceOverflow)?;
        }
        self.lo = lo;
        Ok(())
    }

    pub fn to_be_bytes(&self) -> [u8; 8] {
        self.value().to_be_bytes()
    }
}

/// What the read side should do with a DTLS record, decided before
/// decryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochVerdict {
    /// Current read epoch and fresh.
    Current,
    /// Previous read epoch and fresh. Only handshake retransmissions are
    /// expected here.
    Previous,
    /// Next epoch, arrived before the ChangeCipherSpec. Keep for later.
    Next,
    /// Replayed, too old or from an unrelated epoch.
    Drop,
}

#[derive(Debug)]
pub struct SequenceState {
    dtls: bool,
    tx: SequenceNumber,
    rx: SequenceNumber,
    write_epoch: u16,
    prev_write: Option<(u16, SequenceNumber)>,
    read_epoch: u16,
    window_size: usize,
    window: ReplayWindow,
    prev_window: ReplayWindow,
}

impl SequenceState {
    pub fn new(dtls: bool, window_size: usize) -> Self {
        SequenceState {
            dtls,
            tx: SequenceNumber::default(),
            rx: SequenceNumber::default(),
            write_epoch: 0,
            prev_write: None,
            read_epoch: 0,
            window_size,
            window: ReplayWindow::new(window_size),
            prev_window: ReplayWindow::new(window_size),
        }
    }

    pub fn write_epoch(&self) -> u16 {
        self.write_epoch
    }

    pub fn read_epoch(&self) -> u16 {
        self.read_epoch
    }

    /// Implicit receive sequence number of the next TLS record.
    pub fn rx(&self) -> u64 {
        self.rx.value()
    }

    /// Sequence number for the next outgoing record in the current epoch.
    pub fn next_tx(&mut self) -> Result<u64, Error> {
        Self::take(self.dtls, &mut self.tx)
    }

    /// Sequence number for a record in `epoch`, which is the current
    /// or the previous write epoch. Used by DTLS retransmission.
    pub fn next_tx_for_epoch(&mut self, epoch: u16) -> Result<u64, Error> {
        if epoch == self.write_epoch {
            return self.next_tx();
        }
        match &mut self.prev_write {
            Some((e, seq)) if *e == epoch => Self::take(true, seq),
            _ => Err(Error::InternalError("no write state for epoch")),
        }
    }

    fn take(dtls: bool, seq: &mut SequenceNumber) -> Result<u64, Error> {
        let value = seq.value();
        if dtls && value > MAX_DTLS_SEQ {
            return Err(Error::TooBigDtlsSeq(value));
        }
        seq.increment()?;
        Ok(value)
    }

    /// Advance the TLS receive counter after a record was accepted.
    pub fn advance_rx(&mut self) -> Result<(), Error> {
        self.rx.increment()
    }

    /// New write keys. TLS restarts the counter at zero; DTLS moves to the
    /// next epoch and keeps the current one as the previous epoch.
    pub fn change_write(&mut self) -> Result<(), Error> {
        if self.dtls {
            let next = self.write_epoch.checked_add(1).ok_or(Error::WrappedEpoch)?;
            self.prev_write = Some((self.write_epoch, self.tx));
            self.write_epoch = next;
        }
        self.tx = SequenceNumber::default();
        Ok(())
    }

    /// New read keys, mirror of [`SequenceState::change_write`].
    pub fn change_read(&mut self) -> Result<(), Error> {
        if self.dtls {
            let next = self.read_epoch.checked_add(1).ok_or(Error::WrappedEpoch)?;
            let fresh = ReplayWindow::new(self.window_size);
            self.prev_window = std::mem::replace(&mut self.window, fresh);
            self.read_epoch = next;
        }
        self.rx = SequenceNumber::default();
        Ok(())
    }

    /// Classify a DTLS record by epoch and replay state. Does not mark
    /// the record as seen.
    pub fn check_dtls(&self, epoch: u16, seq: u64) -> EpochVerdict {
        if epoch == self.read_epoch {
            if self.window.check(seq) {
                EpochVerdict::Current
            } else {
                EpochVerdict::Drop
            }
        } else if Some(epoch) == self.read_epoch.checked_sub(1) {
            if self.prev_window.check(seq) {
                EpochVerdict::Previous
            } else {
                EpochVerdict::Drop
            }
        } else if Some(epoch) == self.read_epoch.checked_add(1) {
            EpochVerdict::Next
        } else {
            EpochVerdict::Drop
        }
    }

    /// Mark a DTLS record as seen after it authenticated.
    pub fn accept_dtls(&mut self, epoch: u16, seq: u64) {
        if epoch == self.read_epoch {
            self.window.update(seq);
        } else if Some(epoch) == self.read_epoch.checked_sub(1) {
            self.prev_window.update(seq);
        }
    }
}
