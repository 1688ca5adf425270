/// Largest replay window supported, in records.
pub const MAX_WINDOW_SIZE: usize = 1024;

const WORDS: usize = MAX_WINDOW_SIZE / 64;

/// Sliding replay window for DTLS record sequence numbers.
///
/// Tracks the highest accepted sequence number and a bitmap of the
/// `size` numbers at and below it. Bit `k` stands for `max_seq - k`.
///
/// Checking and marking are separate so a record is only marked as seen
/// once its MAC has verified. A forged record must not burn a sequence
/// number for the real one.
#[derive(Debug, Clone)]
pub struct ReplayWindow {
    size: u64,
    max_seq: Option<u64>,
    bits: [u64; WORDS],
}

impl Default for ReplayWindow {
    fn default() -> Self {
        Self::new(64)
    }
}

impl ReplayWindow {
    /// New window covering `size` records, clamped to `1..=1024`.
    pub fn new(size: usize) -> Self {
        Self {
            size: size.clamp(1, MAX_WINDOW_SIZE) as u64,
            max_seq: None,
            bits: [0; WORDS],
        }
    }

    /// Whether `seqno` is fresh. Does not modify the window.
    pub fn check(&self, seqno: u64) -> bool {
        let Some(max_seq) = self.max_seq else {
            return true;
        };
        if seqno > max_seq {
            return true;
        }
        let offset = max_seq - seqno;
        if offset >= self.size {
            return false; // too old
        }
        !self.is_set(offset as usize)
    }

    /// Mark `seqno` as seen.
    pub fn update(&mut self, seqno: u64) {
        match self.max_seq {
            Some(max_seq) if seqno <= max_seq => {
                let offset = max_seq - seqno;
                if offset < self.size {
                    self.set(offset as usize);
                }
            }
            Some(max_seq) => {
                self.shift(seqno - max_seq);
                self.set(0);
                self.max_seq = Some(seqno);
            }
            None => {
                self.set(0);
                self.max_seq = Some(seqno);
            }
        }
    }

    /// Check and update in one step.
    pub fn check_and_update(&mut self, seqno: u64) -> bool {
        if !self.check(seqno) {
            return false;
        }
        self.update(seqno);
        true
    }

    /// Forget everything. Used when the read epoch changes.
    pub fn reset(&mut self) {
        self.max_seq = None;
        self.bits = [0; WORDS];
    }

    fn is_set(&self, k: usize) -> bool {
        self.bits[k / 64] & (1 << (k % 64)) != 0
    }

    fn set(&mut self, k: usize) {
        self.bits[k / 64] |= 1 << (k % 64);
    }

    fn shift(&mut self, delta: u64) {
        if delta >= MAX_WINDOW_SIZE as u64 {
            self.bits = [0; WORDS];
            return;
        }
        let words = (delta / 64) as usize;
        let bits = (delta % 64) as u32;
        for i in (0..WORDS).rev() {
            let mut v = 0;
            if i >= words {
                v = self.bits[i - words] << bits;
                if bits > 0 && i > words {
                    v |= self.bits[i - words - 1] >> (64 - bits);
                }
            }
            self.bits[i] = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_fresh_and_rejects_duplicate() {
        let mut w = ReplayWindow::new(64);
        assert!(w.check_and_update(1));
        assert!(!w.check_and_update(1));
        assert!(w.check_and_update(2));
    }

    #[test]
    fn first_record_may_be_zero() {
        let mut w = ReplayWindow::new(64);
        assert!(w.check_and_update(0));
        assert!(!w.check(0));
    }

    #[test]
    fn check_does_not_mark() {
        let mut w = ReplayWindow::new(64);
        assert!(w.check(5));
        assert!(w.check(5));
        w.update(5);
        assert!(!w.check(5));
    }

    #[test]
    fn accepts_out_of_order_within_window() {
        let mut w = ReplayWindow::new(64);
        assert!(w.check_and_update(10));
        assert!(w.check_and_update(8));
        assert!(!w.check_and_update(8));
        assert!(w.check_and_update(9));
    }

    #[test]
    fn rejects_too_old() {
        let mut w = ReplayWindow::new(64);
        assert!(w.check_and_update(100));
        assert!(!w.check_and_update(36));
        assert!(w.check_and_update(37));
    }

    #[test]
    fn wide_window_tracks_across_words() {
        let mut w = ReplayWindow::new(256);
        assert!(w.check_and_update(10));
        assert!(w.check_and_update(200));
        // 10 is still inside a 256 wide window and already seen
        assert!(!w.check(10));
        assert!(w.check_and_update(11));
        assert!(w.check_and_update(300));
        assert!(!w.check(11));
        assert!(!w.check(200));
        assert!(w.check(199));
        // 300 - 44 = 256, out of the window
        assert!(!w.check(44));
        assert!(w.check(45));
    }

    #[test]
    fn handles_large_jump() {
        let mut w = ReplayWindow::new(64);
        assert!(w.check_and_update(1));
        assert!(w.check_and_update(5000));
        assert!(w.check_and_update(4999));
        assert!(!w.check_and_update(1));
    }
}
