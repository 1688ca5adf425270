use std::time::Duration;

use crate::rng::SeededRng;

// Seconds of jitter, centered on zero.
const JITTER_RANGE: f32 = 0.25;

/// Retransmission timer for DTLS flights.
///
/// Starts at `start_rto`, doubles on every attempt and never exceeds
/// `max_rto`. A small jitter spreads out retransmissions of peers that
/// started at the same instant.
#[derive(Debug)]
pub struct ExponentialBackoff {
    start_rto: Duration,
    max_rto: Duration,
    retries: usize,
    rto: Duration,
    jitter: f32,
    left: usize,
}

impl ExponentialBackoff {
    pub fn new(start_rto: Duration, max_rto: Duration, retries: usize, rng: &mut SeededRng) -> Self {
        Self {
            start_rto,
            max_rto,
            retries,
            rto: start_rto,
            jitter: Self::jitter(rng),
            left: retries,
        }
    }

    pub fn reset(&mut self, rng: &mut SeededRng) {
        self.rto = self.start_rto;
        self.jitter = Self::jitter(rng);
        self.left = self.retries;
    }

    /// Current timeout including jitter.
    pub fn rto(&self) -> Duration {
        let base = if self.jitter < 0.0 {
            self.rto
                .saturating_sub(Duration::from_secs_f32(self.jitter.abs()))
        } else {
            self.rto + Duration::from_secs_f32(self.jitter)
        };
        base.max(Duration::from_millis(50))
    }

    fn jitter(rng: &mut SeededRng) -> f32 {
        rng.random::<f32>() * JITTER_RANGE - (JITTER_RANGE / 2.0)
    }

    /// Register a retransmission. Doubles the timeout up to the cap.
    pub fn attempt(&mut self, rng: &mut SeededRng) {
        let Some(n) = self.left.checked_sub(1) else {
            return;
        };
        self.left = n;
        self.jitter = Self::jitter(rng);
        self.rto = (self.rto * 2).min(self.max_rto);
    }

    pub fn can_retry(&self) -> bool {
        self.left > 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn doubles_until_retries_run_out() {
        let mut rng = SeededRng::new(Some(42));
        let mut exp =
            ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(60), 3, &mut rng);

        let n1 = exp.rto().as_millis();
        exp.attempt(&mut rng);
        let n2 = exp.rto().as_millis();
        assert!(n2 > n1);
        exp.attempt(&mut rng);
        let n3 = exp.rto().as_millis();
        assert!(n3 > n2);
        assert!(exp.can_retry());
        exp.attempt(&mut rng);
        assert!(!exp.can_retry());

        let n4 = exp.rto().as_millis();
        exp.attempt(&mut rng);
        assert_eq!(exp.rto().as_millis(), n4);
    }

    #[test]
    fn capped_at_max_rto() {
        let mut rng = SeededRng::new(Some(1));
        let mut exp =
            ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(3), 10, &mut rng);
        for _ in 0..5 {
            exp.attempt(&mut rng);
        }
        assert!(exp.rto() <= Duration::from_secs_f32(3.0 + JITTER_RANGE));
    }

    #[test]
    fn reset_restores_start() {
        let mut rng = SeededRng::new(Some(3));
        let mut exp =
            ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(60), 2, &mut rng);
        exp.attempt(&mut rng);
        exp.attempt(&mut rng);
        exp.reset(&mut rng);
        assert!(exp.can_retry());
        assert!(exp.rto() < Duration::from_secs(2));
    }
}
