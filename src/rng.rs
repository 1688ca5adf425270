//! Seedable generator for the non-cryptographic randomness in the engine.
//!
//! Only retransmission jitter draws from this. Key material, randoms,
//! explicit IVs and cookie secrets always come from the provider's
//! [`SecureRandom`](crate::crypto::SecureRandom).

use rand::distributions::{Distribution, Standard};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Random generator that is deterministic when seeded.
pub struct SeededRng {
    inner: Option<StdRng>,
}

impl SeededRng {
    /// `None` falls back to the thread-local generator.
    pub fn new(seed: Option<u64>) -> Self {
        let inner = seed.map(StdRng::seed_from_u64);
        Self { inner }
    }

    pub fn random<T>(&mut self) -> T
    where
        Standard: Distribution<T>,
    {
        match self.inner.as_mut() {
            Some(rng) => rng.gen(),
            None => rand::random(),
        }
    }
}

impl std::fmt::Debug for SeededRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeededRng")
            .field("seeded", &self.inner.is_some())
            .finish()
    }
}
