//! Pseudo-random source for failure decisions.

use std::sync::atomic::{AtomicU32, Ordering};

/// Linear-congruential generator over a single atomic word.
///
/// Failure injection only needs coarse, reproducible randomness: the
/// distribution checks in the test suite allow a generous margin around the
/// configured duty cycle. Concurrent draws may interleave their state
/// updates; that perturbs the stream but stays well-defined, so no lock
/// guards the hot path.
pub struct Lcg {
    state: AtomicU32,
}

impl Lcg {
    const MULTIPLIER: u32 = 1_103_515_245;
    const INCREMENT: u32 = 12_345;

    #[must_use]
    pub const fn new(seed: u32) -> Self {
        Self {
            state: AtomicU32::new(seed),
        }
    }

    /// Restart the stream from `seed`.
    pub fn reseed(&self, seed: u32) {
        self.state.store(seed, Ordering::Relaxed);
    }

    /// Next draw, 15 significant bits (the classic `rand()` range).
    pub fn next_u32(&self) -> u32 {
        let next = self
            .state
            .load(Ordering::Relaxed)
            .wrapping_mul(Self::MULTIPLIER)
            .wrapping_add(Self::INCREMENT);
        self.state.store(next, Ordering::Relaxed);
        (next >> 16) & 0x7fff
    }
}
