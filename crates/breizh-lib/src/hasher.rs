//! Seeded hash used to rank m-mers.
//!
//! Minimizer keys are the hash values themselves, so the same seed must be
//! used for every input of one index: otherwise equal m-mers from different
//! samples would land on different keys and never be merged.

use ahash::RandomState;

/// A deterministic m-mer hasher with a seeded state
#[derive(Clone)]
pub struct MinimizerHasher {
    seed: u64,
    state: RandomState,
}

impl MinimizerHasher {
    /// Create a new hasher with the given seed
    pub fn new(seed: u64) -> Self {
        let state = RandomState::with_seeds(seed, !seed, seed.rotate_left(32), !seed.rotate_left(32));
        Self { seed, state }
    }

    /// Hash a 2-bit encoded canonical m-mer
    #[inline]
    pub fn hash(&self, mmer: u64) -> u64 {
        self.state.hash_one(mmer)
    }

    /// Get the seed value
    pub fn seed(&self) -> u64 {
        self.seed
    }
}
