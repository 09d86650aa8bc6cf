//! Canonical minimizer extraction
//!
//! A minimizer is the m-mer with the smallest hash inside a k-mer, where the
//! k-mer spans `w = k - m + 1` consecutive m-mers. m-mers are canonical
//! (the smaller of the forward and reverse-complement encodings), so both
//! strands of a sequence yield the same keys.
//!
//! The scanner uses the "re-scan" method: it remembers the position of the
//! current minimum, compares each new m-mer against it with a single
//! comparison, and rescans the window only when the minimum falls out.
//! Consecutive k-mers sharing a minimizer occurrence (a super-k-mer) emit it
//! once.

use crate::encoding::{encode_base, RollingMmer};
use crate::hasher::MinimizerHasher;

/// Streaming canonical minimizer scanner
///
/// # Example
/// ```
/// use breizh_lib::minimizer::MinimizerScanner;
///
/// let mut scanner = MinimizerScanner::new(15, 7, 1);
/// let mut keys = Vec::new();
/// scanner.scan(b"ACGTACGTTGCAGGCTAGCTAGGATCCA", |key| keys.push(key));
/// assert!(!keys.is_empty());
/// ```
pub struct MinimizerScanner {
    w: usize,
    mmer: RollingMmer,
    hasher: MinimizerHasher,
    /// Hashes of the last `w` m-mers, indexed by position modulo `w`
    window: Vec<u64>,
    /// Number of m-mers seen since the last window break
    num_mmers: usize,
    /// Absolute m-mer index of the current minimum
    min_pos: usize,
    min_hash: u64,
}

impl MinimizerScanner {
    /// Create a scanner for k-mers of length `k` and minimizers of length `m`
    ///
    /// # Panics
    /// Panics if `m` is not in `[1, 32]` or `k < m`.
    pub fn new(k: usize, m: usize, seed: u64) -> Self {
        assert!(k >= m, "k must be >= m (k={}, m={})", k, m);
        let w = k - m + 1;
        Self {
            w,
            mmer: RollingMmer::new(m),
            hasher: MinimizerHasher::new(seed),
            window: vec![u64::MAX; w],
            num_mmers: 0,
            min_pos: 0,
            min_hash: u64::MAX,
        }
    }

    /// Rank forward-strand m-mers instead of canonical ones
    pub fn forward_strand(mut self) -> Self {
        self.mmer = self.mmer.forward_only();
        self
    }

    /// Scan one sequence, calling `emit` with the hash of every new minimizer
    ///
    /// Non-ACGT characters break the window: no k-mer spans them.
    pub fn scan<F: FnMut(u64)>(&mut self, sequence: &[u8], mut emit: F) {
        self.reset();
        for &base in sequence {
            let Some(bits) = encode_base(base) else {
                self.reset();
                continue;
            };
            let Some(mmer) = self.mmer.push(bits) else {
                continue;
            };
            if let Some(key) = self.push_mmer(self.hasher.hash(mmer)) {
                emit(key);
            }
        }
    }

    /// Scan a sequence and collect its minimizer keys
    pub fn collect(&mut self, sequence: &[u8]) -> Vec<u64> {
        let mut keys = Vec::new();
        self.scan(sequence, |key| keys.push(key));
        keys
    }

    fn reset(&mut self) {
        self.mmer.reset();
        self.num_mmers = 0;
        self.min_hash = u64::MAX;
        self.min_pos = 0;
    }

    /// Add the hash of the next m-mer; returns the minimizer hash when the
    /// window's minimizer occurrence changed
    fn push_mmer(&mut self, hash: u64) -> Option<u64> {
        let pos = self.num_mmers;
        self.window[pos % self.w] = hash;
        self.num_mmers += 1;

        if self.num_mmers < self.w {
            // Window not full yet: track the running minimum only
            if hash < self.min_hash {
                self.min_hash = hash;
                self.min_pos = pos;
            }
            return None;
        }

        let window_start = pos + 1 - self.w;
        let first_window = self.num_mmers == self.w;

        if first_window {
            if hash < self.min_hash {
                self.min_hash = hash;
                self.min_pos = pos;
            }
            return Some(self.min_hash);
        }

        if self.min_pos < window_start {
            // Minimum fell out of the window: rescan, leftmost minimum wins
            self.rescan(window_start);
            return Some(self.min_hash);
        }

        if hash < self.min_hash {
            self.min_hash = hash;
            self.min_pos = pos;
            return Some(self.min_hash);
        }

        None
    }

    fn rescan(&mut self, window_start: usize) {
        self.min_hash = u64::MAX;
        for p in window_start..window_start + self.w {
            let h = self.window[p % self.w];
            if h < self.min_hash {
                self.min_hash = h;
                self.min_pos = p;
            }
        }
    }
}
