//! Constants and configuration defaults for BreiZH
//!
//! This module defines the buffer sizes, fan-in limits and defaults shared by
//! the mergers, the external sorter and the build pipeline.

/// Number of colors carried by one 64-bit color word
pub const COLORS_PER_WORD: usize = 64;

/// Maximum number of zero-color inputs of the bit-packing merger
pub const MAX_BITPACK_INPUTS: usize = COLORS_PER_WORD;

/// Records held by each merge input buffer
pub const INPUT_BUFFER_RECORDS: usize = 1024;

/// Records held by each merge output buffer
pub const OUTPUT_BUFFER_RECORDS: usize = 1024;

/// Fan-in above which the wide merger switches from a linear scan to a heap
pub const SCAN_THRESHOLD: usize = 16;

/// Fan-in of one external-sort merge pass
pub const EXTERNAL_MERGE_FAN_IN: usize = 64;

/// Bytes per MiB
pub const MIB: usize = 1024 * 1024;

/// Bytes per GiB
pub const GIB: usize = 1024 * MIB;

/// Absolute ceiling on one external-sort stream buffer, whatever the RAM budget
pub const MAX_STREAM_BUFFER_BYTES: usize = GIB;

/// Default seed for the minimizer hash
pub const DEFAULT_SEED: u64 = 1;

/// Default RAM budget in MiB
pub const DEFAULT_RAM_LIMIT_MIB: usize = 4096;

/// Default fan-in of the wide merge rounds
pub const DEFAULT_MERGE_STEP: usize = 8;

/// Default k-mer length
pub const DEFAULT_K: usize = 31;

/// Default minimizer length
pub const DEFAULT_M: usize = 19;

/// Maximum minimizer length (an m-mer must fit 2-bit encoded in a u64)
pub const MAX_M: usize = 32;

/// Maximum k-mer length supported
pub const MAX_K: usize = 63;

/// Version number
pub const VERSION: (u8, u8, u8) = (0, 1, 0);

/// Number of 64-bit words needed to hold `colors` color bits
#[inline]
pub const fn color_words(colors: usize) -> usize {
    colors.div_ceil(COLORS_PER_WORD)
}

/// Compute ceil(log2(x)).
///
/// Returns 0 for x <= 1, and the minimum number of bits needed to
/// represent values in [0, x) for x >= 2.
#[inline]
pub const fn ceil_log2(x: u64) -> usize {
    if x <= 1 {
        0
    } else {
        64 - (x - 1).leading_zeros() as usize
    }
}
