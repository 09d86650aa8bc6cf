//! DNA nucleotide encoding
//!
//! 2-bit encoding of nucleotides used by the minimizer scanner.
//!
//! Encoding:
//! - A (65/97)  -> 00
//! - C (67/99)  -> 01
//! - G (71/103) -> 11
//! - T (84/116) -> 10
//!
//! With this layout the complement of a base is `bits ^ 0b10`.

/// Encode a single DNA nucleotide to 2 bits
///
/// Returns `None` for anything that is not A/C/G/T (case-insensitive),
/// which the scanner treats as a window break.
#[inline]
pub const fn encode_base(base: u8) -> Option<u8> {
    match base {
        b'A' | b'a' => Some(0b00),
        b'C' | b'c' => Some(0b01),
        b'G' | b'g' => Some(0b11),
        b'T' | b't' => Some(0b10),
        _ => None,
    }
}

/// Decode a 2-bit value to DNA nucleotide (uppercase)
#[inline]
pub const fn decode_base(bits: u8) -> u8 {
    match bits & 0b11 {
        0b00 => b'A',
        0b01 => b'C',
        0b11 => b'G',
        0b10 => b'T',
        _ => unreachable!(),
    }
}

/// Get the complement of a DNA base (encoded)
#[inline]
pub const fn complement_base(bits: u8) -> u8 {
    bits ^ 0b10
}

/// Rolling forward / reverse-complement encoding of the last `m` bases
///
/// The forward value holds the first base in its most significant position,
/// the reverse-complement value is maintained alongside so that the
/// canonical m-mer is available in O(1) per base.
#[derive(Debug, Clone)]
pub struct RollingMmer {
    m: usize,
    mask: u64,
    forward: u64,
    reverse: u64,
    filled: usize,
    canonical: bool,
}

impl RollingMmer {
    /// Create an empty window for m-mers of length `m` (1..=32)
    pub fn new(m: usize) -> Self {
        assert!(m > 0 && m <= 32, "m must be in [1, 32], got {}", m);
        let mask = if m == 32 { u64::MAX } else { (1u64 << (2 * m)) - 1 };
        Self {
            m,
            mask,
            forward: 0,
            reverse: 0,
            filled: 0,
            canonical: true,
        }
    }

    /// Report forward-strand m-mers instead of canonical ones
    pub fn forward_only(mut self) -> Self {
        self.canonical = false;
        self
    }

    /// Append an encoded base; returns the m-mer once `m` bases are in
    #[inline]
    pub fn push(&mut self, bits: u8) -> Option<u64> {
        let bits = (bits & 0b11) as u64;
        self.forward = ((self.forward << 2) | bits) & self.mask;
        self.reverse = (self.reverse >> 2) | ((complement_base(bits as u8) as u64) << (2 * (self.m - 1)));
        if self.filled < self.m {
            self.filled += 1;
        }
        if self.filled < self.m {
            None
        } else if self.canonical {
            Some(self.forward.min(self.reverse))
        } else {
            Some(self.forward)
        }
    }

    /// Forget all bases (after a non-ACGT character)
    pub fn reset(&mut self) {
        self.forward = 0;
        self.reverse = 0;
        self.filled = 0;
    }
}
