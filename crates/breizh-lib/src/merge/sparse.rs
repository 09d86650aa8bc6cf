//! Sparse color encoding of the final index
//!
//! A key carrying few colors is stored as the list of its set color indices
//! instead of a bitmap:
//!
//! ```text
//! [key][count << (64 - bits)][index word]*ceil(count / granularity)
//! ```
//!
//! `bits` is the smallest of 8, 16, 32 or 64 able to hold `total_colors - 1`;
//! `granularity = 64 / bits` indices are packed per word, the first index in
//! the most significant bits. Unused trailing slots of the last word are zero.

use std::path::Path;

use crate::constants::{ceil_log2, COLORS_PER_WORD};
use crate::error::{BreizhError, Result};
use crate::stream::{WordReader, WordWriter};

/// Index width and dense/sparse threshold of a color space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SparseLayout {
    total_colors: usize,
    bits: u32,
    granularity: usize,
    dense_threshold: usize,
}

impl SparseLayout {
    /// Layout of a color space of `total_colors` bits (a multiple of 64)
    pub fn new(total_colors: usize) -> Self {
        let needed = ceil_log2(total_colors.max(2) as u64) as u32;
        let bits = [8u32, 16, 32, 64].into_iter().find(|&b| needed <= b).unwrap_or(64);
        let granularity = (64 / bits) as usize;
        let words = total_colors / COLORS_PER_WORD;
        Self {
            total_colors,
            bits,
            granularity,
            dense_threshold: words.saturating_sub(1) * granularity,
        }
    }

    /// Number of colors of the space
    #[inline]
    pub fn total_colors(&self) -> usize {
        self.total_colors
    }

    /// Width of one packed color index
    #[inline]
    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Number of indices per packed word
    #[inline]
    pub fn granularity(&self) -> usize {
        self.granularity
    }

    /// Largest color count stored sparsely
    #[inline]
    pub fn dense_threshold(&self) -> usize {
        self.dense_threshold
    }

    /// Whether a key with `density` set colors goes to the sparse output
    #[inline]
    pub fn is_sparse(&self, density: usize) -> bool {
        density <= self.dense_threshold
    }

    /// Words of a sparse record holding `count` indices
    #[inline]
    pub fn record_words(&self, count: usize) -> usize {
        2 + count.div_ceil(self.granularity)
    }

    /// Words of the largest sparse record
    #[inline]
    pub fn max_record_words(&self) -> usize {
        self.record_words(self.dense_threshold)
    }

    #[inline]
    fn shift(&self, slot: usize) -> u32 {
        64 - self.bits * (slot as u32 + 1)
    }

    /// Count word of a record holding `count` indices
    #[inline]
    pub fn count_word(&self, count: usize) -> u64 {
        (count as u64) << (64 - self.bits)
    }

    /// Number of indices announced by a count word
    #[inline]
    pub fn decode_count(&self, word: u64) -> usize {
        (word >> (64 - self.bits)) as usize
    }

    /// Append the sparse record of `key` with bitmap `colors` to `out`
    ///
    /// `density` must be the number of set bits of `colors`.
    pub fn encode_into(&self, key: u64, colors: &[u64], density: usize, out: &mut Vec<u64>) {
        out.push(key);
        out.push(self.count_word(density));
        let mut slot = 0;
        let mut packed = 0u64;
        for (w, &word) in colors.iter().enumerate() {
            let mut rest = word;
            while rest != 0 {
                let index = (w * COLORS_PER_WORD) as u64 + rest.trailing_zeros() as u64;
                rest &= rest - 1;
                packed |= index << self.shift(slot);
                slot += 1;
                if slot == self.granularity {
                    out.push(packed);
                    packed = 0;
                    slot = 0;
                }
            }
        }
        if slot != 0 {
            out.push(packed);
        }
    }

    /// Unpack `count` color indices from the index words of a record
    pub fn decode_indices(&self, count: usize, words: &[u64], out: &mut Vec<usize>) {
        let mask = if self.bits == 64 { u64::MAX } else { (1u64 << self.bits) - 1 };
        out.extend((0..count).map(|i| {
            let word = words[i / self.granularity];
            ((word >> self.shift(i % self.granularity)) & mask) as usize
        }));
    }
}

/// Buffered writer of variable-length sparse records
///
/// The buffer is flushed before an append whenever fewer than
/// [`SparseLayout::max_record_words`] words of headroom remain.
pub struct SparseWriter {
    writer: WordWriter,
    layout: SparseLayout,
    buffer: Vec<u64>,
    capacity: usize,
    records: u64,
}

impl SparseWriter {
    /// Create `path` with room for `capacity_records` maximal records
    pub fn create(path: impl AsRef<Path>, layout: SparseLayout, capacity_records: usize) -> Result<Self> {
        let capacity = capacity_records.max(1) * layout.max_record_words();
        Ok(Self {
            writer: WordWriter::create(path)?,
            layout,
            buffer: Vec::with_capacity(capacity),
            capacity,
            records: 0,
        })
    }

    /// Append the record of `key`
    pub fn push(&mut self, key: u64, colors: &[u64], density: usize) -> Result<()> {
        if self.capacity - self.buffer.len() < self.layout.record_words(density) {
            self.flush()?;
        }
        self.layout.encode_into(key, colors, density, &mut self.buffer);
        self.records += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.write_words(&self.buffer)?;
        self.buffer.clear();
        Ok(())
    }

    /// Write the remaining records; returns the record count
    pub fn finish(mut self) -> Result<u64> {
        self.flush()?;
        self.writer.finish()?;
        Ok(self.records)
    }
}

/// One decoded sparse record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseRecord {
    /// Minimizer key
    pub key: u64,
    /// Set color indices, ascending
    pub colors: Vec<usize>,
}

/// Streaming decoder of a sparse output file
pub struct SparseReader {
    reader: WordReader,
    layout: SparseLayout,
    header: [u64; 2],
    packed: Vec<u64>,
}

impl SparseReader {
    /// Open a sparse stream written for `layout`
    pub fn open(path: impl AsRef<Path>, layout: SparseLayout) -> Result<Self> {
        Ok(Self {
            reader: WordReader::open(path)?,
            layout,
            header: [0; 2],
            packed: Vec::with_capacity(layout.max_record_words()),
        })
    }

    /// Decode the next record, `None` at end of stream
    pub fn next_record(&mut self) -> Result<Option<SparseRecord>> {
        let n = self.reader.read_words(&mut self.header)?;
        if n == 0 {
            return Ok(None);
        }
        if n < 2 {
            return Err(self.cut_short(n));
        }
        let count = self.layout.decode_count(self.header[1]);
        let index_words = count.div_ceil(self.layout.granularity());
        self.packed.resize(index_words, 0);
        let read = self.reader.read_words(&mut self.packed)?;
        if read < index_words {
            return Err(self.cut_short(2 + read));
        }
        let mut colors = Vec::with_capacity(count);
        self.layout.decode_indices(count, &self.packed, &mut colors);
        Ok(Some(SparseRecord {
            key: self.header[0],
            colors,
        }))
    }

    fn cut_short(&self, words: usize) -> BreizhError {
        BreizhError::Misaligned {
            path: self.reader.path().to_path_buf(),
            words,
            stride: self.layout.max_record_words(),
        }
    }
}

impl Iterator for SparseReader {
    type Item = Result<SparseRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
