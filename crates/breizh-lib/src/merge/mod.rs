//! Record-level merge algorithms
//!
//! Every merger consumes key-sorted record streams and produces a key-sorted,
//! key-deduplicated stream in which the colors of equal keys are combined:
//!
//! - [`pairwise`]: two inputs, widths `n1 >= n2`, output width `n1 + n2`
//!   (two zero-width inputs become bits 0 and 1 of one word)
//! - [`bitpack`]: up to 64 zero-width inputs, input `i` becomes bit `i`
//! - [`wide`]: any number of equal-width inputs, concatenated color words
//! - [`final_split`]: the terminal merge routing each key to a dense or a
//!   sparse output depending on how many colors it carries
//!
//! All of them rely on [`output::MergeOutput`] keeping the last record
//! amendable, so a key is detected as a continuation by comparing it with
//! the previously emitted key rather than by comparing the input heads.

pub mod bitpack;
pub mod final_split;
pub mod input;
pub mod output;
pub mod pairwise;
pub mod sparse;
pub mod wide;

use std::path::Path;

use crate::constants::{INPUT_BUFFER_RECORDS, OUTPUT_BUFFER_RECORDS};
use crate::error::{BreizhError, Result};
use crate::merge_file::MergeFile;
use crate::record::{RecordLayout, RecordSlice};
use crate::stream::{remove_file, WordReader};

pub use bitpack::merge_bitpack;
pub use final_split::{merge_final, FinalMerge};
pub use input::RecordStream;
pub use output::MergeOutput;
pub use pairwise::merge_pairwise;
pub use sparse::{SparseLayout, SparseReader, SparseRecord, SparseWriter};
pub use wide::merge_wide;

/// Buffering and cleanup options shared by the mergers
#[derive(Debug, Clone, Copy)]
pub struct MergeOptions {
    /// Delete the input files once the output is complete
    pub remove_inputs: bool,
    /// Records buffered per input
    pub input_records: usize,
    /// Records buffered by the output
    pub output_records: usize,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            remove_inputs: false,
            input_records: INPUT_BUFFER_RECORDS,
            output_records: OUTPUT_BUFFER_RECORDS,
        }
    }
}

impl MergeOptions {
    /// Default buffering, deleting inputs when `remove_inputs` is set
    pub fn removing_inputs(remove_inputs: bool) -> Self {
        Self {
            remove_inputs,
            ..Self::default()
        }
    }
}

/// Record counts of one or more merges
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    /// Records read from all inputs
    pub input_records: u64,
    /// Records written to the output(s)
    pub output_records: u64,
}

impl MergeStats {
    /// Accumulate the counts of another merge
    pub fn add(&mut self, other: &MergeStats) {
        self.input_records += other.input_records;
        self.output_records += other.output_records;
    }
}

/// Output descriptor of a merge together with its counts
#[derive(Debug, Clone)]
pub struct Merged {
    /// The stream produced
    pub file: MergeFile,
    /// Record counts
    pub stats: MergeStats,
}

/// Where an input's colors land in the output color vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    /// Zero-width input: OR a single bit into the first color word
    Bit(u64),
    /// Copy the input's color words starting at this word offset
    Slice(usize),
}

impl Placement {
    /// Combine an input record's colors into the output record's colors
    #[inline]
    pub(crate) fn apply(self, out: &mut [u64], colors: &[u64]) {
        match self {
            Placement::Bit(mask) => out[0] |= mask,
            Placement::Slice(offset) => out[offset..offset + colors.len()].copy_from_slice(colors),
        }
    }
}

/// An open input stream and the placement of its colors
pub(crate) struct Source {
    pub(crate) stream: RecordStream,
    pub(crate) placement: Placement,
}

impl Source {
    pub(crate) fn open(file: &MergeFile, placement: Placement, options: &MergeOptions) -> Result<Self> {
        Ok(Self {
            stream: RecordStream::open(file.path(), file.layout(), options.input_records)?,
            placement,
        })
    }

    /// Fold the head record into the output and advance
    #[inline]
    pub(crate) fn emit_head(&mut self, out: &mut MergeOutput) -> Result<()> {
        let key = self.stream.head_record()[0];
        let (colors, _) = out.colors_for(key)?;
        self.placement.apply(colors, self.stream.head_colors());
        self.stream.advance()
    }
}

/// Delete merge inputs after success when requested
pub(crate) fn cleanup_inputs<'a>(
    inputs: impl IntoIterator<Item = &'a MergeFile>,
    options: &MergeOptions,
) -> Result<()> {
    if options.remove_inputs {
        for file in inputs {
            remove_file(file.path())?;
        }
    }
    Ok(())
}

/// Check that the keys of a merged stream strictly ascend
///
/// Streams the file block by block; returns `false` on the first pair of
/// records whose keys are not strictly increasing.
pub fn check_keys_sorted(path: impl AsRef<Path>, layout: RecordLayout) -> Result<bool> {
    let mut reader = WordReader::open(path)?;
    let mut block = vec![0u64; INPUT_BUFFER_RECORDS * layout.stride()];
    let mut last: Option<u64> = None;
    loop {
        let n = reader.read_words(&mut block)?;
        if n % layout.stride() != 0 {
            return Err(BreizhError::Misaligned {
                path: reader.path().to_path_buf(),
                words: n,
                stride: layout.stride(),
            });
        }
        let records = RecordSlice::new(&block[..n], layout);
        for i in 0..records.len() {
            let key = records.key(i);
            if matches!(last, Some(prev) if key <= prev) {
                return Ok(false);
            }
            last = Some(key);
        }
        if reader.is_eof() {
            return Ok(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::write_all_words;
    use tempfile::TempDir;

    #[test]
    fn test_placement_apply() {
        let mut out = [0u64; 4];
        Placement::Bit(0b100).apply(&mut out, &[]);
        Placement::Bit(0b001).apply(&mut out, &[]);
        assert_eq!(out[0], 0b101);
        Placement::Slice(2).apply(&mut out, &[7, 8]);
        assert_eq!(out, [0b101, 0, 7, 8]);
    }

    #[test]
    fn test_check_keys_sorted() {
        let tmp = TempDir::new().unwrap();
        let sorted = tmp.path().join("sorted.raw");
        let dup = tmp.path().join("dup.raw");
        write_all_words(&sorted, &[1, 9, 2, 9, 3, 9]).unwrap();
        write_all_words(&dup, &[1, 9, 2, 9, 2, 8]).unwrap();
        assert!(check_keys_sorted(&sorted, RecordLayout::new(1)).unwrap());
        assert!(!check_keys_sorted(&dup, RecordLayout::new(1)).unwrap());
    }

    #[test]
    fn test_stats_add() {
        let mut total = MergeStats::default();
        total.add(&MergeStats { input_records: 3, output_records: 2 });
        total.add(&MergeStats { input_records: 5, output_records: 4 });
        assert_eq!(total, MergeStats { input_records: 8, output_records: 6 });
    }
}
