//! Two-way merge of sorted streams
//!
//! Covers the whole pairwise family:
//! - two zero-width (raw minimizer) inputs: the first input becomes bit 0
//!   and the second bit 1 of a single color word;
//! - two inputs of equal width `n`: output width `2n`;
//! - inputs of widths `n1 > n2`: output width `n1 + n2`, the wider input
//!   must come first.
//!
//! In every case the first input's colors occupy the low words of the
//! output and the side that did not contribute to a key stays zero.

use std::path::Path;

use tracing::debug;

use crate::constants::COLORS_PER_WORD;
use crate::error::{BreizhError, Result};
use crate::merge::{cleanup_inputs, MergeOptions, MergeOutput, MergeStats, Merged, Placement, Source};
use crate::merge_file::{ColorSample, MergeFile};
use crate::record::RecordLayout;

/// Merge two key-sorted streams into `output`
///
/// # Errors
/// [`BreizhError::WidthOrder`] if `first` is narrower than `second`,
/// [`BreizhError::WidthMismatch`] if only `second` is a raw minimizer stream,
/// plus any I/O error.
pub fn merge_pairwise(
    first: &MergeFile,
    second: &MergeFile,
    output: impl AsRef<Path>,
    options: &MergeOptions,
) -> Result<Merged> {
    let output = output.as_ref();
    if first.numb_colors < second.numb_colors {
        return Err(BreizhError::WidthOrder {
            first: first.numb_colors,
            second: second.numb_colors,
        });
    }

    // Color layout of the output: placements and bit offsets of both sides
    let (out_words, p1, p2, offset2) = if first.numb_colors == 0 {
        (1, Placement::Bit(1), Placement::Bit(2), 1)
    } else if second.numb_colors == 0 {
        return Err(BreizhError::WidthMismatch {
            path: second.path.clone(),
            expected: first.numb_colors,
            found: 0,
        });
    } else {
        let w1 = first.color_words();
        (
            w1 + second.color_words(),
            Placement::Slice(0),
            Placement::Slice(w1),
            first.numb_colors,
        )
    };

    let mut s1 = Source::open(first, p1, options)?;
    let mut s2 = Source::open(second, p2, options)?;
    let mut out = MergeOutput::create(output, RecordLayout::new(out_words), options.output_records)?;

    loop {
        match (s1.stream.head_key(), s2.stream.head_key()) {
            (Some(v1), Some(v2)) => {
                // Equal heads: stream 1 goes first, stream 2 then amends the record
                if v1 <= v2 {
                    s1.emit_head(&mut out)?;
                } else {
                    s2.emit_head(&mut out)?;
                }
            }
            (Some(_), None) => {
                while !s1.stream.is_exhausted() {
                    s1.emit_head(&mut out)?;
                }
            }
            (None, Some(_)) => {
                while !s2.stream.is_exhausted() {
                    s2.emit_head(&mut out)?;
                }
            }
            (None, None) => break,
        }
    }

    let stats = MergeStats {
        input_records: s1.stream.records_read() + s2.stream.records_read(),
        output_records: out.finish()?,
    };
    drop((s1, s2));
    cleanup_inputs([first, second], options)?;

    let samples: Vec<ColorSample> = first.samples_at(0).chain(second.samples_at(offset2)).collect();
    let file = MergeFile::with_colors(output, out_words * COLORS_PER_WORD, samples);
    debug!(
        "pairwise merge {} + {} -> {} ({} colors, {} records)",
        first.path.display(),
        second.path.display(),
        output.display(),
        file.numb_colors,
        stats.output_records
    );
    Ok(Merged { file, stats })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{read_all_words, write_all_words};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn raw(dir: &Path, name: &str, keys: &[u64]) -> MergeFile {
        let path = dir.join(name);
        write_all_words(&path, keys).unwrap();
        MergeFile::minimizers(path, PathBuf::from(name))
    }

    fn colored(dir: &Path, name: &str, numb_colors: usize, words: &[u64], nsamples: usize) -> MergeFile {
        let path = dir.join(name);
        write_all_words(&path, words).unwrap();
        let samples = (0..nsamples)
            .map(|bit| ColorSample { bit, source: format!("{}#{}", name, bit).into() })
            .collect();
        MergeFile::with_colors(path, numb_colors, samples)
    }

    #[test]
    fn test_two_raw_streams_become_two_bits() {
        let tmp = TempDir::new().unwrap();
        let a = raw(tmp.path(), "a.raw", &[1, 3, 5]);
        let b = raw(tmp.path(), "b.raw", &[2, 3, 6]);
        let out = tmp.path().join("ab.raw");

        let merged = merge_pairwise(&a, &b, &out, &MergeOptions::default()).unwrap();
        assert_eq!(
            read_all_words(&out).unwrap(),
            vec![1, 0x1, 2, 0x2, 3, 0x3, 5, 0x1, 6, 0x2]
        );
        assert_eq!(merged.file.numb_colors, 64);
        assert_eq!(merged.file.real_colors, 2);
        assert_eq!(merged.file.samples[1].bit, 1);
        assert_eq!(merged.stats, MergeStats { input_records: 6, output_records: 5 });
    }

    #[test]
    fn test_equal_widths_concatenate() {
        let tmp = TempDir::new().unwrap();
        let a = colored(tmp.path(), "a.raw", 64, &[10, 0xF, 20, 0x1], 4);
        let b = colored(tmp.path(), "b.raw", 64, &[10, 0x3, 30, 0x2], 2);
        let out = tmp.path().join("ab.raw");

        let merged = merge_pairwise(&a, &b, &out, &MergeOptions::default()).unwrap();
        assert_eq!(
            read_all_words(&out).unwrap(),
            vec![10, 0xF, 0x3, 20, 0x1, 0, 30, 0, 0x2]
        );
        assert_eq!(merged.file.numb_colors, 128);
        assert_eq!(merged.file.real_colors, 6);
        assert_eq!(merged.file.samples[4].bit, 64);
    }

    #[test]
    fn test_unequal_widths() {
        let tmp = TempDir::new().unwrap();
        let a = colored(tmp.path(), "a.raw", 128, &[5, 1, 2, 7, 3, 4], 70);
        let b = colored(tmp.path(), "b.raw", 64, &[7, 9], 1);
        let out = tmp.path().join("ab.raw");

        let merged = merge_pairwise(&a, &b, &out, &MergeOptions::default()).unwrap();
        assert_eq!(read_all_words(&out).unwrap(), vec![5, 1, 2, 0, 7, 3, 4, 9]);
        assert_eq!(merged.file.numb_colors, 192);
        assert_eq!(merged.file.real_colors, 71);
    }

    #[test]
    fn test_narrower_first_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let a = colored(tmp.path(), "a.raw", 64, &[1, 1], 1);
        let b = colored(tmp.path(), "b.raw", 128, &[1, 1, 1], 1);
        let err = merge_pairwise(&a, &b, tmp.path().join("x.raw"), &MergeOptions::default()).unwrap_err();
        assert!(matches!(err, BreizhError::WidthOrder { first: 64, second: 128 }));
    }

    #[test]
    fn test_long_streams_across_buffer_boundaries() {
        let tmp = TempDir::new().unwrap();
        let evens: Vec<u64> = (0..5000).map(|i| i * 2).collect();
        let threes: Vec<u64> = (0..3000).map(|i| i * 3).collect();
        let a = raw(tmp.path(), "a.raw", &evens);
        let b = raw(tmp.path(), "b.raw", &threes);
        let out = tmp.path().join("ab.raw");
        let options = MergeOptions { remove_inputs: true, input_records: 7, output_records: 5 };

        merge_pairwise(&a, &b, &out, &options).unwrap();
        let words = read_all_words(&out).unwrap();
        let mut expected = Vec::new();
        for key in 0..10_000u64 {
            let bits = (key % 2 == 0) as u64 | (((key % 3 == 0) && key < 9000) as u64) << 1;
            if bits != 0 {
                expected.extend([key, bits]);
            }
        }
        assert_eq!(words, expected);
        assert!(!a.path.exists());
        assert!(!b.path.exists());
    }
}
