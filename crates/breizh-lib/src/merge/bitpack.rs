//! N-way bit-packing merge of raw minimizer streams
//!
//! Turns "which file" into "which bit": up to 64 zero-width inputs are
//! merged into one stream of `(key, color word)` records where input `i`
//! sets bit `i`. The number of inputs is bounded, so the smallest head is
//! found with a linear scan over the active inputs.

use std::path::Path;

use tracing::debug;

use crate::constants::{COLORS_PER_WORD, MAX_BITPACK_INPUTS};
use crate::error::{BreizhError, Result};
use crate::merge::{cleanup_inputs, MergeOptions, MergeOutput, MergeStats, Merged, Placement, Source};
use crate::merge_file::{ColorSample, MergeFile};
use crate::record::RecordLayout;

/// Merge 1 to 64 raw minimizer streams into a single 64-color stream
///
/// # Errors
/// [`BreizhError::InputCount`] for 0 or more than 64 inputs,
/// [`BreizhError::WidthMismatch`] if an input already carries colors.
pub fn merge_bitpack(inputs: &[MergeFile], output: impl AsRef<Path>, options: &MergeOptions) -> Result<Merged> {
    let output = output.as_ref();
    if inputs.is_empty() || inputs.len() > MAX_BITPACK_INPUTS {
        return Err(BreizhError::InputCount {
            merger: "bit-packing merge",
            min: 1,
            max: MAX_BITPACK_INPUTS,
            actual: inputs.len(),
        });
    }
    if let Some(colored) = inputs.iter().find(|f| f.numb_colors != 0) {
        return Err(BreizhError::WidthMismatch {
            path: colored.path.clone(),
            expected: 0,
            found: colored.numb_colors,
        });
    }

    let mut active = Vec::with_capacity(inputs.len());
    for (i, file) in inputs.iter().enumerate() {
        active.push(Source::open(file, Placement::Bit(1u64 << i), options)?);
    }
    let mut out = MergeOutput::create(output, RecordLayout::new(1), options.output_records)?;
    let mut input_records = 0;

    loop {
        // Exhausted inputs leave the active set; order within it does not matter
        let mut i = 0;
        while i < active.len() {
            if active[i].stream.is_exhausted() {
                input_records += active.swap_remove(i).stream.records_read();
            } else {
                i += 1;
            }
        }
        if active.is_empty() {
            break;
        }

        let mut min: Option<(u64, usize)> = None;
        for (i, source) in active.iter().enumerate() {
            if let Some(key) = source.stream.head_key() {
                if min.map_or(true, |(min_key, _)| key < min_key) {
                    min = Some((key, i));
                }
            }
        }
        if let Some((_, i)) = min {
            active[i].emit_head(&mut out)?;
        }
    }

    let stats = MergeStats {
        input_records,
        output_records: out.finish()?,
    };
    cleanup_inputs(inputs, options)?;

    let samples: Vec<ColorSample> = inputs
        .iter()
        .enumerate()
        .flat_map(|(i, f)| f.samples_at(i))
        .collect();
    let file = MergeFile::with_colors(output, COLORS_PER_WORD, samples);
    debug!(
        "bit-packing merge of {} files -> {} ({} records)",
        inputs.len(),
        output.display(),
        stats.output_records
    );
    Ok(Merged { file, stats })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{read_all_words, write_all_words};
    use tempfile::TempDir;

    fn raw(dir: &Path, name: &str, keys: &[u64]) -> MergeFile {
        let path = dir.join(name);
        write_all_words(&path, keys).unwrap();
        MergeFile::minimizers(path, name)
    }

    #[test]
    fn test_two_files() {
        let tmp = TempDir::new().unwrap();
        let inputs = vec![
            raw(tmp.path(), "a.raw", &[1, 3, 5]),
            raw(tmp.path(), "b.raw", &[2, 3, 6]),
        ];
        let out = tmp.path().join("out.raw");
        let merged = merge_bitpack(&inputs, &out, &MergeOptions::default()).unwrap();
        assert_eq!(
            read_all_words(&out).unwrap(),
            vec![1, 0x1, 2, 0x2, 3, 0x3, 5, 0x1, 6, 0x2]
        );
        assert_eq!(merged.file.real_colors, 2);
        assert_eq!(merged.file.numb_colors, 64);
    }

    #[test]
    fn test_three_files_share_one_key() {
        let tmp = TempDir::new().unwrap();
        let inputs: Vec<MergeFile> = (0..3)
            .map(|i| raw(tmp.path(), &format!("f{}.raw", i), &[100]))
            .collect();
        let out = tmp.path().join("out.raw");
        merge_bitpack(&inputs, &out, &MergeOptions::default()).unwrap();
        assert_eq!(read_all_words(&out).unwrap(), vec![100, 0b111]);
    }

    #[test]
    fn test_single_input_sets_exactly_one_bit() {
        let tmp = TempDir::new().unwrap();
        let keys: Vec<u64> = (0..2500).map(|i| i * 7 + 1).collect();
        let inputs = vec![raw(tmp.path(), "only.raw", &keys)];
        let out = tmp.path().join("out.raw");
        merge_bitpack(&inputs, &out, &MergeOptions::default()).unwrap();
        let words = read_all_words(&out).unwrap();
        assert_eq!(words.len(), 2 * keys.len());
        for (record, key) in words.chunks_exact(2).zip(&keys) {
            assert_eq!(record[0], *key);
            assert_eq!(record[1], 1);
        }
    }

    #[test]
    fn test_sixty_four_inputs_fill_the_word() {
        let tmp = TempDir::new().unwrap();
        let inputs: Vec<MergeFile> = (0..64u64)
            .map(|i| raw(tmp.path(), &format!("f{}.raw", i), &[i, 1000]))
            .collect();
        let out = tmp.path().join("out.raw");
        let options = MergeOptions { remove_inputs: true, input_records: 1, output_records: 3 };
        let merged = merge_bitpack(&inputs, &out, &options).unwrap();

        let words = read_all_words(&out).unwrap();
        assert_eq!(words.len(), 2 * 65);
        for i in 0..64usize {
            assert_eq!(words[2 * i], i as u64);
            assert_eq!(words[2 * i + 1], 1u64 << i);
        }
        assert_eq!(&words[128..], &[1000, u64::MAX]);
        assert_eq!(merged.file.real_colors, 64);
        assert_eq!(merged.stats.input_records, 128);
        assert!(inputs.iter().all(|f| !f.path.exists()));
    }

    #[test]
    fn test_input_count_limits() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("out.raw");
        let err = merge_bitpack(&[], &out, &MergeOptions::default()).unwrap_err();
        assert!(matches!(err, BreizhError::InputCount { actual: 0, .. }));

        let inputs: Vec<MergeFile> = (0..65)
            .map(|i| raw(tmp.path(), &format!("f{}.raw", i), &[1]))
            .collect();
        let err = merge_bitpack(&inputs, &out, &MergeOptions::default()).unwrap_err();
        assert!(matches!(err, BreizhError::InputCount { actual: 65, max: 64, .. }));
    }
}
