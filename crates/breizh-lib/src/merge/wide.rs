//! N-way merge of equal-width colored streams
//!
//! Input `i` of width `w` words owns the slice `[i*w, (i+1)*w)` of the
//! output color vector, so the output width is `w * n` and colors are
//! concatenated rather than OR'd. A fresh key starts from a zeroed vector;
//! a continuation only overwrites the contributing input's slice.
//!
//! The smallest head is found with a linear scan for small fan-in and with
//! a binary min-heap keyed by `(key, input)` above [`SCAN_THRESHOLD`]
//! inputs. Both select the same input, so the output is identical.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::path::Path;

use tracing::debug;

use crate::constants::{COLORS_PER_WORD, SCAN_THRESHOLD};
use crate::error::{BreizhError, Result};
use crate::merge::{cleanup_inputs, MergeOptions, MergeOutput, MergeStats, Merged, Placement, Source};
use crate::merge_file::{ColorSample, MergeFile};
use crate::record::RecordLayout;

/// Merge any number of streams sharing one color width of at least 64 colors
///
/// # Errors
/// [`BreizhError::InputCount`] for no input, [`BreizhError::WidthMismatch`]
/// if the inputs do not all share a non-zero width.
pub fn merge_wide(inputs: &[MergeFile], output: impl AsRef<Path>, options: &MergeOptions) -> Result<Merged> {
    let output = output.as_ref();
    let Some(head) = inputs.first() else {
        return Err(BreizhError::InputCount {
            merger: "wide merge",
            min: 1,
            max: usize::MAX,
            actual: 0,
        });
    };
    let width = head.numb_colors;
    if let Some(bad) = inputs.iter().find(|f| f.numb_colors != width || f.numb_colors == 0) {
        return Err(BreizhError::WidthMismatch {
            path: bad.path.clone(),
            expected: width.max(COLORS_PER_WORD),
            found: bad.numb_colors,
        });
    }

    let words = head.color_words();
    let mut sources = Vec::with_capacity(inputs.len());
    for (i, file) in inputs.iter().enumerate() {
        sources.push(Source::open(file, Placement::Slice(i * words), options)?);
    }
    let out_words = words * inputs.len();
    let mut out = MergeOutput::create(output, RecordLayout::new(out_words), options.output_records)?;

    if sources.len() <= SCAN_THRESHOLD {
        merge_by_scan(&mut sources, &mut out)?;
    } else {
        merge_by_heap(&mut sources, &mut out)?;
    }

    let stats = MergeStats {
        input_records: sources.iter().map(|s| s.stream.records_read()).sum(),
        output_records: out.finish()?,
    };
    drop(sources);
    cleanup_inputs(inputs, options)?;

    let samples: Vec<ColorSample> = inputs
        .iter()
        .enumerate()
        .flat_map(|(i, f)| f.samples_at(i * width))
        .collect();
    let file = MergeFile::with_colors(output, out_words * COLORS_PER_WORD, samples);
    debug!(
        "wide merge of {} files x {} colors -> {} ({} records)",
        inputs.len(),
        width,
        output.display(),
        stats.output_records
    );
    Ok(Merged { file, stats })
}

fn merge_by_scan(sources: &mut [Source], out: &mut MergeOutput) -> Result<()> {
    let mut active: Vec<usize> = (0..sources.len())
        .filter(|&i| !sources[i].stream.is_exhausted())
        .collect();
    while !active.is_empty() {
        let mut best = 0;
        let mut best_key = u64::MAX;
        for (slot, &i) in active.iter().enumerate() {
            // Inputs are kept in index order, so ties go to the lowest input
            if let Some(key) = sources[i].stream.head_key() {
                if slot == 0 || key < best_key {
                    best = slot;
                    best_key = key;
                }
            }
        }
        let i = active[best];
        sources[i].emit_head(out)?;
        if sources[i].stream.is_exhausted() {
            active.remove(best);
        }
    }
    Ok(())
}

fn merge_by_heap(sources: &mut [Source], out: &mut MergeOutput) -> Result<()> {
    let mut heap: BinaryHeap<Reverse<(u64, usize)>> = sources
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.stream.head_key().map(|key| Reverse((key, i))))
        .collect();
    while let Some(Reverse((_, i))) = heap.pop() {
        sources[i].emit_head(out)?;
        if let Some(key) = sources[i].stream.head_key() {
            heap.push(Reverse((key, i)));
        }
    }
    Ok(())
}
