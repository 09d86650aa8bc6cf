//! Terminal merge splitting keys into a dense and a sparse output
//!
//! The final pass unions the colors of (at most) two streams and, once the
//! full color set of a key is known, sends it either to the dense output as
//! a bitmap or to the sparse output as a list of color indices (see
//! [`SparseLayout`]). A single input is split the same way.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::constants::COLORS_PER_WORD;
use crate::error::{BreizhError, Result};
use crate::merge::sparse::{SparseLayout, SparseWriter};
use crate::merge::{cleanup_inputs, MergeOptions, MergeOutput, MergeStats, Placement, Source};
use crate::merge_file::{ColorSample, MergeFile};
use crate::record::{popcount, RecordLayout};

/// Outputs of the final merge
#[derive(Debug, Clone)]
pub struct FinalMerge {
    /// Dense stream, carrying the full color space and its samples
    pub dense: MergeFile,
    /// Sparse stream
    pub sparse: PathBuf,
    /// Encoding of the sparse stream
    pub layout: SparseLayout,
    /// Keys written to the dense stream
    pub dense_records: u64,
    /// Keys written to the sparse stream
    pub sparse_records: u64,
    /// Record counts over both outputs
    pub stats: MergeStats,
}

/// Merge one or two colored streams into a dense and a sparse output
///
/// With two inputs the wider one must come first.
///
/// # Errors
/// [`BreizhError::InputCount`] unless 1 or 2 inputs are given,
/// [`BreizhError::WidthOrder`] if the inputs are out of order,
/// [`BreizhError::WidthMismatch`] if an input carries no colors.
pub fn merge_final(
    inputs: &[MergeFile],
    dense_output: impl AsRef<Path>,
    sparse_output: impl AsRef<Path>,
    options: &MergeOptions,
) -> Result<FinalMerge> {
    let dense_output = dense_output.as_ref();
    let sparse_output = sparse_output.as_ref();
    if inputs.is_empty() || inputs.len() > 2 {
        return Err(BreizhError::InputCount {
            merger: "final merge",
            min: 1,
            max: 2,
            actual: inputs.len(),
        });
    }
    if let [first, second] = inputs {
        if first.numb_colors < second.numb_colors {
            return Err(BreizhError::WidthOrder {
                first: first.numb_colors,
                second: second.numb_colors,
            });
        }
    }
    if let Some(raw) = inputs.iter().find(|f| f.numb_colors == 0) {
        return Err(BreizhError::WidthMismatch {
            path: raw.path.clone(),
            expected: COLORS_PER_WORD,
            found: 0,
        });
    }

    let mut sources = Vec::with_capacity(inputs.len());
    let mut offset = 0;
    for file in inputs {
        sources.push(Source::open(file, Placement::Slice(offset), options)?);
        offset += file.color_words();
    }
    let total_colors = offset * COLORS_PER_WORD;
    let layout = SparseLayout::new(total_colors);
    let mut dense = MergeOutput::create(dense_output, RecordLayout::new(offset), options.output_records)?;
    let mut sparse = SparseWriter::create(sparse_output, layout, options.output_records)?;

    let mut split = Splitter {
        layout,
        colors: vec![0; offset],
        key: None,
    };
    loop {
        let mut min: Option<(u64, usize)> = None;
        for (i, source) in sources.iter().enumerate() {
            if let Some(key) = source.stream.head_key() {
                if min.map_or(true, |(min_key, _)| key < min_key) {
                    min = Some((key, i));
                }
            }
        }
        let Some((key, i)) = min else { break };
        if split.key != Some(key) {
            split.emit(&mut dense, &mut sparse)?;
            split.key = Some(key);
        }
        let source = &mut sources[i];
        source.placement.apply(&mut split.colors, source.stream.head_colors());
        source.stream.advance()?;
    }
    split.emit(&mut dense, &mut sparse)?;

    let input_records = sources.iter().map(|s| s.stream.records_read()).sum();
    drop(sources);
    let dense_records = dense.finish()?;
    let sparse_records = sparse.finish()?;
    cleanup_inputs(inputs, options)?;

    let mut bit = 0;
    let mut samples: Vec<ColorSample> = Vec::new();
    for file in inputs {
        samples.extend(file.samples_at(bit));
        bit += file.numb_colors;
    }
    debug!(
        "final merge: {} colors, {} dense + {} sparse keys (sparse up to {} colors, {}-bit indices)",
        total_colors,
        dense_records,
        sparse_records,
        layout.dense_threshold(),
        layout.bits()
    );
    Ok(FinalMerge {
        dense: MergeFile::with_colors(dense_output, total_colors, samples),
        sparse: sparse_output.to_path_buf(),
        layout,
        dense_records,
        sparse_records,
        stats: MergeStats {
            input_records,
            output_records: dense_records + sparse_records,
        },
    })
}

/// Colors of the key being assembled
struct Splitter {
    layout: SparseLayout,
    colors: Vec<u64>,
    key: Option<u64>,
}

impl Splitter {
    /// Route the pending key to its output and clear the color vector
    fn emit(&mut self, dense: &mut MergeOutput, sparse: &mut SparseWriter) -> Result<()> {
        let Some(key) = self.key.take() else {
            return Ok(());
        };
        let density = popcount(&self.colors) as usize;
        if self.layout.is_sparse(density) {
            sparse.push(key, &self.colors, density)?;
        } else {
            let (colors, _) = dense.colors_for(key)?;
            colors.copy_from_slice(&self.colors);
        }
        self.colors.fill(0);
        Ok(())
    }
}
