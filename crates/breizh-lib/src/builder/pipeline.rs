//! Index builder orchestration
//!
//! Coordinates the multi-stage pipeline turning N sequence files into a
//! colored minimizer index:
//! 0. Extract one sorted minimizer stream per file
//! 1. Bit-pack groups of 64 streams into 64-color streams (parallel)
//! 2. Merge rounds of `merge_step` equal-width streams (parallel), setting
//!    aside trailing groups that would not match the round's width
//! 3. Fold the set-aside streams and the survivor pairwise, narrowest first
//! 4. Split the last one or two streams into dense and sparse outputs
//! 5. Sort the dense output by `(colors, key)`, move every output in place
//!    and write the color manifest

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::info;

use crate::builder::config::BuildConfiguration;
use crate::builder::extract::{extract_all, ExtractStats};
use crate::constants::MAX_BITPACK_INPUTS;
use crate::error::{BreizhError, IoResultExt, Result};
use crate::external_sort::ExternalSorter;
use crate::merge::{
    merge_bitpack, merge_final, merge_pairwise, merge_wide, FinalMerge, MergeOptions, MergeStats,
    Merged, SparseLayout,
};
use crate::merge_file::{intermediate_name, MergeFile};
use crate::stream::{move_file, Compression};

/// Outputs and counters of a finished build
#[derive(Debug, Clone)]
pub struct IndexSummary {
    /// Dense output, `<output>.<N>c`, plus the codec extension when compressed
    pub dense_path: PathBuf,
    /// Sparse output, `<output>_sparse.<N>c`, plus the codec extension when compressed
    pub sparse_path: PathBuf,
    /// Color manifest, `<output>.colors.tsv`
    pub manifest_path: PathBuf,
    /// Capacity of the color space in bits
    pub numb_colors: usize,
    /// Number of input files (colors actually used)
    pub real_colors: usize,
    /// Encoding of the sparse output
    pub layout: SparseLayout,
    /// Keys in the dense output
    pub dense_records: u64,
    /// Keys in the sparse output
    pub sparse_records: u64,
    /// Record counts summed over all merges
    pub merge_stats: MergeStats,
    /// Extraction counters, absent when extraction was skipped
    pub extract_stats: Option<ExtractStats>,
}

/// Builder for colored minimizer indexes
pub struct IndexBuilder {
    config: BuildConfiguration,
}

impl IndexBuilder {
    /// Create a new index builder with the given configuration
    pub fn new(config: BuildConfiguration) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Configuration of the builder
    pub fn config(&self) -> &BuildConfiguration {
        &self.config
    }

    /// Build the index of `files` under the output prefix `output`
    ///
    /// # Parallelism
    /// The number of threads is controlled by `config.num_threads`:
    /// - `0` — use all available CPU cores (rayon default)
    /// - `N` — use exactly N threads
    pub fn build(&self, files: &[PathBuf], output: impl AsRef<Path>) -> Result<IndexSummary> {
        let output = output.as_ref();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.num_threads)
            .build()
            .map_err(|e| BreizhError::ThreadPool(e.to_string()))?;
        let pool = Arc::new(pool);

        let (split, stats, extract_stats) = pool.install(|| self.merge_all(files))?;

        // Step 5: dense sort, outputs and manifest
        let dense_ready = if self.config.sort_dense_output {
            self.sort_dense(&split, &pool)?
        } else {
            split.dense.path.clone()
        };
        let summary = self.finish(output, split, dense_ready, stats, extract_stats)?;

        // Only removed when nothing was kept in it
        let _ = fs::remove_dir(&self.config.tmp_dirname);
        info!(
            "Index of {} colors written to {}",
            summary.real_colors,
            summary.dense_path.display()
        );
        Ok(summary)
    }

    /// Steps 0 to 4, run inside the rayon thread pool
    fn merge_all(&self, files: &[PathBuf]) -> Result<(FinalMerge, MergeStats, Option<ExtractStats>)> {
        if files.is_empty() {
            return Err(BreizhError::Config("no input files".to_string()));
        }
        if self.config.verbose {
            self.config.print();
        }
        info!("Building colored minimizer index of {} files", files.len());
        let tmp_dir = self.config.tmp_dirname.clone();
        fs::create_dir_all(&tmp_dir).with_path(&tmp_dir)?;

        // Step 0: minimizer streams
        let (minimizer_files, extract_stats) = if self.config.skip_minimizer_step {
            info!("Step 0: using the inputs as minimizer streams");
            let files = files
                .iter()
                .map(|f| MergeFile::minimizers(f.clone(), f.clone()))
                .collect();
            (files, None)
        } else {
            info!("Step 0: extracting minimizers...");
            let (files, stats) = extract_all(files, &tmp_dir, &self.config)?;
            (files, Some(stats))
        };

        let mut stats = MergeStats::default();

        // Step 1: bit-packing
        info!("Step 1: bit-packing {} streams...", minimizer_files.len());
        let stage0 = MergeOptions::removing_inputs(!self.config.keep_minimizer_files);
        let packed = self.merge_groups(&minimizer_files, MAX_BITPACK_INPUTS, 0, &stage0, |group, path, options| {
            merge_bitpack(group, path, options)
        })?;
        let mut current = collect_stats(packed, &mut stats);
        info!("  {} streams of 64 colors", current.len());

        // Step 2: wide merge rounds
        let intermediate = MergeOptions::removing_inputs(!self.config.keep_merge_files);
        let step = self.config.merge_step;
        let mut leftovers: Vec<MergeFile> = Vec::new();
        let mut round = 1;
        while current.len() > 1 {
            let full = current.len() / step * step;
            let merge_count = if full == 0 { current.len() } else { full };
            let (grouped, rest) = current.split_at(merge_count);
            if !rest.is_empty() {
                info!("  set aside {} streams of {} colors", rest.len(), rest[0].numb_colors);
            }
            leftovers.extend_from_slice(rest);
            let merged = self.merge_groups(grouped, step, round, &intermediate, |group, path, options| {
                merge_wide(group, path, options)
            })?;
            current = collect_stats(merged, &mut stats);
            info!("Step 2, round {}: {} streams of {} colors", round, current.len(), current[0].numb_colors);
            round += 1;
        }

        // Step 3: pairwise folding of the set-aside streams and the survivor
        let mut pool = leftovers;
        pool.extend(current);
        let mut index = 0;
        while pool.len() > 2 {
            let a = pool.remove(0);
            let b = pool.remove(0);
            let (wide, narrow) = wider_first(a, b);
            let real_colors = wide.real_colors + narrow.real_colors;
            let name = intermediate_name(round, index, real_colors, self.config.intermediate_extension());
            let merged = merge_pairwise(&wide, &narrow, tmp_dir.join(name), &intermediate)?;
            stats.add(&merged.stats);
            info!("Step 3: {} colors", merged.file.numb_colors);
            pool.insert(0, merged.file);
            index += 1;
        }

        // Step 4: dense/sparse split
        let mut inputs = pool;
        if inputs.len() == 2 && inputs[0].numb_colors < inputs[1].numb_colors {
            inputs.swap(0, 1);
        }
        let real_colors: usize = inputs.iter().map(|f| f.real_colors).sum();
        let dense_tmp = tmp_dir.join(format!("final_dense.{}c{}", real_colors, self.config.intermediate_extension()));
        let sparse_tmp = tmp_dir.join(format!("final_sparse.{}c{}", real_colors, self.config.intermediate_extension()));
        info!("Step 4: splitting {} streams into dense and sparse outputs...", inputs.len());
        let split = merge_final(&inputs, &dense_tmp, &sparse_tmp, &intermediate)?;
        stats.add(&split.stats);
        info!(
            "  {} dense keys, {} sparse keys (up to {} colors)",
            split.dense_records,
            split.sparse_records,
            split.layout.dense_threshold()
        );

        Ok((split, stats, extract_stats))
    }

    /// Sort the dense output by `(colors, key)`, one worker per pool thread
    ///
    /// Runs outside `pool.install` so that parallel chunk sorts find the
    /// pool idle.
    fn sort_dense(&self, split: &FinalMerge, pool: &Arc<ThreadPool>) -> Result<PathBuf> {
        info!("Step 5: sorting dense output...");
        let tmp_dir = &self.config.tmp_dirname;
        let sorted = tmp_dir.join(format!(
            "final_dense_sorted.{}c{}",
            split.dense.real_colors,
            self.config.intermediate_extension()
        ));
        let sorter = ExternalSorter::new(
            tmp_dir,
            self.config.ram_limit_mib,
            pool.current_num_threads(),
            self.config.sort_algorithm,
        )?
        .with_thread_pool(Arc::clone(pool));
        sorter.sort_file(&split.dense.path, &sorted, split.dense.layout(), self.config.keep_merge_files)?;
        Ok(sorted)
    }

    /// Run `merge` on consecutive groups of `group_size` files in parallel
    fn merge_groups<F>(
        &self,
        files: &[MergeFile],
        group_size: usize,
        round: usize,
        options: &MergeOptions,
        merge: F,
    ) -> Result<Vec<Merged>>
    where
        F: Fn(&[MergeFile], PathBuf, &MergeOptions) -> Result<Merged> + Sync,
    {
        let ext = self.config.intermediate_extension();
        let tmp_dir = &self.config.tmp_dirname;
        files
            .par_chunks(group_size)
            .enumerate()
            .map(|(i, group)| {
                let real_colors = group.iter().map(|f| f.real_colors).sum();
                merge(group, tmp_dir.join(intermediate_name(round, i, real_colors, ext)), options)
            })
            .collect()
    }

    /// Move the outputs in place and write the manifest
    fn finish(
        &self,
        output: &Path,
        split: FinalMerge,
        dense_ready: PathBuf,
        merge_stats: MergeStats,
        extract_stats: Option<ExtractStats>,
    ) -> Result<IndexSummary> {
        let real_colors = split.dense.real_colors;
        // Compressed outputs keep the codec extension they were written with
        let ext = match self.config.intermediate_compression {
            Compression::Raw => "",
            compression => compression.extension(),
        };
        let dense_path = with_suffix(output, &format!(".{}c{}", real_colors, ext));
        let sparse_path = with_suffix(output, &format!("_sparse.{}c{}", real_colors, ext));
        let manifest_path = with_suffix(output, ".colors.tsv");

        write_manifest(&manifest_path, &split.dense)?;
        move_file(&split.sparse, &sparse_path)?;
        move_file(&dense_ready, &dense_path)?;

        Ok(IndexSummary {
            dense_path,
            sparse_path,
            manifest_path,
            numb_colors: split.dense.numb_colors,
            real_colors,
            layout: split.layout,
            dense_records: split.dense_records,
            sparse_records: split.sparse_records,
            merge_stats,
            extract_stats,
        })
    }
}

/// Build the colored minimizer index of `files` under the prefix `output`
pub fn generate_minimizers(
    files: &[PathBuf],
    output: impl AsRef<Path>,
    config: &BuildConfiguration,
) -> Result<IndexSummary> {
    IndexBuilder::new(config.clone())?.build(files, output)
}

fn collect_stats(merged: Vec<Merged>, stats: &mut MergeStats) -> Vec<MergeFile> {
    merged
        .into_iter()
        .map(|m| {
            stats.add(&m.stats);
            m.file
        })
        .collect()
}

fn wider_first(a: MergeFile, b: MergeFile) -> (MergeFile, MergeFile) {
    if a.numb_colors >= b.numb_colors {
        (a, b)
    } else {
        (b, a)
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Write `bit<TAB>source` for every color of `file`, by bit index
fn write_manifest(path: &Path, file: &MergeFile) -> Result<()> {
    let mut samples: Vec<_> = file.samples.iter().collect();
    samples.sort_by_key(|s| s.bit);
    let out = File::create(path).with_path(path)?;
    let mut writer = BufWriter::new(out);
    for sample in samples {
        writeln!(writer, "{}\t{}", sample.bit, sample.source.display()).with_path(path)?;
    }
    writer.flush().with_path(path)
}
