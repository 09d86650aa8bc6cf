//! Per-file minimizer extraction
//!
//! Every sequence file becomes one sorted, deduplicated stream of minimizer
//! keys with no color words: the zero-color input of the first merge stage.
//!
//! Keys are collected in a buffer bounded by the RAM budget shared between
//! threads. A full buffer is sorted, deduplicated and spilled as a run next
//! to the output; runs are then merged 64 at a time, dropping duplicates.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::ffi::OsString;
use std::fs;
use std::mem::size_of;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, info};

use crate::builder::config::BuildConfiguration;
use crate::builder::parse::parse_sequences;
use crate::constants::{EXTERNAL_MERGE_FAN_IN, INPUT_BUFFER_RECORDS, MIB};
use crate::error::Result;
use crate::external_sort::SortAlgorithm;
use crate::merge::RecordStream;
use crate::merge_file::MergeFile;
use crate::minimizer::MinimizerScanner;
use crate::record::RecordLayout;
use crate::stream::{remove_file, write_all_words, WordWriter};

/// Counters of one extraction
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExtractStats {
    /// Sequences read
    pub sequences: u64,
    /// Bases read
    pub bases: u64,
    /// Distinct minimizers written
    pub minimizers: u64,
}

impl ExtractStats {
    fn add(&mut self, other: &ExtractStats) {
        self.sequences += other.sequences;
        self.bases += other.bases;
        self.minimizers += other.minimizers;
    }
}

/// Keys buffered per extraction: half of this thread's share of the budget
///
/// The other half is left for the sort and I/O buffers.
fn key_budget(config: &BuildConfiguration) -> usize {
    let threads = rayon::current_num_threads().max(1);
    (config.ram_limit_mib * MIB / (2 * threads * size_of::<u64>())).max(1)
}

/// Extract the minimizers of `input` into the zero-color stream `output`
///
/// Memory use is bounded by `config.ram_limit_mib` divided among the threads
/// of the current rayon pool.
pub fn extract_minimizers(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    config: &BuildConfiguration,
) -> Result<ExtractStats> {
    extract_bounded(input.as_ref(), output.as_ref(), config, key_budget(config))
}

fn extract_bounded(
    input: &Path,
    output: &Path,
    config: &BuildConfiguration,
    max_keys: usize,
) -> Result<ExtractStats> {
    let mut scanner = MinimizerScanner::new(config.k, config.m, config.seed);
    if !config.canonical {
        scanner = scanner.forward_strand();
    }

    let mut stats = ExtractStats::default();
    let mut runs = SortedRuns::new(output, config.sort_algorithm, max_keys);
    parse_sequences(input, |_name, seq| {
        stats.sequences += 1;
        stats.bases += seq.len() as u64;
        let mut spilled = Ok(());
        scanner.scan(seq, |key| {
            if spilled.is_ok() {
                spilled = runs.push(key);
            }
        });
        spilled
    })?;
    stats.minimizers = runs.finish()?;

    debug!(
        "{}: {} sequences, {} bases, {} minimizers",
        input.display(),
        stats.sequences,
        stats.bases,
        stats.minimizers
    );
    Ok(stats)
}

/// Bounded key buffer spilling sorted, deduplicated runs of `output`
struct SortedRuns<'a> {
    output: &'a Path,
    algorithm: SortAlgorithm,
    max_keys: usize,
    keys: Vec<u64>,
    runs: Vec<PathBuf>,
    /// Run files created so far, consumed or not
    next_run: usize,
}

impl<'a> SortedRuns<'a> {
    fn new(output: &'a Path, algorithm: SortAlgorithm, max_keys: usize) -> Self {
        Self {
            output,
            algorithm,
            max_keys,
            keys: Vec::new(),
            runs: Vec::new(),
            next_run: 0,
        }
    }

    fn push(&mut self, key: u64) -> Result<()> {
        self.keys.push(key);
        if self.keys.len() >= self.max_keys {
            self.spill()?;
        }
        Ok(())
    }

    fn sort_keys(&mut self) {
        self.algorithm.sort_by(&mut self.keys, |a, b| a.cmp(b));
        self.keys.dedup();
    }

    fn new_run(&mut self) -> PathBuf {
        let path = run_path(self.output, self.next_run);
        self.next_run += 1;
        path
    }

    fn spill(&mut self) -> Result<()> {
        self.sort_keys();
        let path = self.new_run();
        write_all_words(&path, &self.keys)?;
        self.runs.push(path);
        self.keys.clear();
        Ok(())
    }

    /// Write the output and return its number of keys
    fn finish(&mut self) -> Result<u64> {
        if self.runs.is_empty() {
            self.sort_keys();
            write_all_words(self.output, &self.keys)?;
            return Ok(self.keys.len() as u64);
        }
        if !self.keys.is_empty() {
            self.spill()?;
        }
        self.keys = Vec::new();

        let mut pending = std::mem::take(&mut self.runs);
        while pending.len() > EXTERNAL_MERGE_FAN_IN {
            let mut next = Vec::with_capacity(pending.len().div_ceil(EXTERNAL_MERGE_FAN_IN));
            for group in pending.chunks(EXTERNAL_MERGE_FAN_IN) {
                let path = self.new_run();
                merge_runs(group, &path)?;
                next.push(path);
            }
            pending = next;
        }
        merge_runs(&pending, self.output)
    }
}

impl Drop for SortedRuns<'_> {
    fn drop(&mut self) {
        // Runs left behind by a failed extraction
        for id in 0..self.next_run {
            let _ = fs::remove_file(run_path(self.output, id));
        }
    }
}

fn run_path(output: &Path, id: usize) -> PathBuf {
    let mut name = OsString::from(output.as_os_str());
    name.push(format!(".run.{}", id));
    PathBuf::from(name)
}

/// Merge ascending key runs into `output`, dropping duplicates and the runs
fn merge_runs(inputs: &[PathBuf], output: &Path) -> Result<u64> {
    let layout = RecordLayout::new(0);
    let mut streams = Vec::with_capacity(inputs.len());
    for path in inputs {
        streams.push(RecordStream::open(path, layout, INPUT_BUFFER_RECORDS)?);
    }
    let mut heap = BinaryHeap::with_capacity(streams.len());
    for (idx, stream) in streams.iter().enumerate() {
        if let Some(key) = stream.head_key() {
            heap.push(Reverse((key, idx)));
        }
    }

    let mut writer = WordWriter::create(output)?;
    let mut last = None;
    let mut written = 0u64;
    while let Some(Reverse((key, idx))) = heap.pop() {
        if last != Some(key) {
            writer.write_words(&[key])?;
            last = Some(key);
            written += 1;
        }
        let stream = &mut streams[idx];
        stream.advance()?;
        if let Some(next) = stream.head_key() {
            heap.push(Reverse((next, idx)));
        }
    }
    writer.finish()?;
    drop(streams);

    for path in inputs {
        remove_file(path)?;
    }
    Ok(written)
}

/// Extract every file in parallel into `out_dir`
///
/// Returns one zero-color descriptor per input, in input order.
pub fn extract_all(
    files: &[PathBuf],
    out_dir: &Path,
    config: &BuildConfiguration,
) -> Result<(Vec<MergeFile>, ExtractStats)> {
    let ext = config.intermediate_extension();
    let results: Vec<(MergeFile, ExtractStats)> = files
        .par_iter()
        .enumerate()
        .map(|(i, input)| {
            let output = out_dir.join(format!("minimizers_{:05}{}", i, ext));
            let stats = extract_minimizers(input, &output, config)?;
            Ok((MergeFile::minimizers(output, input.clone()), stats))
        })
        .collect::<Result<_>>()?;

    let mut total = ExtractStats::default();
    let mut minimizer_files = Vec::with_capacity(results.len());
    for (file, stats) in results {
        total.add(&stats);
        minimizer_files.push(file);
    }
    info!(
        "Extracted {} minimizers from {} sequences in {} files",
        total.minimizers,
        total.sequences,
        files.len()
    );
    Ok((minimizer_files, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::read_all_words;
    use std::fs;
    use tempfile::TempDir;

    fn small_config() -> BuildConfiguration {
        BuildConfiguration {
            k: 15,
            m: 7,
            ..BuildConfiguration::default()
        }
    }

    #[test]
    fn test_keys_sorted_and_unique() {
        let tmp = TempDir::new().unwrap();
        let fasta = tmp.path().join("a.fa");
        fs::write(
            &fasta,
            ">s1\nACGTTGCATGCATGCAAGCTTAGCGGATCCGATCGATTTACA\n>s2\nACGTTGCATGCATGCAAGCTTAGCGG\n",
        )
        .unwrap();
        let out = tmp.path().join("a.raw");
        let stats = extract_minimizers(&fasta, &out, &small_config()).unwrap();
        assert_eq!(stats.sequences, 2);
        assert_eq!(stats.bases, 66);

        let keys = read_all_words(&out).unwrap();
        assert_eq!(keys.len() as u64, stats.minimizers);
        assert!(!keys.is_empty());
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_extract_all_preserves_order() {
        let tmp = TempDir::new().unwrap();
        let mut files = Vec::new();
        for (i, seq) in ["GGGCCCAAATTTGCGCATATCGCG", "TTTTTTTTTTTTTTTTTTTT", "ACGTACGTACGTACGTACGT"]
            .iter()
            .enumerate()
        {
            let path = tmp.path().join(format!("f{}.fa", i));
            fs::write(&path, format!(">x\n{}\n", seq)).unwrap();
            files.push(path);
        }
        let (outputs, total) = extract_all(&files, tmp.path(), &small_config()).unwrap();
        assert_eq!(outputs.len(), 3);
        for (i, out) in outputs.iter().enumerate() {
            assert_eq!(out.numb_colors, 0);
            assert_eq!(out.samples[0].source, files[i]);
            assert!(out.path.exists());
        }
        assert_eq!(total.sequences, 3);
    }

    #[test]
    fn test_spilled_runs_match_in_memory_extraction() {
        let tmp = TempDir::new().unwrap();
        let fasta = tmp.path().join("long.fa");
        let mut state = 0x2545_F491_4F6C_DD1Du64;
        let seq: String = (0..3000)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                b"ACGT"[(state >> 40) as usize % 4] as char
            })
            .collect();
        // The repeat makes every run hold keys seen in other runs
        fs::write(&fasta, format!(">a\n{}\n>b\n{}\n", seq, seq)).unwrap();
        let config = small_config();

        let whole = tmp.path().join("whole.raw");
        let whole_stats = extract_bounded(&fasta, &whole, &config, usize::MAX).unwrap();

        // Two keys per run: well over 64 runs, so two merge passes
        let spilled = tmp.path().join("spilled.gz");
        let spilled_stats = extract_bounded(&fasta, &spilled, &config, 2).unwrap();

        assert_eq!(spilled_stats, whole_stats);
        assert!(whole_stats.minimizers > 2 * EXTERNAL_MERGE_FAN_IN as u64);
        assert_eq!(read_all_words(&spilled).unwrap(), read_all_words(&whole).unwrap());
        let mut left: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        left.sort();
        assert_eq!(left, ["long.fa", "spilled.gz", "whole.raw"]);
    }

    #[test]
    fn test_key_budget_follows_ram_limit() {
        let config = BuildConfiguration {
            ram_limit_mib: 16,
            ..small_config()
        };
        let pool = rayon::ThreadPoolBuilder::new().num_threads(4).build().unwrap();
        assert_eq!(pool.install(|| key_budget(&config)), 16 * MIB / 64);
    }
}
