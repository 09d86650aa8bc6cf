//! RAM-bounded external sort of record streams
//!
//! Sorts one file of fixed-width records by `(colors, key)`:
//!
//! 1. A producer reads the input in chunks and hands them to sort workers
//!    through a bounded channel. Each worker sorts a chunk in memory and
//!    writes it to a temp file. Chunks are sized so that the chunks being
//!    sorted, the chunks waiting in the channel and the one being filled
//!    fit the RAM budget.
//! 2. Chunk files are merged 64 at a time with a binary heap until a single
//!    pass can produce the output. The last pass writes
//!    `<output>.partial` and renames it into place.
//!
//! ## Memory
//!
//! With W workers, at most `2W + 1` chunks are alive at once, plus one
//! permutation of `usize` per chunk being sorted:
//!
//! chunk size = `ram_limit / ((2W + 1) * record_bytes + W * 8)` records.
//!
//! During merging every stream gets an equal share of the budget, capped at
//! 1 GiB.
//!
//! [`SortAlgorithm::Parallel`] runs on the rayon pool attached with
//! [`ExternalSorter::with_thread_pool`], the global pool otherwise.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fs;
use std::mem::size_of;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::{bounded, Receiver, Sender};
use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{debug, info};

use crate::constants::{EXTERNAL_MERGE_FAN_IN, INPUT_BUFFER_RECORDS, MAX_STREAM_BUFFER_BYTES, MIB};
use crate::error::{BreizhError, IoResultExt, Result};
use crate::merge::RecordStream;
use crate::record::{cmp_colors_then_key, record_at, RecordLayout};
use crate::stream::{move_file, remove_file, Compression, WordReader, WordWriter};

/// In-memory sort used on each chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortAlgorithm {
    /// `sort_unstable_by`
    #[default]
    Std,
    /// `sort_by` (stable)
    Stable,
    /// rayon `par_sort_unstable_by`
    Parallel,
}

impl SortAlgorithm {
    /// Name accepted by [`FromStr`]
    pub fn name(&self) -> &'static str {
        match self {
            SortAlgorithm::Std => "std",
            SortAlgorithm::Stable => "stable",
            SortAlgorithm::Parallel => "parallel",
        }
    }

    /// Sort `items` with this algorithm
    pub fn sort_by<T, F>(&self, items: &mut [T], compare: F)
    where
        T: Send,
        F: Fn(&T, &T) -> CmpOrdering + Sync,
    {
        match self {
            SortAlgorithm::Std => items.sort_unstable_by(compare),
            SortAlgorithm::Stable => items.sort_by(compare),
            SortAlgorithm::Parallel => items.par_sort_unstable_by(compare),
        }
    }
}

impl FromStr for SortAlgorithm {
    type Err = BreizhError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "std" | "unstable" => Ok(SortAlgorithm::Std),
            "stable" => Ok(SortAlgorithm::Stable),
            "parallel" | "rayon" => Ok(SortAlgorithm::Parallel),
            other => Err(BreizhError::Config(format!(
                "unknown sort algorithm '{}' (expected std, stable or parallel)",
                other
            ))),
        }
    }
}

/// Counters of one external sort
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SortStats {
    /// Records sorted
    pub records: u64,
    /// Sorted chunks written in the first phase
    pub chunks: u64,
    /// Merge passes of the second phase
    pub merge_passes: u64,
}

/// External sorter for fixed-width record streams
pub struct ExternalSorter {
    /// Temp directory for chunk files
    tmp_dir: PathBuf,
    /// Run identifier (timestamp-based for uniqueness)
    run_id: u64,
    /// Counter for chunk file IDs
    num_files: AtomicU64,
    /// RAM budget in bytes
    ram_limit_bytes: usize,
    /// Number of sort workers
    num_threads: usize,
    algorithm: SortAlgorithm,
    /// Pool running parallel chunk sorts
    pool: Option<Arc<ThreadPool>>,
}

impl ExternalSorter {
    /// Create a sorter writing its chunks under `tmp_dir`
    pub fn new(
        tmp_dir: impl AsRef<Path>,
        ram_limit_mib: usize,
        num_threads: usize,
        algorithm: SortAlgorithm,
    ) -> Result<Self> {
        let tmp_dir = tmp_dir.as_ref().to_path_buf();
        fs::create_dir_all(&tmp_dir).with_path(&tmp_dir)?;

        let run_id = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default()
            ^ u64::from(std::process::id());

        Ok(Self {
            tmp_dir,
            run_id,
            num_files: AtomicU64::new(0),
            ram_limit_bytes: ram_limit_mib.max(1) * MIB,
            num_threads: num_threads.max(1),
            algorithm,
            pool: None,
        })
    }

    /// Run parallel chunk sorts on `pool` instead of the global rayon pool
    ///
    /// The pool must not be busy waiting on this sorter: workers block on
    /// it while they sort.
    pub fn with_thread_pool(mut self, pool: Arc<ThreadPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Records per in-memory chunk for `layout`
    ///
    /// Formula: `ram_limit / ((2W + 1) * record_bytes + W * 8)` with W workers,
    /// at least one record.
    pub fn chunk_records(&self, layout: RecordLayout) -> usize {
        let per_record =
            (2 * self.num_threads + 1) * layout.record_bytes() + self.num_threads * size_of::<usize>();
        (self.ram_limit_bytes / per_record).max(1)
    }

    /// Run `op` on the attached pool, if any
    fn in_pool<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    /// Records buffered per stream when merging `fan_in` chunk files
    fn stream_records(&self, layout: RecordLayout, fan_in: usize) -> usize {
        let share = (self.ram_limit_bytes / (fan_in + 1)).min(MAX_STREAM_BUFFER_BYTES);
        (share / layout.record_bytes()).max(1)
    }

    /// Get path for a chunk file by ID
    fn chunk_path(&self, id: u64) -> PathBuf {
        self.tmp_dir
            .join(format!("breizh.tmp.run_{}.chunk.{}.bin", self.run_id, id))
    }

    /// Reserve a fresh chunk file
    fn next_chunk(&self) -> (u64, PathBuf) {
        let id = self.num_files.fetch_add(1, Ordering::SeqCst);
        (id, self.chunk_path(id))
    }

    /// Sort `input` into `output` by `(colors, key)`
    ///
    /// `input` is deleted afterwards unless `keep_input` is set.
    pub fn sort_file(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        layout: RecordLayout,
        keep_input: bool,
    ) -> Result<SortStats> {
        let input = input.as_ref();
        let output = output.as_ref();
        let mut stats = SortStats::default();

        let (chunks, records) = self.write_sorted_chunks(input, layout)?;
        stats.records = records;
        stats.chunks = chunks.len() as u64;
        debug!(
            "{}: {} records in {} sorted chunks",
            input.display(),
            records,
            chunks.len()
        );

        // The partial file is encoded like the output, whatever its name
        let partial = partial_path(output);
        let compression = Compression::from_path(output);
        let mut pending = chunks;
        loop {
            if pending.len() <= EXTERNAL_MERGE_FAN_IN {
                match pending.as_slice() {
                    [] => {
                        WordWriter::with_compression(&partial, compression)?.finish()?;
                    }
                    [single] if compression == Compression::Raw => move_file(single, &partial)?,
                    _ => {
                        self.merge_chunks(&pending, &partial, compression, layout)?;
                        stats.merge_passes += 1;
                    }
                }
                break;
            }
            let mut next = Vec::with_capacity(pending.len().div_ceil(EXTERNAL_MERGE_FAN_IN));
            for group in pending.chunks(EXTERNAL_MERGE_FAN_IN) {
                let (_, path) = self.next_chunk();
                self.merge_chunks(group, &path, Compression::Raw, layout)?;
                next.push(path);
            }
            stats.merge_passes += 1;
            info!("merge pass {}: {} -> {} chunk files", stats.merge_passes, pending.len(), next.len());
            pending = next;
        }
        fs::rename(&partial, output).with_path(output)?;

        if !keep_input {
            remove_file(input)?;
        }
        Ok(stats)
    }

    /// Phase 1: split `input` into sorted chunk files
    fn write_sorted_chunks(&self, input: &Path, layout: RecordLayout) -> Result<(Vec<PathBuf>, u64)> {
        let chunk_words = self.chunk_records(layout) * layout.stride();

        std::thread::scope(|scope| {
            let (tx, rx) = bounded::<Vec<u64>>(self.num_threads);
            let workers: Vec<_> = (0..self.num_threads)
                .map(|_| {
                    let rx = rx.clone();
                    scope.spawn(move || self.sort_worker(rx, layout))
                })
                .collect();
            drop(rx);

            let produced = read_chunks(input, layout, chunk_words, &tx);
            drop(tx);

            let mut chunks = Vec::new();
            let mut failure = None;
            for worker in workers {
                match worker.join() {
                    Ok(Ok(mut written)) => chunks.append(&mut written),
                    Ok(Err(e)) => {
                        failure.get_or_insert(e);
                    }
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
            chunks.sort_unstable_by_key(|(id, _)| *id);
            let chunks: Vec<PathBuf> = chunks.into_iter().map(|(_, path)| path).collect();

            match (produced, failure) {
                (Ok(records), None) => Ok((chunks, records)),
                (Err(e), _) | (Ok(_), Some(e)) => {
                    for path in &chunks {
                        let _ = fs::remove_file(path);
                    }
                    Err(e)
                }
            }
        })
    }

    /// Sort chunks until the channel is closed; returns the files written
    fn sort_worker(&self, rx: Receiver<Vec<u64>>, layout: RecordLayout) -> Result<Vec<(u64, PathBuf)>> {
        let stride = layout.stride();
        let mut written = Vec::new();
        for chunk in rx {
            let mut order: Vec<usize> = (0..chunk.len() / stride).collect();
            let algorithm = self.algorithm;
            self.in_pool(|| {
                algorithm.sort_by(&mut order, |&a, &b| {
                    cmp_colors_then_key(record_at(&chunk, a, stride), record_at(&chunk, b, stride))
                })
            });

            let (id, path) = self.next_chunk();
            let mut writer = WordWriter::create(&path)?;
            for &i in &order {
                writer.write_words(record_at(&chunk, i, stride))?;
            }
            writer.finish()?;
            written.push((id, path));
        }
        Ok(written)
    }

    /// Phase 2: heap merge of `inputs` into `output`, deleting the inputs
    fn merge_chunks(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        compression: Compression,
        layout: RecordLayout,
    ) -> Result<u64> {
        let capacity = self.stream_records(layout, inputs.len());
        let mut streams = Vec::with_capacity(inputs.len());
        for path in inputs {
            streams.push(RecordStream::open(path, layout, capacity)?.without_order_check());
        }

        let mut heap = BinaryHeap::with_capacity(streams.len());
        for (source, stream) in streams.iter_mut().enumerate() {
            if !stream.is_exhausted() {
                heap.push(HeapEntry {
                    record: stream.head_record().into(),
                    source,
                });
                stream.advance()?;
            }
        }

        let mut writer = WordWriter::with_compression(output, compression)?;
        let mut records = 0u64;
        while let Some(mut entry) = heap.pop() {
            writer.write_words(&entry.record)?;
            records += 1;
            let stream = &mut streams[entry.source];
            if !stream.is_exhausted() {
                entry.record.copy_from_slice(stream.head_record());
                stream.advance()?;
                heap.push(entry);
            }
        }
        writer.finish()?;
        drop(streams);

        for path in inputs {
            remove_file(path)?;
        }
        Ok(records)
    }
}

impl Drop for ExternalSorter {
    fn drop(&mut self) {
        // Chunks left behind by a failed sort
        for id in 0..self.num_files.load(Ordering::SeqCst) {
            let _ = fs::remove_file(self.chunk_path(id));
        }
    }
}

/// Producer: read `input` in chunks of `chunk_words` and send them
///
/// Stops early without error when every worker has gone away.
fn read_chunks(input: &Path, layout: RecordLayout, chunk_words: usize, tx: &Sender<Vec<u64>>) -> Result<u64> {
    let mut reader = WordReader::open(input)?;
    let mut records = 0u64;
    while !reader.is_eof() {
        let mut chunk = vec![0u64; chunk_words];
        let n = reader.read_words(&mut chunk)?;
        if n % layout.stride() != 0 {
            return Err(BreizhError::Misaligned {
                path: input.to_path_buf(),
                words: n,
                stride: layout.stride(),
            });
        }
        if n == 0 {
            break;
        }
        chunk.truncate(n);
        records += (n / layout.stride()) as u64;
        if tx.send(chunk).is_err() {
            break;
        }
    }
    Ok(records)
}

/// One record at the head of a chunk stream
struct HeapEntry {
    record: Box<[u64]>,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // Reversed: BinaryHeap is a max-heap
    fn cmp(&self, other: &Self) -> CmpOrdering {
        cmp_colors_then_key(&other.record, &self.record).then_with(|| other.source.cmp(&self.source))
    }
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

/// Check that every adjacent pair of records of `path` is in `(colors, key)` order
pub fn check_file_sorted(path: impl AsRef<Path>, layout: RecordLayout) -> Result<bool> {
    let mut stream = RecordStream::open(path, layout, INPUT_BUFFER_RECORDS)?.without_order_check();
    let mut previous = vec![0u64; layout.stride()];
    let mut first = true;
    while !stream.is_exhausted() {
        let record = stream.head_record();
        if !first && cmp_colors_then_key(&previous, record) == CmpOrdering::Greater {
            return Ok(false);
        }
        previous.copy_from_slice(record);
        first = false;
        stream.advance()?;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{read_all_words, write_all_words};
    use tempfile::TempDir;

    /// Pseudo-random 2-word records with unique keys
    fn shuffled_records(n: u64) -> Vec<u64> {
        let mut words = Vec::with_capacity(2 * n as usize);
        let mut state = 0x9E37_79B9_7F4A_7C15u64;
        for key in 0..n {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            words.extend([key.wrapping_mul(0x2545_F491_4F6C_DD1D), state % 50]);
        }
        words
    }

    fn expected_order(words: &[u64]) -> Vec<u64> {
        let mut records: Vec<&[u64]> = words.chunks_exact(2).collect();
        records.sort_by(|a, b| cmp_colors_then_key(a, b));
        records.concat()
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!("std".parse::<SortAlgorithm>().unwrap(), SortAlgorithm::Std);
        assert_eq!("Stable".parse::<SortAlgorithm>().unwrap(), SortAlgorithm::Stable);
        assert_eq!("rayon".parse::<SortAlgorithm>().unwrap(), SortAlgorithm::Parallel);
        assert!("quick".parse::<SortAlgorithm>().is_err());
        assert_eq!(SortAlgorithm::Parallel.name(), "parallel");
    }

    #[test]
    fn test_chunk_size_respects_budget() {
        let tmp = TempDir::new().unwrap();
        let sorter = ExternalSorter::new(tmp.path(), 64, 4, SortAlgorithm::Std).unwrap();
        // 64 MiB / (9 chunks * 16 bytes + 4 permutations * 8 bytes)
        assert_eq!(sorter.chunk_records(RecordLayout::new(1)), 64 * MIB / 176);
    }

    #[test]
    fn test_parallel_sort_runs_on_attached_pool() {
        let tmp = TempDir::new().unwrap();
        let pool = Arc::new(rayon::ThreadPoolBuilder::new().num_threads(3).build().unwrap());
        let sorter = ExternalSorter::new(tmp.path().join("tmp"), 1, 2, SortAlgorithm::Parallel)
            .unwrap()
            .with_thread_pool(pool);
        let (threads, index) = sorter.in_pool(|| (rayon::current_num_threads(), rayon::current_thread_index()));
        assert_eq!(threads, 3);
        assert!(index.is_some());

        let input = tmp.path().join("in.raw");
        let output = tmp.path().join("out.raw");
        let words = shuffled_records(2000);
        write_all_words(&input, &words).unwrap();
        sorter.sort_file(&input, &output, RecordLayout::new(1), false).unwrap();
        assert_eq!(read_all_words(&output).unwrap(), expected_order(&words));
    }

    #[test]
    fn test_single_chunk_sort() {
        let tmp = TempDir::new().unwrap();
        let input = tmp.path().join("in.raw");
        let output = tmp.path().join("out.raw");
        let words = shuffled_records(1000);
        write_all_words(&input, &words).unwrap();

        let sorter = ExternalSorter::new(tmp.path().join("tmp"), 16, 2, SortAlgorithm::Std).unwrap();
        let stats = sorter.sort_file(&input, &output, RecordLayout::new(1), false).unwrap();
        assert_eq!(stats.records, 1000);
        assert!(!input.exists());
        assert!(!partial_path(&output).exists());
        assert_eq!(read_all_words(&output).unwrap(), expected_order(&words));
        assert!(check_file_sorted(&output, RecordLayout::new(1)).unwrap());
    }

    #[test]
    fn test_multi_pass_merge() {
        let tmp = TempDir::new().unwrap();
        let input = tmp.path().join("in.raw");
        let output = tmp.path().join("out.raw");
        let words = shuffled_records(20_000);
        write_all_words(&input, &words).unwrap();

        for algorithm in [SortAlgorithm::Std, SortAlgorithm::Stable, SortAlgorithm::Parallel] {
            let mut sorter = ExternalSorter::new(tmp.path().join("tmp"), 1, 3, algorithm).unwrap();
            // Force 100-record chunks: 200 chunks, two merge passes
            sorter.ram_limit_bytes = (7 * 16 + 3 * 8) * 100;
            let stats = sorter.sort_file(&input, &output, RecordLayout::new(1), true).unwrap();
            assert_eq!(stats.chunks, 200);
            assert_eq!(stats.merge_passes, 2);
            assert_eq!(read_all_words(&output).unwrap(), expected_order(&words));
            drop(sorter);
            assert_eq!(fs::read_dir(tmp.path().join("tmp")).unwrap().count(), 0);
        }
    }

    #[test]
    fn test_sorted_input_is_unchanged() {
        let tmp = TempDir::new().unwrap();
        let input = tmp.path().join("in.raw");
        let output = tmp.path().join("out.raw");
        let sorted = expected_order(&shuffled_records(5000));
        write_all_words(&input, &sorted).unwrap();
        let layout = RecordLayout::new(1);
        assert!(check_file_sorted(&input, layout).unwrap());

        let sorter = ExternalSorter::new(tmp.path().join("tmp"), 1, 2, SortAlgorithm::Std).unwrap();
        sorter.sort_file(&input, &output, layout, true).unwrap();
        assert_eq!(fs::read(&input).unwrap(), fs::read(&output).unwrap());
        assert!(check_file_sorted(&output, layout).unwrap());
    }

    #[test]
    fn test_compressed_output() {
        let tmp = TempDir::new().unwrap();
        let input = tmp.path().join("in.raw");
        let output = tmp.path().join("out.gz");
        let words = shuffled_records(300);
        write_all_words(&input, &words).unwrap();
        let sorter = ExternalSorter::new(tmp.path().join("tmp"), 1, 1, SortAlgorithm::Std).unwrap();
        let stats = sorter.sort_file(&input, &output, RecordLayout::new(1), false).unwrap();
        assert_eq!(stats.chunks, 1);
        assert_eq!(read_all_words(&output).unwrap(), expected_order(&words));
    }

    #[test]
    fn test_check_detects_disorder() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("x.raw");
        write_all_words(&path, &[5, 1, 1, 2, 0, 2]).unwrap();
        assert!(!check_file_sorted(&path, RecordLayout::new(1)).unwrap());
    }

    #[test]
    fn test_empty_input() {
        let tmp = TempDir::new().unwrap();
        let input = tmp.path().join("empty.raw");
        let output = tmp.path().join("sorted.raw");
        write_all_words(&input, &[]).unwrap();
        let sorter = ExternalSorter::new(tmp.path(), 1, 1, SortAlgorithm::Std).unwrap();
        let stats = sorter.sort_file(&input, &output, RecordLayout::new(3), false).unwrap();
        assert_eq!(stats, SortStats::default());
        assert_eq!(fs::metadata(&output).unwrap().len(), 0);
    }
}
