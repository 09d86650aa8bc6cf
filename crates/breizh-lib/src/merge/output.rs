//! Buffered output side of the mergers
//!
//! [`MergeOutput`] is append-only by key. The record of the most recent key
//! always stays in the buffer: when the buffer fills, every record but the
//! last is written out and the last one is moved to the front. A key seen
//! again (a continuation from another input, or from the next input block)
//! therefore always amends its record in place, and a key's record is never
//! written before all of its contributions have arrived.

use std::path::Path;

use crate::error::Result;
use crate::record::{record_at_mut, RecordLayout};
use crate::stream::WordWriter;

/// Key-ordered record writer with an amendable last record
pub struct MergeOutput {
    writer: WordWriter,
    layout: RecordLayout,
    buffer: Vec<u64>,
    capacity: usize,
    last_key: Option<u64>,
    records: u64,
}

impl MergeOutput {
    /// Create `path` for records of `layout`, buffering `capacity` records
    pub fn create(path: impl AsRef<Path>, layout: RecordLayout, capacity: usize) -> Result<Self> {
        let capacity = capacity.max(2);
        Ok(Self {
            writer: WordWriter::create(path)?,
            layout,
            buffer: Vec::with_capacity(capacity * layout.stride()),
            capacity,
            last_key: None,
            records: 0,
        })
    }

    /// Color words of the record for `key`
    ///
    /// Returns the held-back record when `key` equals the last key, otherwise
    /// appends a fresh zero-colored record. The flag is true for a fresh one.
    ///
    /// # Panics
    /// Panics if `key` is smaller than the last key.
    pub fn colors_for(&mut self, key: u64) -> Result<(&mut [u64], bool)> {
        let stride = self.layout.stride();
        if let Some(last) = self.last_key {
            if key == last {
                let index = self.buffer.len() / stride - 1;
                return Ok((&mut record_at_mut(&mut self.buffer, index, stride)[1..], false));
            }
            assert!(key > last, "merge output keys must ascend: {} after {}", key, last);
        }

        if self.buffer.len() == self.capacity * stride {
            self.flush_all_but_last()?;
        }
        self.buffer.push(key);
        self.buffer.resize(self.buffer.len() + self.layout.color_words(), 0);
        self.last_key = Some(key);
        self.records += 1;

        let index = self.buffer.len() / stride - 1;
        Ok((&mut record_at_mut(&mut self.buffer, index, stride)[1..], true))
    }

    /// Number of distinct keys written
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Write the remaining records and close the file; returns the record count
    pub fn finish(mut self) -> Result<u64> {
        self.assert_aligned();
        self.writer.write_words(&self.buffer)?;
        self.writer.finish()?;
        Ok(self.records)
    }

    fn flush_all_but_last(&mut self) -> Result<()> {
        self.assert_aligned();
        let stride = self.layout.stride();
        let keep_from = self.buffer.len() - stride;
        self.writer.write_words(&self.buffer[..keep_from])?;
        self.buffer.copy_within(keep_from.., 0);
        self.buffer.truncate(stride);
        Ok(())
    }

    fn assert_aligned(&self) {
        assert_eq!(
            self.buffer.len() % self.layout.stride(),
            0,
            "merge output buffer misaligned: {} words for {}-word records",
            self.buffer.len(),
            self.layout.stride()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::read_all_words;
    use tempfile::TempDir;

    #[test]
    fn test_continuation_amends_across_flushes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.raw");
        let mut out = MergeOutput::create(&path, RecordLayout::new(1), 2).unwrap();

        for key in 0..5u64 {
            let (colors, fresh) = out.colors_for(key).unwrap();
            assert!(fresh);
            colors[0] |= 1;
            // Second contribution lands after the buffer may have been flushed
            let (colors, fresh) = out.colors_for(key).unwrap();
            assert!(!fresh);
            colors[0] |= 2;
        }
        assert_eq!(out.records(), 5);
        assert_eq!(out.finish().unwrap(), 5);

        let words = read_all_words(&path).unwrap();
        assert_eq!(words, vec![0, 3, 1, 3, 2, 3, 3, 3, 4, 3]);
    }

    #[test]
    fn test_fresh_records_are_zeroed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("zero.raw");
        let mut out = MergeOutput::create(&path, RecordLayout::new(3), 2).unwrap();
        for key in [10u64, 20, 30] {
            let (colors, _) = out.colors_for(key).unwrap();
            assert_eq!(colors, &[0, 0, 0]);
            colors.fill(u64::MAX);
        }
        out.finish().unwrap();
        assert_eq!(read_all_words(&path).unwrap().len(), 12);
    }

    #[test]
    #[should_panic(expected = "must ascend")]
    fn test_descending_key_panics() {
        let tmp = TempDir::new().unwrap();
        let mut out = MergeOutput::create(tmp.path().join("x.raw"), RecordLayout::new(1), 4).unwrap();
        out.colors_for(5).unwrap();
        out.colors_for(4).unwrap();
    }
}
