//! Buffered input side of the mergers
//!
//! A [`RecordStream`] reads fixed-width records block by block and exposes
//! the record at its head. Blocks always end on a record boundary except
//! at end of stream, where a partial record is reported as
//! [`BreizhError::Misaligned`].

use std::path::Path;

use crate::error::{BreizhError, Result};
use crate::record::{record_at, RecordLayout};
use crate::stream::WordReader;

/// Buffered reader positioned on one record of a sorted stream
pub struct RecordStream {
    reader: WordReader,
    layout: RecordLayout,
    buffer: Vec<u64>,
    /// Number of records in the buffer
    len: usize,
    /// Index of the head record in the buffer
    pos: usize,
    records_read: u64,
    /// Key of the previous head, for the ascending-keys assertion
    last_key: Option<u64>,
    check_order: bool,
}

impl RecordStream {
    /// Open a key-sorted stream of `layout` records buffering `capacity` records
    pub fn open(path: impl AsRef<Path>, layout: RecordLayout, capacity: usize) -> Result<Self> {
        let mut stream = Self {
            reader: WordReader::open(path)?,
            layout,
            buffer: vec![0u64; capacity.max(1) * layout.stride()],
            len: 0,
            pos: 0,
            records_read: 0,
            last_key: None,
            check_order: true,
        };
        stream.refill()?;
        Ok(stream)
    }

    /// Disable the ascending-keys assertion (streams sorted by another order)
    pub fn without_order_check(mut self) -> Self {
        self.check_order = false;
        self
    }

    /// True once every record has been consumed
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.len
    }

    /// Key of the head record, `None` when exhausted
    #[inline]
    pub fn head_key(&self) -> Option<u64> {
        if self.is_exhausted() {
            None
        } else {
            Some(self.buffer[self.pos * self.layout.stride()])
        }
    }

    /// Head record (key followed by colors)
    ///
    /// # Panics
    /// Panics if the stream is exhausted.
    #[inline]
    pub fn head_record(&self) -> &[u64] {
        assert!(!self.is_exhausted(), "head of an exhausted stream");
        record_at(&self.buffer, self.pos, self.layout.stride())
    }

    /// Color words of the head record
    #[inline]
    pub fn head_colors(&self) -> &[u64] {
        &self.head_record()[1..]
    }

    /// Move to the next record, refilling the buffer when it runs out
    pub fn advance(&mut self) -> Result<()> {
        if self.is_exhausted() {
            return Ok(());
        }
        if self.check_order {
            self.last_key = Some(self.buffer[self.pos * self.layout.stride()]);
        }
        self.pos += 1;
        self.records_read += 1;
        if self.pos >= self.len {
            self.refill()?;
        }
        if self.check_order {
            if let (Some(prev), Some(next)) = (self.last_key, self.head_key()) {
                assert!(
                    next >= prev,
                    "keys decrease in {}: {} follows {}",
                    self.reader.path().display(),
                    next,
                    prev
                );
            }
        }
        Ok(())
    }

    /// Record layout of the stream
    pub fn layout(&self) -> RecordLayout {
        self.layout
    }

    /// Number of records consumed so far
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Path of the underlying file
    pub fn path(&self) -> &Path {
        self.reader.path()
    }

    fn refill(&mut self) -> Result<()> {
        let stride = self.layout.stride();
        let words = self.reader.read_words(&mut self.buffer)?;
        if words % stride != 0 {
            return Err(BreizhError::Misaligned {
                path: self.reader.path().to_path_buf(),
                words,
                stride,
            });
        }
        self.len = words / stride;
        self.pos = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::write_all_words;
    use tempfile::TempDir;

    #[test]
    fn test_stream_walks_records_across_refills() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("in.raw");
        let words: Vec<u64> = (0..10u64).flat_map(|k| [k * 2, k]).collect();
        write_all_words(&path, &words).unwrap();

        let mut stream = RecordStream::open(&path, RecordLayout::new(1), 3).unwrap();
        let mut seen = Vec::new();
        while let Some(key) = stream.head_key() {
            seen.push((key, stream.head_colors()[0]));
            stream.advance().unwrap();
        }
        assert_eq!(seen, (0..10u64).map(|k| (k * 2, k)).collect::<Vec<_>>());
        assert_eq!(stream.records_read(), 10);
        assert!(stream.is_exhausted());
    }

    #[test]
    fn test_empty_stream_is_exhausted() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("empty.raw");
        write_all_words(&path, &[]).unwrap();
        let stream = RecordStream::open(&path, RecordLayout::new(0), 8).unwrap();
        assert!(stream.is_exhausted());
        assert_eq!(stream.head_key(), None);
    }

    #[test]
    fn test_partial_record_is_misaligned() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.raw");
        write_all_words(&path, &[1, 2, 3]).unwrap();
        let err = RecordStream::open(&path, RecordLayout::new(1), 8).err().unwrap();
        assert!(matches!(err, BreizhError::Misaligned { words: 3, stride: 2, .. }));
    }

    #[test]
    #[should_panic(expected = "keys decrease")]
    fn test_decreasing_keys_panic() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("unsorted.raw");
        write_all_words(&path, &[5, 3]).unwrap();
        let mut stream = RecordStream::open(&path, RecordLayout::new(0), 8).unwrap();
        stream.advance().unwrap();
    }
}
