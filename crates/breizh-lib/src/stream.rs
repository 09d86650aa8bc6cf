//! Word-oriented stream I/O over raw and compressed files
//!
//! All merge stages read and write flat sequences of native-endian u64
//! words. The backend is chosen from the file extension:
//!
//! | extension | backend |
//! |-----------|---------|
//! | `.gz`     | gzip (`flate2`) |
//! | `.bz2`    | bzip2 (`bzip2`) |
//! | `.lz4`    | LZ4 frame (`lz4`) |
//! | other     | uncompressed |
//!
//! Counts are reported in words, never bytes. A read returns fewer words
//! than requested only at end of stream; a stream ending inside a word is a
//! [`BreizhError::Truncated`] error. Writers must be [`WordWriter::finish`]ed
//! before the file is complete.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{BreizhError, IoResultExt, Result};

/// Buffer size of the underlying file reader/writer
const IO_BUFFER_BYTES: usize = 1 << 20;

/// Compression backend of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Uncompressed words
    Raw,
    /// gzip
    Gzip,
    /// bzip2
    Bzip2,
    /// LZ4 frame format
    Lz4,
}

impl Compression {
    /// Select the backend from a path's extension
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("gz") => Compression::Gzip,
            Some("bz2") => Compression::Bzip2,
            Some("lz4") => Compression::Lz4,
            _ => Compression::Raw,
        }
    }

    /// File extension (with leading dot) written for this backend
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::Raw => ".raw",
            Compression::Gzip => ".gz",
            Compression::Bzip2 => ".bz2",
            Compression::Lz4 => ".lz4",
        }
    }
}

/// Reader of u64 words from a raw or compressed file
pub struct WordReader {
    path: PathBuf,
    inner: Box<dyn Read>,
    eof: bool,
}

impl WordReader {
    /// Open `path`, choosing the decoder from its extension
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_path(path)?;
        let reader = BufReader::with_capacity(IO_BUFFER_BYTES, file);
        let inner: Box<dyn Read> = match Compression::from_path(path) {
            Compression::Raw => Box::new(reader),
            Compression::Gzip => Box::new(flate2::read::MultiGzDecoder::new(reader)),
            Compression::Bzip2 => Box::new(bzip2::read::MultiBzDecoder::new(reader)),
            Compression::Lz4 => Box::new(lz4::Decoder::new(reader).with_path(path)?),
        };
        Ok(Self {
            path: path.to_path_buf(),
            inner,
            eof: false,
        })
    }

    /// Fill `buf` with words; returns the number of words read
    ///
    /// The count is below `buf.len()` only when the end of the stream was
    /// reached, after which [`WordReader::is_eof`] is true.
    pub fn read_words(&mut self, buf: &mut [u64]) -> Result<usize> {
        if self.eof || buf.is_empty() {
            return Ok(0);
        }
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(buf);
        let mut filled = 0;
        while filled < bytes.len() {
            match self.inner.read(&mut bytes[filled..]) {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).with_path(&self.path),
            }
        }
        if filled % 8 != 0 {
            return Err(BreizhError::Truncated {
                path: self.path.clone(),
                trailing_bytes: filled % 8,
            });
        }
        Ok(filled / 8)
    }

    /// True once the end of the stream has been reached
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Path of the underlying file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

enum Encoder {
    Raw(BufWriter<File>),
    Gzip(flate2::write::GzEncoder<BufWriter<File>>),
    Bzip2(bzip2::write::BzEncoder<BufWriter<File>>),
    Lz4(lz4::Encoder<BufWriter<File>>),
}

impl Encoder {
    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Encoder::Raw(w) => w,
            Encoder::Gzip(w) => w,
            Encoder::Bzip2(w) => w,
            Encoder::Lz4(w) => w,
        }
    }

    fn finish(self) -> io::Result<()> {
        let mut file = match self {
            Encoder::Raw(w) => w,
            Encoder::Gzip(w) => w.finish()?,
            Encoder::Bzip2(w) => w.finish()?,
            Encoder::Lz4(w) => {
                let (w, result) = w.finish();
                result?;
                w
            }
        };
        file.flush()
    }
}

/// Writer of u64 words to a raw or compressed file
pub struct WordWriter {
    path: PathBuf,
    encoder: Encoder,
    words_written: u64,
}

impl WordWriter {
    /// Create (or truncate) `path`, choosing the encoder from its extension
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Self::with_compression(path, Compression::from_path(path))
    }

    /// Create (or truncate) `path` with an explicit backend
    pub fn with_compression(path: impl AsRef<Path>, compression: Compression) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path).with_path(path)?;
        let writer = BufWriter::with_capacity(IO_BUFFER_BYTES, file);
        let encoder = match compression {
            Compression::Raw => Encoder::Raw(writer),
            Compression::Gzip => {
                Encoder::Gzip(flate2::write::GzEncoder::new(writer, flate2::Compression::fast()))
            }
            Compression::Bzip2 => {
                Encoder::Bzip2(bzip2::write::BzEncoder::new(writer, bzip2::Compression::fast()))
            }
            Compression::Lz4 => Encoder::Lz4(
                lz4::EncoderBuilder::new()
                    .level(1)
                    .build(writer)
                    .with_path(path)?,
            ),
        };
        Ok(Self {
            path: path.to_path_buf(),
            encoder,
            words_written: 0,
        })
    }

    /// Append words to the stream
    pub fn write_words(&mut self, words: &[u64]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(words);
        self.encoder.writer().write_all(bytes).with_path(&self.path)?;
        self.words_written += words.len() as u64;
        Ok(())
    }

    /// Number of words written so far
    pub fn words_written(&self) -> u64 {
        self.words_written
    }

    /// Path of the underlying file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and finalize the stream; returns the number of words written
    pub fn finish(self) -> Result<u64> {
        let path = self.path;
        self.encoder.finish().with_path(&path)?;
        Ok(self.words_written)
    }
}

/// Read a whole stream into memory (tests and small files)
pub fn read_all_words(path: impl AsRef<Path>) -> Result<Vec<u64>> {
    let mut reader = WordReader::open(path)?;
    let mut out = Vec::new();
    let mut block = vec![0u64; 1 << 14];
    loop {
        let n = reader.read_words(&mut block)?;
        out.extend_from_slice(&block[..n]);
        if reader.is_eof() {
            break;
        }
    }
    Ok(out)
}

/// Write `words` as a complete stream to `path`
pub fn write_all_words(path: impl AsRef<Path>, words: &[u64]) -> Result<()> {
    let mut writer = WordWriter::create(path)?;
    writer.write_words(words)?;
    writer.finish()?;
    Ok(())
}

/// Delete a consumed file
pub fn remove_file(path: &Path) -> Result<()> {
    std::fs::remove_file(path).with_path(path)
}

/// Move `from` to `to`, falling back to copy + delete across filesystems
pub fn move_file(from: &Path, to: &Path) -> Result<()> {
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to).with_path(to)?;
    remove_file(from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Vec<u64> {
        (0..10_000u64).map(|i| i.wrapping_mul(0x9E37_79B9_7F4A_7C15)).collect()
    }

    #[test]
    fn test_compression_from_extension() {
        assert_eq!(Compression::from_path(Path::new("a/b.gz")), Compression::Gzip);
        assert_eq!(Compression::from_path(Path::new("b.bz2")), Compression::Bzip2);
        assert_eq!(Compression::from_path(Path::new("b.64c.lz4")), Compression::Lz4);
        assert_eq!(Compression::from_path(Path::new("b.raw")), Compression::Raw);
        assert_eq!(Compression::from_path(Path::new("b")), Compression::Raw);
    }

    #[test]
    fn test_every_backend_preserves_words() {
        let tmp = TempDir::new().unwrap();
        let words = sample();
        for ext in ["raw", "gz", "bz2", "lz4"] {
            let path = tmp.path().join(format!("words.{}", ext));
            write_all_words(&path, &words).unwrap();
            assert_eq!(read_all_words(&path).unwrap(), words, "backend {}", ext);
        }
    }

    #[test]
    fn test_short_read_only_at_eof() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ten.raw");
        write_all_words(&path, &(0..10).collect::<Vec<u64>>()).unwrap();

        let mut reader = WordReader::open(&path).unwrap();
        let mut buf = [0u64; 4];
        assert_eq!(reader.read_words(&mut buf).unwrap(), 4);
        assert!(!reader.is_eof());
        assert_eq!(reader.read_words(&mut buf).unwrap(), 4);
        assert_eq!(reader.read_words(&mut buf).unwrap(), 2);
        assert!(reader.is_eof());
        assert_eq!(&buf[..2], &[8, 9]);
        assert_eq!(reader.read_words(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_truncated_word_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.raw");
        std::fs::write(&path, [1u8, 2, 3, 4, 5, 6, 7, 8, 9]).unwrap();

        let mut reader = WordReader::open(&path).unwrap();
        let mut buf = [0u64; 4];
        let err = reader.read_words(&mut buf).unwrap_err();
        assert!(matches!(err, BreizhError::Truncated { trailing_bytes: 1, .. }));
    }

    #[test]
    fn test_open_missing_file() {
        let err = WordReader::open("/nonexistent/breizh.raw").err().unwrap();
        assert!(matches!(err, BreizhError::Io { .. }));
    }
}
