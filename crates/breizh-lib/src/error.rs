//! Error types for index construction
//!
//! Usage and I/O failures are reported as [`BreizhError`] values so the
//! pipeline can abort the whole run. Corruption of the merge buffers
//! themselves is not represented here: those are invariant violations and
//! panic at the point of detection.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Error type for merge, sort and build operations
#[derive(Error, Debug)]
pub enum BreizhError {
    /// An I/O operation on a file failed
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// File the operation was performed on
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// A stream ended inside a 64-bit word
    #[error("truncated stream {}: {trailing_bytes} trailing bytes after the last full word", path.display())]
    Truncated {
        /// File being read
        path: PathBuf,
        /// Number of bytes left over
        trailing_bytes: usize,
    },

    /// A stream ended inside a record
    #[error("stream {} ends inside a record: {words} words read, records are {stride} words wide", path.display())]
    Misaligned {
        /// File being read
        path: PathBuf,
        /// Number of words read in the final block
        words: usize,
        /// Record width in words
        stride: usize,
    },

    /// A merger was called with an unsupported number of inputs
    #[error("{merger} accepts between {min} and {max} inputs, got {actual}")]
    InputCount {
        /// Name of the merger
        merger: &'static str,
        /// Minimum number of inputs
        min: usize,
        /// Maximum number of inputs
        max: usize,
        /// Number of inputs passed
        actual: usize,
    },

    /// The wider input of a pairwise merge was not passed first
    #[error("color widths out of order: first input has {first} colors, second has {second}")]
    WidthOrder {
        /// Color capacity of the first input
        first: usize,
        /// Color capacity of the second input
        second: usize,
    },

    /// Inputs that must share a color width do not
    #[error("color width mismatch on {}: expected {expected} colors, found {found}", path.display())]
    WidthMismatch {
        /// Offending input
        path: PathBuf,
        /// Width shared by the other inputs
        expected: usize,
        /// Width of the offending input
        found: usize,
    },

    /// The build configuration is invalid
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A sequence file could not be parsed
    #[error("failed to parse {}: {message}", path.display())]
    Parse {
        /// Sequence file
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// The worker thread pool could not be created
    #[error("failed to create thread pool: {0}")]
    ThreadPool(String),
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, BreizhError>;

/// Attach a file path to an [`io::Error`]
pub trait IoResultExt<T> {
    /// Convert the error into [`BreizhError::Io`] for `path`
    fn with_path(self, path: &Path) -> Result<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn with_path(self, path: &Path) -> Result<T> {
        self.map_err(|source| BreizhError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_carries_path() {
        let err = std::fs::File::open("/nonexistent/breizh/input.raw")
            .with_path(Path::new("/nonexistent/breizh/input.raw"))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("/nonexistent/breizh/input.raw"), "{}", message);
    }

    #[test]
    fn test_width_order_message() {
        let err = BreizhError::WidthOrder { first: 64, second: 128 };
        assert_eq!(
            err.to_string(),
            "color widths out of order: first input has 64 colors, second has 128"
        );
    }
}
