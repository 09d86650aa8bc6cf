//! Descriptors of the files flowing through the merge pipeline
//!
//! The number of colors a stream carries is always taken from its
//! [`MergeFile`] descriptor, never from its file name.

use std::path::{Path, PathBuf};

use crate::constants::COLORS_PER_WORD;
use crate::record::RecordLayout;

/// One original input file and the color bit it occupies in a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorSample {
    /// Bit index in the stream's color vector
    pub bit: usize,
    /// Original sequence (or minimizer) file
    pub source: PathBuf,
}

/// A sorted record stream on disk together with its color metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeFile {
    /// Path of the stream
    pub path: PathBuf,
    /// Color capacity in bits (0 for raw minimizer streams, else a multiple of 64)
    pub numb_colors: usize,
    /// Number of original input files folded into the stream
    pub real_colors: usize,
    /// Bit assignment of every original input file
    pub samples: Vec<ColorSample>,
}

impl MergeFile {
    /// A raw minimizer stream (no color words) extracted from `source`
    pub fn minimizers(path: impl Into<PathBuf>, source: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            numb_colors: 0,
            real_colors: 1,
            samples: vec![ColorSample {
                bit: 0,
                source: source.into(),
            }],
        }
    }

    /// A stream with an explicit color capacity and sample assignment
    pub fn with_colors(path: impl Into<PathBuf>, numb_colors: usize, samples: Vec<ColorSample>) -> Self {
        debug_assert!(numb_colors == 0 || numb_colors % COLORS_PER_WORD == 0);
        Self {
            path: path.into(),
            numb_colors,
            real_colors: samples.len(),
            samples,
        }
    }

    /// Number of 64-bit color words per record
    #[inline]
    pub fn color_words(&self) -> usize {
        self.numb_colors / COLORS_PER_WORD
    }

    /// Record layout of the stream
    #[inline]
    pub fn layout(&self) -> RecordLayout {
        RecordLayout::new(self.color_words())
    }

    /// Path of the stream
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Samples of `self` moved to start at color bit `offset`
    pub fn samples_at(&self, offset: usize) -> impl Iterator<Item = ColorSample> + '_ {
        self.samples.iter().map(move |s| ColorSample {
            bit: s.bit + offset,
            source: s.source.clone(),
        })
    }
}

/// Name of an intermediate stream: `data_n<round>_<index>.<real_colors>c<ext>`
pub fn intermediate_name(round: usize, index: usize, real_colors: usize, extension: &str) -> String {
    format!("data_n{:02}_{:05}.{}c{}", round, index, real_colors, extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimizer_descriptor() {
        let f = MergeFile::minimizers("/tmp/a.raw", "a.fa");
        assert_eq!(f.numb_colors, 0);
        assert_eq!(f.real_colors, 1);
        assert_eq!(f.color_words(), 0);
        assert_eq!(f.layout().stride(), 1);
    }

    #[test]
    fn test_samples_at_offset() {
        let f = MergeFile::with_colors(
            "/tmp/b.raw",
            64,
            vec![
                ColorSample { bit: 0, source: "x.fa".into() },
                ColorSample { bit: 1, source: "y.fa".into() },
            ],
        );
        assert_eq!(f.real_colors, 2);
        let bits: Vec<usize> = f.samples_at(128).map(|s| s.bit).collect();
        assert_eq!(bits, vec![128, 129]);
    }

    #[test]
    fn test_intermediate_name() {
        assert_eq!(intermediate_name(1, 3, 70, ".raw"), "data_n01_00003.70c.raw");
    }
}
