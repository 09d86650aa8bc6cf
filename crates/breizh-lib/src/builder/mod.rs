//! Builder module for constructing colored minimizer indexes
//!
//! This module implements the build pipeline:
//! 1. Parse input sequences (FASTA/FASTQ)
//! 2. Extract a sorted minimizer stream per file
//! 3. Merge the streams into one colored stream (bit-packing, wide rounds,
//!    pairwise folding)
//! 4. Split the result into dense and sparse outputs
//! 5. Externally sort the dense output

pub mod config;
pub mod extract;
pub mod parse;
pub mod pipeline;

pub use config::BuildConfiguration;
pub use extract::{extract_all, extract_minimizers, ExtractStats};
pub use pipeline::{generate_minimizers, IndexBuilder, IndexSummary};
