// BreiZH: colored minimizer index construction
//
// Out-of-core merging of per-file minimizer streams into a colored index
// with an adaptive dense/sparse color representation.

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod builder;
pub mod constants;
pub mod encoding;
pub mod error;
pub mod external_sort;
pub mod hasher;
pub mod merge;
pub mod merge_file;
pub mod minimizer;
pub mod record;
pub mod stream;

// Re-export common types at crate root
pub use builder::{generate_minimizers, BuildConfiguration, IndexBuilder, IndexSummary};
pub use error::{BreizhError, Result};
pub use external_sort::{check_file_sorted, ExternalSorter, SortAlgorithm, SortStats};
pub use merge::{
    check_keys_sorted, merge_bitpack, merge_final, merge_pairwise, merge_wide, FinalMerge,
    MergeOptions, MergeStats, Merged, SparseLayout, SparseReader, SparseRecord,
};
pub use merge_file::{ColorSample, MergeFile};
pub use minimizer::MinimizerScanner;
pub use record::{RecordLayout, RecordSlice};

/// Version information
pub fn version() -> (u8, u8, u8) {
    constants::VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let (major, minor, patch) = version();
        assert_eq!(major, 0);
        assert_eq!(minor, 1);
        assert_eq!(patch, 0);
    }
}
