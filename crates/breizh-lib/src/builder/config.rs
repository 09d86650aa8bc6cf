//! Build configuration for colored minimizer index construction
//!
//! Groups the extraction parameters (k, m, seed), the merge tree shape,
//! resource limits and the cleanup policy of intermediate files.

use crate::constants::{
    DEFAULT_K, DEFAULT_M, DEFAULT_MERGE_STEP, DEFAULT_RAM_LIMIT_MIB, DEFAULT_SEED, MAX_K, MAX_M,
};
use crate::error::{BreizhError, Result};
use crate::external_sort::SortAlgorithm;
use crate::stream::Compression;
use std::path::PathBuf;

/// Configuration parameters for building a colored minimizer index
#[derive(Debug, Clone)]
pub struct BuildConfiguration {
    /// K-mer length (window of `k - m + 1` m-mers)
    pub k: usize,

    /// Minimizer length (at most 32, m <= k)
    pub m: usize,

    /// Seed for the minimizer hash
    pub seed: u64,

    /// Use canonical m-mers (strand independent)
    pub canonical: bool,

    /// Number of threads for parallel operations (0 = all available cores)
    pub num_threads: usize,

    /// RAM limit in MiB for external sorting
    pub ram_limit_mib: usize,

    /// Fan-in of each wide merge round
    pub merge_step: usize,

    /// In-memory sort of extraction and external-sort chunks
    pub sort_algorithm: SortAlgorithm,

    /// Inputs are already minimizer streams: skip extraction
    pub skip_minimizer_step: bool,

    /// Keep the per-file minimizer streams
    pub keep_minimizer_files: bool,

    /// Keep the intermediate merge streams
    pub keep_merge_files: bool,

    /// Sort the dense output by (colors, key)
    pub sort_dense_output: bool,

    /// Directory for temporary files during construction
    pub tmp_dirname: PathBuf,

    /// Backend of the intermediate streams
    pub intermediate_compression: Compression,

    /// Verbose output during construction
    pub verbose: bool,
}

impl Default for BuildConfiguration {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            m: DEFAULT_M,
            seed: DEFAULT_SEED,
            canonical: true,
            num_threads: 0, // 0 = use all available cores
            ram_limit_mib: DEFAULT_RAM_LIMIT_MIB,
            merge_step: DEFAULT_MERGE_STEP,
            sort_algorithm: SortAlgorithm::Std,
            skip_minimizer_step: false,
            keep_minimizer_files: false,
            keep_merge_files: false,
            sort_dense_output: true,
            tmp_dirname: PathBuf::from("breizh_tmp"),
            intermediate_compression: Compression::Raw,
            verbose: true,
        }
    }
}

impl BuildConfiguration {
    /// Create a new build configuration with the specified k-mer and minimizer lengths
    pub fn new(k: usize, m: usize) -> Result<Self> {
        let config = Self {
            k,
            m,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.m == 0 || self.m > MAX_M {
            return Err(BreizhError::Config(format!(
                "m must be in range [1, {}], got m={}",
                MAX_M, self.m
            )));
        }
        if self.k < self.m || self.k > MAX_K {
            return Err(BreizhError::Config(format!(
                "k must be in range [m, {}], got k={}, m={}",
                MAX_K, self.k, self.m
            )));
        }
        if self.merge_step < 2 {
            return Err(BreizhError::Config(format!(
                "merge_step must be at least 2, got {}",
                self.merge_step
            )));
        }
        if self.ram_limit_mib == 0 {
            return Err(BreizhError::Config("ram_limit_mib must be positive".to_string()));
        }
        Ok(())
    }

    /// Extension (with leading dot) of the intermediate streams
    pub fn intermediate_extension(&self) -> &'static str {
        self.intermediate_compression.extension()
    }

    /// Log configuration parameters via tracing
    pub fn print(&self) {
        tracing::info!("Build Configuration:");
        tracing::info!("  k = {}", self.k);
        tracing::info!("  m = {}", self.m);
        tracing::debug!("  seed = {}", self.seed);
        tracing::info!("  canonical = {}", self.canonical);
        if self.num_threads == 0 {
            tracing::info!("  num_threads = all available cores");
        } else {
            tracing::info!("  num_threads = {}", self.num_threads);
        }
        tracing::debug!("  ram_limit_mib = {}", self.ram_limit_mib);
        tracing::info!("  merge_step = {}", self.merge_step);
        tracing::debug!("  sort_algorithm = {}", self.sort_algorithm.name());
        tracing::debug!("  skip_minimizer_step = {}", self.skip_minimizer_step);
        tracing::debug!("  keep_minimizer_files = {}", self.keep_minimizer_files);
        tracing::debug!("  keep_merge_files = {}", self.keep_merge_files);
        tracing::debug!("  sort_dense_output = {}", self.sort_dense_output);
        tracing::debug!("  tmp_dirname = {:?}", self.tmp_dirname);
        tracing::debug!("  intermediate extension = {}", self.intermediate_extension());
    }
}
