use anyhow::{bail, Context};
use breizh_lib::stream::Compression;
use breizh_lib::{
    check_file_sorted, check_keys_sorted, generate_minimizers, BuildConfiguration, ExternalSorter,
    RecordLayout, SortAlgorithm,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "breizh")]
#[command(version = "0.1.0")]
#[command(about = "BreiZH: colored minimizer index construction", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a colored minimizer index from sequence files
    Build {
        /// Input FASTA/FASTQ files (one color each)
        #[arg(required_unless_present = "list")]
        inputs: Vec<PathBuf>,

        /// File listing one input path per line
        #[arg(short, long)]
        list: Option<PathBuf>,

        /// Output prefix
        #[arg(short, long, default_value = "breizh_index")]
        output: PathBuf,

        /// K-mer length
        #[arg(short, long, default_value = "31")]
        k: usize,

        /// Minimizer length
        #[arg(short, long, default_value = "19")]
        m: usize,

        /// Seed of the minimizer hash
        #[arg(long, default_value = "1")]
        seed: u64,

        /// Rank forward-strand m-mers instead of canonical ones
        #[arg(long)]
        forward: bool,

        /// Number of threads (0 = all available cores)
        #[arg(short = 't', long, default_value = "0")]
        threads: usize,

        /// RAM limit in MiB for external sorting
        #[arg(short = 'r', long, default_value = "4096")]
        ram_limit: usize,

        /// Fan-in of each wide merge round
        #[arg(long, default_value = "8")]
        merge_step: usize,

        /// In-memory sort algorithm (std, stable, parallel)
        #[arg(long, default_value = "std")]
        sort_algorithm: String,

        /// Inputs are already minimizer streams
        #[arg(long)]
        skip_minimizer_step: bool,

        /// Keep the per-file minimizer streams
        #[arg(long)]
        keep_minimizer_files: bool,

        /// Keep the intermediate merge streams
        #[arg(long)]
        keep_merge_files: bool,

        /// Leave the dense output in key order
        #[arg(long)]
        no_dense_sort: bool,

        /// Directory for temporary files
        #[arg(long, default_value = "breizh_tmp")]
        tmp_dir: PathBuf,

        /// Compression of the intermediate streams
        #[arg(long, value_enum, default_value = "raw")]
        compression: CompressionArg,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Sort a record stream by (colors, key) under a RAM budget
    Sort {
        /// Input stream
        input: PathBuf,

        /// Output stream
        output: PathBuf,

        /// Color capacity of the records (multiple of 64)
        #[arg(short, long)]
        colors: usize,

        /// Number of sort workers (0 = all available cores)
        #[arg(short = 't', long, default_value = "0")]
        threads: usize,

        /// RAM limit in MiB
        #[arg(short = 'r', long, default_value = "4096")]
        ram_limit: usize,

        /// In-memory sort algorithm (std, stable, parallel)
        #[arg(long, default_value = "std")]
        sort_algorithm: String,

        /// Directory for temporary files
        #[arg(long, default_value = "breizh_tmp")]
        tmp_dir: PathBuf,

        /// Keep the input stream
        #[arg(long)]
        keep_input: bool,
    },

    /// Check the record order of a stream
    Check {
        /// Stream to check
        input: PathBuf,

        /// Color capacity of the records (0 for raw minimizer streams)
        #[arg(short, long, default_value = "0")]
        colors: usize,

        /// Order to verify
        #[arg(long, value_enum, default_value = "key")]
        order: OrderArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CompressionArg {
    Raw,
    Gz,
    Bz2,
    Lz4,
}

impl From<CompressionArg> for Compression {
    fn from(arg: CompressionArg) -> Self {
        match arg {
            CompressionArg::Raw => Compression::Raw,
            CompressionArg::Gz => Compression::Gzip,
            CompressionArg::Bz2 => Compression::Bzip2,
            CompressionArg::Lz4 => Compression::Lz4,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OrderArg {
    /// Strictly ascending keys (merge outputs)
    Key,
    /// Colors first, key as tie-break (sorted dense output)
    Colors,
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber (RUST_LOG overrides the default level)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            inputs,
            list,
            output,
            k,
            m,
            seed,
            forward,
            threads,
            ram_limit,
            merge_step,
            sort_algorithm,
            skip_minimizer_step,
            keep_minimizer_files,
            keep_merge_files,
            no_dense_sort,
            tmp_dir,
            compression,
            verbose,
        } => {
            let mut files = inputs;
            if let Some(list) = list {
                files.extend(read_file_list(&list)?);
            }
            let config = BuildConfiguration {
                k,
                m,
                seed,
                canonical: !forward,
                num_threads: threads,
                ram_limit_mib: ram_limit,
                merge_step,
                sort_algorithm: sort_algorithm.parse()?,
                skip_minimizer_step,
                keep_minimizer_files,
                keep_merge_files,
                sort_dense_output: !no_dense_sort,
                tmp_dirname: tmp_dir,
                intermediate_compression: compression.into(),
                verbose,
            };
            build_command(&files, &output, &config)?;
        }
        Commands::Sort {
            input,
            output,
            colors,
            threads,
            ram_limit,
            sort_algorithm,
            tmp_dir,
            keep_input,
        } => {
            let algorithm: SortAlgorithm = sort_algorithm.parse()?;
            sort_command(&input, &output, colors, threads, ram_limit, algorithm, &tmp_dir, keep_input)?;
        }
        Commands::Check { input, colors, order } => {
            check_command(&input, colors, order)?;
        }
    }

    Ok(())
}

/// Read a list of input paths, one per line, skipping blank lines
fn read_file_list(path: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file list {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect())
}

/// Build an index from FASTA/FASTQ (or minimizer) inputs
fn build_command(files: &[PathBuf], output: &Path, config: &BuildConfiguration) -> anyhow::Result<()> {
    info!("Building BreiZH index...");
    info!("  Inputs: {} files", files.len());
    info!("  Output: {}", output.display());
    if files.is_empty() {
        bail!("no input files given");
    }

    let summary = generate_minimizers(files, output, config).context("Index construction failed")?;

    info!("Index built successfully!");
    info!("  Colors: {} (capacity {})", summary.real_colors, summary.numb_colors);
    info!("  Dense:  {} keys -> {}", summary.dense_records, summary.dense_path.display());
    info!(
        "  Sparse: {} keys -> {} ({}-bit indices, up to {} colors)",
        summary.sparse_records,
        summary.sparse_path.display(),
        summary.layout.bits(),
        summary.layout.dense_threshold()
    );
    info!("  Colors manifest: {}", summary.manifest_path.display());
    if let Some(stats) = summary.extract_stats {
        info!("  Extracted {} minimizers from {} bases", stats.minimizers, stats.bases);
    }
    Ok(())
}

/// Externally sort a record stream
#[allow(clippy::too_many_arguments)]
fn sort_command(
    input: &Path,
    output: &Path,
    colors: usize,
    threads: usize,
    ram_limit: usize,
    algorithm: SortAlgorithm,
    tmp_dir: &Path,
    keep_input: bool,
) -> anyhow::Result<()> {
    if colors % 64 != 0 {
        bail!("--colors must be a multiple of 64, got {}", colors);
    }
    let threads = if threads == 0 {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    } else {
        threads
    };
    let sorter = ExternalSorter::new(tmp_dir, ram_limit, threads, algorithm)?;
    let stats = sorter
        .sort_file(input, output, RecordLayout::for_colors(colors), keep_input)
        .with_context(|| format!("Failed to sort {}", input.display()))?;
    info!(
        "Sorted {} records ({} chunks, {} merge passes) into {}",
        stats.records,
        stats.chunks,
        stats.merge_passes,
        output.display()
    );
    Ok(())
}

/// Verify the record order of a stream
fn check_command(input: &Path, colors: usize, order: OrderArg) -> anyhow::Result<()> {
    let layout = RecordLayout::for_colors(colors);
    let sorted = match order {
        OrderArg::Key => check_keys_sorted(input, layout)?,
        OrderArg::Colors => check_file_sorted(input, layout)?,
    };
    if sorted {
        info!("{} is sorted", input.display());
        Ok(())
    } else {
        warn!("{} is NOT sorted", input.display());
        bail!("{} is not sorted", input.display())
    }
}
