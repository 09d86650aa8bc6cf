//! FASTA/FASTQ parsing with automatic decompression
//!
//! Reads DNA sequences from FASTA or FASTQ files, with transparent
//! gzip decompression. Sequences are passed through as-is: bases outside
//! A, C, G, T only break the minimizer windows downstream.

use needletail::parse_fastx_file;
use std::path::Path;

use crate::error::{BreizhError, Result};

/// Parse a FASTA/FASTQ file and call a function for each sequence
///
/// # Arguments
/// * `path` - Path to input file (may be gzipped)
/// * `callback` - Function called for each sequence, receives (name, sequence)
///
/// # Errors
/// Returns [`BreizhError::Parse`] if the file cannot be opened or a record
/// is malformed, or the first error returned by `callback`.
pub fn parse_sequences<P, F>(path: P, mut callback: F) -> Result<()>
where
    P: AsRef<Path>,
    F: FnMut(&[u8], &[u8]) -> Result<()>,
{
    let path = path.as_ref();
    let parse_error = |e: needletail::errors::ParseError| BreizhError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    // needletail automatically handles gzip decompression
    let mut reader = parse_fastx_file(path).map_err(parse_error)?;

    while let Some(record) = reader.next() {
        let record = record.map_err(parse_error)?;
        let seq = record.seq();
        callback(record.id(), &seq)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_fasta_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, ">seq1").unwrap();
        writeln!(temp_file, "ACGT").unwrap();
        writeln!(temp_file, ">seq2").unwrap();
        writeln!(temp_file, "TGCANNA").unwrap();
        temp_file.flush().unwrap();

        let mut sequences = Vec::new();
        parse_sequences(temp_file.path(), |name, seq| {
            sequences.push((name.to_vec(), seq.to_vec()));
            Ok(())
        })
        .unwrap();

        assert_eq!(sequences.len(), 2);
        assert_eq!(sequences[0].0, b"seq1");
        assert_eq!(sequences[0].1, b"ACGT");
        assert_eq!(sequences[1].0, b"seq2");
        assert_eq!(sequences[1].1, b"TGCANNA");
    }

    #[test]
    fn test_parse_fastq_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "@read1\nACGT\n+\nIIII").unwrap();
        writeln!(temp_file, "@read2\nTGCATGCA\n+\nIIIIIIII").unwrap();
        temp_file.flush().unwrap();

        let mut lengths = Vec::new();
        parse_sequences(temp_file.path(), |_name, seq| {
            lengths.push(seq.len());
            Ok(())
        })
        .unwrap();
        assert_eq!(lengths, vec![4, 8]);
    }

    #[test]
    fn test_missing_file() {
        let err = parse_sequences("/nonexistent/breizh/input.fa", |_, _| Ok(())).unwrap_err();
        assert!(matches!(err, BreizhError::Parse { .. }));
    }
}
