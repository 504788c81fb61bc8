//! Parallel directory processing.
//!
//! Walks a directory tree, disassembles every non-empty file, optionally
//! writes a listing per file, and checks that each disassembly compiles
//! back to the original bytes.

use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::compiler;
use crate::disassembler::Disassembler;
use crate::error::Result;
use crate::formatter::{ListingFormatter, ScriptFormatter};
use crate::meta::Meta;
use crate::types::DisassemblerOptions;

/// Options for a batch run.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Directory receiving one listing per input, mirroring the input tree
    pub output_dir: Option<PathBuf>,
    /// Heuristics for every file
    pub disassembler: DisassemblerOptions,
    /// Listing settings for written output
    pub listing: ListingFormatter,
}

/// Round-trip outcome for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The compiled output matches the input byte for byte.
    Identical,
    /// The compiled output differs; digests are SHA-256 in hex.
    Mismatch {
        /// Digest of the input
        expected: String,
        /// Digest of the compiled output
        actual: String,
    },
    /// Disassembly, compilation or output failed.
    Failed(String),
}

/// Result of processing one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    /// Input file
    pub path: PathBuf,
    /// Image length in words
    pub words: usize,
    /// Number of diagnostics recorded
    pub diagnostics: usize,
    /// Round-trip result
    pub outcome: Outcome,
}

impl FileReport {
    /// Whether the file round-tripped unchanged.
    pub fn is_ok(&self) -> bool {
        self.outcome == Outcome::Identical
    }
}

/// SHA-256 of `bytes`, hex encoded.
pub fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Collect every non-empty regular file under `root`, sorted by path.
pub fn collect_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_file() && entry.metadata().map_err(std::io::Error::from)?.len() > 0 {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Process every file under `root` in parallel.
pub fn process_directory(root: &Path, meta: &Meta, options: &BatchOptions) -> Result<Vec<FileReport>> {
    let files = collect_files(root)?;
    debug!("Processing {} files under {}", files.len(), root.display());

    let reports = files
        .par_iter()
        .map(|path| process_file(root, path, meta, options))
        .collect();
    Ok(reports)
}

/// Disassemble, list and round-trip a single file.
pub fn process_file(root: &Path, path: &Path, meta: &Meta, options: &BatchOptions) -> FileReport {
    let mut report = FileReport {
        path: path.to_path_buf(),
        words: 0,
        diagnostics: 0,
        outcome: Outcome::Identical,
    };

    let result = round_trip(root, path, meta, options, &mut report);

    report.outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => Outcome::Failed(err.to_string()),
    };
    if !report.is_ok() {
        warn!("{}: {:?}", path.display(), report.outcome);
    }
    report
}

fn round_trip(
    root: &Path,
    path: &Path,
    meta: &Meta,
    options: &BatchOptions,
    report: &mut FileReport,
) -> Result<Outcome> {
    let bytes = fs::read(path)?;
    let script = Disassembler::with_options(meta, options.disassembler.clone()).disassemble(&bytes)?;
    report.words = script.len();
    report.diagnostics = script.diagnostics.len();

    if let Some(output_dir) = &options.output_dir {
        let relative = path.strip_prefix(root).unwrap_or(path);
        let mut target = output_dir.join(relative).into_os_string();
        target.push(".txt");
        let target = PathBuf::from(target);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, options.listing.format_script(&script, meta, relative))?;
    }

    let compiled = compiler::compile_to_bytes(&script)?;
    if compiled == bytes {
        Ok(Outcome::Identical)
    } else {
        Ok(Outcome::Mismatch {
            expected: digest(&bytes),
            actual: digest(&compiled),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|word| word.to_le_bytes()).collect()
    }

    #[test]
    fn test_digest() {
        assert_eq!(
            digest(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_collect_skips_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.bin"), image(&[0x4, 0x49])).unwrap();
        fs::write(dir.path().join("a.bin"), image(&[0x4, 0x49])).unwrap();
        fs::write(dir.path().join("empty.bin"), b"").unwrap();

        let files = collect_files(dir.path()).unwrap();
        assert_eq!(
            files,
            vec![dir.path().join("a.bin"), dir.path().join("sub/b.bin")]
        );
    }

    #[test]
    fn test_process_directory() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        fs::write(input.path().join("ok.bin"), image(&[0x4, 0x0208, 5, 0x0200_0002, 0x49])).unwrap();
        fs::write(input.path().join("odd.bin"), [1u8, 2, 3]).unwrap();

        let options = BatchOptions {
            output_dir: Some(output.path().to_path_buf()),
            ..BatchOptions::default()
        };
        let reports = process_directory(input.path(), &Meta::new(), &options).unwrap();
        assert_eq!(reports.len(), 2);

        let odd = reports.iter().find(|r| r.path.ends_with("odd.bin")).unwrap();
        assert!(matches!(odd.outcome, Outcome::Failed(_)));

        let ok = reports.iter().find(|r| r.path.ends_with("ok.bin")).unwrap();
        assert!(ok.is_ok());
        assert_eq!(ok.words, 5);

        let listing = fs::read_to_string(output.path().join("ok.bin.txt")).unwrap();
        assert!(listing.contains("mov 0x5, stor[2]"));
    }
}
