//! Genome discovery: every `*.<pattern>` file directly inside the genome
//! directory, as absolute paths in sorted order.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use super::config::ConfigError;

/// Genome files found for a run, plus the directory they live in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenomeSet {
    /// Absolute genome directory; multi-genome outputs are written here
    pub dir: PathBuf,
    pub files: Vec<PathBuf>,
}

impl GenomeSet {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

pub fn discover_genomes(dir: &Path, pattern: &str) -> Result<GenomeSet, ConfigError> {
    let genome_error = |source| ConfigError::GenomeDir {
        path: dir.to_path_buf(),
        source,
    };

    let dir = dir.canonicalize().map_err(genome_error)?;
    let suffix = format!(".{}", pattern);

    let mut files = Vec::new();
    for entry in fs::read_dir(&dir).map_err(genome_error)? {
        let path = entry.map_err(genome_error)?.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.len() > suffix.len() && n.ends_with(&suffix))
            .unwrap_or(false);
        if matches && path.is_file() {
            debug!("Found genome: {}", path.display());
            files.push(path);
        }
    }

    if files.is_empty() {
        return Err(ConfigError::NoGenomes {
            dir,
            pattern: pattern.to_string(),
        });
    }

    files.sort();
    info!("Found {} genome(s) in {}", files.len(), dir.display());
    Ok(GenomeSet { dir, files })
}
