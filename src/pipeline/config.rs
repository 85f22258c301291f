//! Pipeline Configuration
//!
//! Settings of the kleuren pipeline, loaded from an optional YAML file and
//! overridden from the command line. Everything here is validated before it
//! reaches the workflow as literal parameters.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating the pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("k-mer size must be a positive multiple of 9, got {0}")]
    InvalidKmerSize(u32),

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("no genome files matching '*.{pattern}' in {}", .dir.display())]
    NoGenomes { dir: PathBuf, pattern: String },

    #[error("cannot read genome directory '{}': {source}", .path.display())]
    GenomeDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Settings of one pipeline run.
///
/// Missing YAML keys fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub jellyfish: PathBuf,
    pub kleuren: PathBuf,
    pub bft: PathBuf,
    pub genome_dir: PathBuf,
    /// Genome file extension, without the leading dot
    pub genome_pattern: String,
    pub kmer_size: u32,
    pub min_colors: u32,
    pub max_depth: u32,
    /// Jellyfish hash size when counting a single genome
    pub single_hash_size: String,
    /// Jellyfish hash size when counting all genomes together
    pub multi_hash_size: String,
    pub max_parallel: usize,
    pub fail_fast: bool,
    pub shell: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            jellyfish: PathBuf::from("./jellyfish"),
            kleuren: PathBuf::from("./kleuren"),
            bft: PathBuf::from("./bft"),
            genome_dir: PathBuf::from("./data"),
            genome_pattern: "fasta".to_string(),
            kmer_size: 9,
            min_colors: 1,
            max_depth: 30,
            single_hash_size: "100M".to_string(),
            multi_hash_size: "500M".to_string(),
            max_parallel: 4,
            fail_fast: false,
            shell: "bash".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Loads a configuration file. Does not validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!("Loading configuration: {}", path.display());

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    /// Checks every domain constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kmer_size == 0 || self.kmer_size % 9 != 0 {
            return Err(ConfigError::InvalidKmerSize(self.kmer_size));
        }
        if self.min_colors == 0 {
            return Err(invalid("min_colors", "must be at least 1"));
        }
        if self.max_depth == 0 {
            return Err(invalid("max_depth", "must be at least 1"));
        }
        if self.max_parallel == 0 {
            return Err(invalid("max_parallel", "must be at least 1"));
        }

        let pattern = self.genome_pattern.as_str();
        if pattern.is_empty() || pattern.starts_with('.') || pattern.contains(['/', '*']) {
            return Err(invalid(
                "genome_pattern",
                "must be a file extension without the leading dot",
            ));
        }

        check_hash_size("single_hash_size", &self.single_hash_size)?;
        check_hash_size("multi_hash_size", &self.multi_hash_size)?;

        if self.shell.trim().is_empty() {
            return Err(invalid("shell", "must not be empty"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

/// Jellyfish accepts a number with an optional k/M/G suffix.
fn check_hash_size(field: &'static str, value: &str) -> Result<(), ConfigError> {
    let digits = value.trim_end_matches(['k', 'K', 'm', 'M', 'g', 'G']);
    let suffix_len = value.len() - digits.len();
    if digits.is_empty() || suffix_len > 1 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid(
            field,
            format!("'{}' is not a size like 100M", value),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.single_hash_size, "100M");
        assert_eq!(config.multi_hash_size, "500M");
        assert_eq!(config.max_parallel, 4);
    }

    #[test]
    fn test_load_partial_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipeline.yaml");
        fs::write(
            &path,
            "genome_dir: /data/genomes\nkmer_size: 27\njellyfish: /opt/bin/jellyfish\n",
        )
        .unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.genome_dir, PathBuf::from("/data/genomes"));
        assert_eq!(config.kmer_size, 27);
        assert_eq!(config.jellyfish, PathBuf::from("/opt/bin/jellyfish"));
        assert_eq!(config.genome_pattern, "fasta");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let err = PipelineConfig::load(dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_unknown_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipeline.yaml");
        fs::write(&path, "kmersize: 9\n").unwrap();

        let err = PipelineConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_kmer_size_must_be_multiple_of_nine() {
        for k in [0, 10, 31] {
            let config = PipelineConfig {
                kmer_size: k,
                ..Default::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidKmerSize(v)) if v == k
            ));
        }
        let config = PipelineConfig {
            kmer_size: 18,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_values() {
        let cases = [
            PipelineConfig {
                min_colors: 0,
                ..Default::default()
            },
            PipelineConfig {
                max_depth: 0,
                ..Default::default()
            },
            PipelineConfig {
                genome_pattern: ".fasta".to_string(),
                ..Default::default()
            },
            PipelineConfig {
                single_hash_size: "lots".to_string(),
                ..Default::default()
            },
            PipelineConfig {
                multi_hash_size: "5MM".to_string(),
                ..Default::default()
            },
        ];
        for config in cases {
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidValue { .. })),
                "{:?} should be rejected",
                config
            );
        }
    }

    #[test]
    fn test_hash_size_formats() {
        assert!(check_hash_size("f", "100M").is_ok());
        assert!(check_hash_size("f", "2G").is_ok());
        assert!(check_hash_size("f", "1000000").is_ok());
        assert!(check_hash_size("f", "M").is_err());
    }
}
