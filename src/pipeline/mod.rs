//! Kleuren Pipeline Module
//!
//! The concrete pipeline built on the workflow engine.
//!
//! - [`config`]: Settings, YAML loading and validation
//! - [`discovery`]: Genome file lookup
//! - [`kleuren`]: Graph construction

pub mod config;
pub mod discovery;
pub mod kleuren;

pub use config::{ConfigError, PipelineConfig};
pub use discovery::{discover_genomes, GenomeSet};
pub use kleuren::build_workflow;
