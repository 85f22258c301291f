//! Kleuren Pipeline - Parameterized Task-Graph Engine
//!
//! Declares bioinformatics pipelines as graphs of shell-command processes with
//! templated inputs, outputs and parameters, then runs them with bounded
//! parallelism, up-to-date skipping and failure propagation. Ships the kleuren
//! pipeline (jellyfish k-mer counting, BFT construction, bubble detection) as
//! its client.
//!
//! # Architecture
//!
//! - [`workflow`]: Templates, processes, graph validation and run bookkeeping
//! - [`execution`]: Scheduler, per-process execution and run summaries
//! - [`monitoring`]: Resource usage tracking and execution timeline
//! - [`pipeline`]: The kleuren pipeline configuration and graph
//!
//! # Example
//!
//! ```rust,no_run
//! use kleuren_pipeline::execution::Engine;
//! use kleuren_pipeline::pipeline::{build_workflow, discover_genomes, PipelineConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::load("pipeline.yaml")?;
//!     config.validate()?;
//!
//!     let genomes = discover_genomes(&config.genome_dir, &config.genome_pattern)?;
//!     let workflow = build_workflow(&config, &genomes)?.seal()?;
//!
//!     let mut engine = Engine::new(workflow);
//!     engine.set_max_parallel(config.max_parallel);
//!
//!     let summary = engine.run();
//!     println!("{}", summary.render());
//!     Ok(())
//! }
//! ```

pub mod execution;
pub mod monitoring;
pub mod pipeline;
pub mod workflow;

// Re-export commonly used types
pub use execution::{Engine, RunSummary};
pub use pipeline::PipelineConfig;
pub use workflow::{Process, SealedWorkflow, Workflow};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "kleuren-pipeline";
