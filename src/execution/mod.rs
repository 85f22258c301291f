//! Workflow Execution Module
//!
//! Runs sealed workflows: parallel scheduling, per-process execution and the
//! final run summary.
//!
//! # Architecture
//!
//! - [`engine`]: Scheduler loop dispatching ready processes to workers
//! - [`step`]: Resolution, skip check and shell invocation of one process
//! - [`summary`]: Per-process outcomes and reports

pub mod engine;
pub mod step;
pub mod summary;

pub use engine::{Engine, PlannedProcess, DEFAULT_MAX_PARALLEL};
pub use step::{CancelToken, ExecutionError, ResolvedProcess, StepOutcome};
pub use summary::{ProcessOutcome, RunSummary};
