//! Workflow Definition Module
//!
//! Data structures for declaring a graph of processes, validating it and
//! tracking its execution.
//!
//! # Structure
//!
//! - [`template`]: `{p:…}`, `{i:…}`, `{o:…}` placeholder parsing and resolution
//! - [`model`]: Processes, ports, parameters and the workflow builder
//! - [`validator`]: Seal-time checks and topological layering
//! - [`sealed`]: The immutable, validated graph
//! - [`planner`]: Per-run execution records and ready-set tracking

pub mod error;
pub mod model;
pub mod planner;
pub mod sealed;
pub mod template;
pub mod validator;

pub use error::{GraphError, TemplateError};
pub use model::{
    InputPort, OutputPort, OutputRef, ParamBinding, ParamValue, Parameter, Process, ProcessId,
    Workflow,
};
pub use planner::{ExecutionPlanner, ExecutionRecord, ProcessState, ResolvedOutput};
pub use sealed::SealedWorkflow;
pub use template::{Template, TokenKind};
