//! Workflow Errors
//!
//! Construction and seal-time errors for workflow graphs, plus the
//! template errors shared by graph assembly and dispatch.

use thiserror::Error;

use super::template::TokenKind;

/// Errors raised while parsing or resolving a template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// The template text contains a directive that cannot be parsed.
    #[error("malformed template '{template}' at byte {position}: {reason}")]
    Malformed {
        template: String,
        position: usize,
        reason: String,
    },

    /// A directive has no concrete value to substitute.
    #[error("unresolved reference {{{}:{name}}}", .kind.prefix())]
    Unresolved { kind: TokenKind, name: String },
}

/// Errors raised while assembling or sealing a workflow graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("process name must not be empty")]
    EmptyProcessName,

    #[error("duplicate process name: '{0}'")]
    DuplicateProcess(String),

    #[error("process '{process}' already declares {kind} '{name}'")]
    DuplicatePort {
        process: String,
        kind: TokenKind,
        name: String,
    },

    #[error("unknown process handle #{0}")]
    UnknownProcess(usize),

    #[error("process '{process}' has no {kind} named '{name}'")]
    UnknownPort {
        process: String,
        kind: TokenKind,
        name: String,
    },

    #[error("{kind} '{name}' of process '{process}' is already bound")]
    Rebind {
        process: String,
        kind: TokenKind,
        name: String,
    },

    #[error("process '{process}' references undeclared {kind} '{name}'")]
    UndeclaredReference {
        process: String,
        kind: TokenKind,
        name: String,
    },

    #[error("{kind} '{name}' of process '{process}' is not bound")]
    UnboundReference {
        process: String,
        kind: TokenKind,
        name: String,
    },

    #[error("output '{output}' of process '{process}' references output '{reference}'")]
    OutputReferencesOutput {
        process: String,
        output: String,
        reference: String,
    },

    #[error("output path '{path}' is written by both '{first}' and '{second}'")]
    OutputPathConflict {
        path: String,
        first: String,
        second: String,
    },

    #[error("dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("process '{process}': {source}")]
    Template {
        process: String,
        #[source]
        source: TemplateError,
    },
}
