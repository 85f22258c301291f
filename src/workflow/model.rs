//! Workflow Data Model
//!
//! Processes, their ports and parameters, and the mutable [`Workflow`]
//! builder that wires them together.
//!
//! # Example
//!
//! ```
//! use kleuren_pipeline::workflow::{Process, Workflow};
//!
//! # fn main() -> Result<(), kleuren_pipeline::workflow::GraphError> {
//! let mut workflow = Workflow::new("kmers");
//!
//! let count = workflow.add_process(
//!     Process::new("count", "jellyfish count -m {p:k} -o {o:jfDB} genome.fasta")?
//!         .with_literal("k", 9)?
//!         .with_output("jfDB", "genome.fasta.{p:k}.jf")?,
//! )?;
//!
//! let dump = workflow.add_process(
//!     Process::new("dump", "jellyfish dump -c -o {o:kmers} {i:jfDB}")?
//!         .with_input("jfDB")?
//!         .with_output("kmers", "{i:jfDB|%.jf}.kmers.txt")?,
//! )?;
//!
//! workflow.bind_input(dump, "jfDB", count, "jfDB")?;
//! let sealed = workflow.seal()?;
//! assert_eq!(sealed.layers().len(), 2);
//! # Ok(())
//! # }
//! ```

use std::fmt;

use log::debug;

use super::error::GraphError;
use super::sealed::SealedWorkflow;
use super::template::{Template, TokenKind};
use super::validator::seal_workflow;

/// Handle to a process inside a [`Workflow`].
///
/// Handles are declaration indices, so ordering them gives declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub(crate) usize);

impl ProcessId {
    /// Returns the declaration index of this process.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A scalar parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Int(i64),
    Str(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{}", n),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

/// Reference to an output port of another process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutputRef {
    pub process: ProcessId,
    pub port: String,
}

/// What a parameter is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamBinding {
    Literal(ParamValue),
    FromOutput(OutputRef),
}

/// An input slot, fed by exactly one upstream output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputPort {
    pub name: String,
    pub source: Option<OutputRef>,
}

/// An output slot whose path is derived from a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPort {
    pub name: String,
    pub path: Template,
}

/// A named scalar input to the command template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub binding: Option<ParamBinding>,
}

/// A unit of work: one external command template plus its ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Process {
    name: String,
    command: Template,
    inputs: Vec<InputPort>,
    outputs: Vec<OutputPort>,
    params: Vec<Parameter>,
}

impl Process {
    /// Creates a process from a name and a command template.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Result<Self, GraphError> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(GraphError::EmptyProcessName);
        }
        let command = Template::parse(command.into().trim()).map_err(|source| {
            GraphError::Template {
                process: name.clone(),
                source,
            }
        })?;

        Ok(Self {
            name,
            command,
            inputs: Vec::new(),
            outputs: Vec::new(),
            params: Vec::new(),
        })
    }

    /// Declares an input port.
    pub fn declare_input(&mut self, name: impl Into<String>) -> Result<(), GraphError> {
        let name = name.into();
        self.ensure_undeclared(TokenKind::Input, &name)?;
        self.inputs.push(InputPort { name, source: None });
        Ok(())
    }

    /// Declares an output port with a path template.
    pub fn declare_output(
        &mut self,
        name: impl Into<String>,
        path_template: impl Into<String>,
    ) -> Result<(), GraphError> {
        let name = name.into();
        self.ensure_undeclared(TokenKind::Output, &name)?;
        let path = Template::parse(path_template).map_err(|source| GraphError::Template {
            process: self.name.clone(),
            source,
        })?;
        self.outputs.push(OutputPort { name, path });
        Ok(())
    }

    /// Declares an unbound parameter.
    pub fn declare_param(&mut self, name: impl Into<String>) -> Result<(), GraphError> {
        let name = name.into();
        self.ensure_undeclared(TokenKind::Param, &name)?;
        self.params.push(Parameter {
            name,
            binding: None,
        });
        Ok(())
    }

    /// Binds a declared parameter to a literal value.
    pub fn bind_param_literal(
        &mut self,
        name: &str,
        value: impl Into<ParamValue>,
    ) -> Result<(), GraphError> {
        self.bind_param(name, ParamBinding::Literal(value.into()))
    }

    /// Builder form of [`Process::declare_input`].
    pub fn with_input(mut self, name: impl Into<String>) -> Result<Self, GraphError> {
        self.declare_input(name)?;
        Ok(self)
    }

    /// Builder form of [`Process::declare_output`].
    pub fn with_output(
        mut self,
        name: impl Into<String>,
        path_template: impl Into<String>,
    ) -> Result<Self, GraphError> {
        self.declare_output(name, path_template)?;
        Ok(self)
    }

    /// Builder form of [`Process::declare_param`].
    pub fn with_param(mut self, name: impl Into<String>) -> Result<Self, GraphError> {
        self.declare_param(name)?;
        Ok(self)
    }

    /// Declares a parameter and binds it to a literal in one call.
    pub fn with_literal(
        mut self,
        name: impl Into<String>,
        value: impl Into<ParamValue>,
    ) -> Result<Self, GraphError> {
        let name = name.into();
        self.declare_param(name.clone())?;
        self.bind_param_literal(&name, value)?;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command(&self) -> &Template {
        &self.command
    }

    pub fn inputs(&self) -> &[InputPort] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputPort] {
        &self.outputs
    }

    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    pub fn input(&self, name: &str) -> Option<&InputPort> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&OutputPort> {
        self.outputs.iter().find(|p| p.name == name)
    }

    pub fn param(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Returns true if a port or parameter of this kind is declared.
    pub fn declares(&self, kind: TokenKind, name: &str) -> bool {
        match kind {
            TokenKind::Param => self.param(name).is_some(),
            TokenKind::Input => self.input(name).is_some(),
            TokenKind::Output => self.output(name).is_some(),
        }
    }

    /// Iterates over every upstream output this process consumes.
    pub fn upstream_refs(&self) -> impl Iterator<Item = &OutputRef> {
        let from_inputs = self.inputs.iter().filter_map(|p| p.source.as_ref());
        let from_params = self.params.iter().filter_map(|p| match &p.binding {
            Some(ParamBinding::FromOutput(r)) => Some(r),
            _ => None,
        });
        from_inputs.chain(from_params)
    }

    fn ensure_undeclared(&self, kind: TokenKind, name: &str) -> Result<(), GraphError> {
        if self.declares(kind, name) {
            return Err(GraphError::DuplicatePort {
                process: self.name.clone(),
                kind,
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn bind_input(&mut self, name: &str, source: OutputRef) -> Result<(), GraphError> {
        let process = self.name.clone();
        let port = self
            .inputs
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| GraphError::UnknownPort {
                process: process.clone(),
                kind: TokenKind::Input,
                name: name.to_string(),
            })?;
        if port.source.is_some() {
            return Err(GraphError::Rebind {
                process,
                kind: TokenKind::Input,
                name: name.to_string(),
            });
        }
        port.source = Some(source);
        Ok(())
    }

    fn bind_param(&mut self, name: &str, binding: ParamBinding) -> Result<(), GraphError> {
        let process = self.name.clone();
        let param = self
            .params
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| GraphError::UnknownPort {
                process: process.clone(),
                kind: TokenKind::Param,
                name: name.to_string(),
            })?;
        if param.binding.is_some() {
            return Err(GraphError::Rebind {
                process,
                kind: TokenKind::Param,
                name: name.to_string(),
            });
        }
        param.binding = Some(binding);
        Ok(())
    }
}

/// A workflow under construction.
///
/// Processes are added, then wired with the `bind_*` methods. Every
/// cross-process data flow goes through an explicit binding; [`Workflow::seal`]
/// validates the result and freezes it for execution.
#[derive(Debug, Clone, Default)]
pub struct Workflow {
    name: String,
    processes: Vec<Process>,
}

impl Workflow {
    /// Creates a new empty workflow.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            processes: Vec::new(),
        }
    }

    /// Adds a process, returning its handle.
    pub fn add_process(&mut self, process: Process) -> Result<ProcessId, GraphError> {
        if self.processes.iter().any(|p| p.name == process.name) {
            return Err(GraphError::DuplicateProcess(process.name));
        }
        let id = ProcessId(self.processes.len());
        debug!("Added process '{}' as {}", process.name, id);
        self.processes.push(process);
        Ok(id)
    }

    /// Feeds input port `input` of `to` from output port `output` of `from`.
    pub fn bind_input(
        &mut self,
        to: ProcessId,
        input: &str,
        from: ProcessId,
        output: &str,
    ) -> Result<(), GraphError> {
        let source = self.output_ref(from, output)?;
        self.process_mut(to)?.bind_input(input, source)
    }

    /// Binds parameter `param` of `to` to the path of output `output` of `from`.
    pub fn bind_param_from_output(
        &mut self,
        to: ProcessId,
        param: &str,
        from: ProcessId,
        output: &str,
    ) -> Result<(), GraphError> {
        let source = self.output_ref(from, output)?;
        self.process_mut(to)?
            .bind_param(param, ParamBinding::FromOutput(source))
    }

    /// Binds parameter `param` of `to` to a literal value.
    pub fn bind_param_literal(
        &mut self,
        to: ProcessId,
        param: &str,
        value: impl Into<ParamValue>,
    ) -> Result<(), GraphError> {
        self.process_mut(to)?.bind_param_literal(param, value)
    }

    /// Gets a process by handle.
    pub fn process(&self, id: ProcessId) -> Option<&Process> {
        self.processes.get(id.0)
    }

    /// Finds a process handle by name.
    pub fn find(&self, name: &str) -> Option<ProcessId> {
        self.processes
            .iter()
            .position(|p| p.name == name)
            .map(ProcessId)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn processes(&self) -> &[Process] {
        &self.processes
    }

    /// Returns the number of processes in the workflow.
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    /// Returns true if the workflow has no processes.
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Validates the graph and freezes it for execution.
    pub fn seal(self) -> Result<SealedWorkflow, GraphError> {
        seal_workflow(self)
    }

    pub(crate) fn into_parts(self) -> (String, Vec<Process>) {
        (self.name, self.processes)
    }

    fn process_mut(&mut self, id: ProcessId) -> Result<&mut Process, GraphError> {
        self.processes
            .get_mut(id.0)
            .ok_or(GraphError::UnknownProcess(id.0))
    }

    fn output_ref(&self, from: ProcessId, output: &str) -> Result<OutputRef, GraphError> {
        let process = self
            .process(from)
            .ok_or(GraphError::UnknownProcess(from.0))?;
        if process.output(output).is_none() {
            return Err(GraphError::UnknownPort {
                process: process.name.clone(),
                kind: TokenKind::Output,
                name: output.to_string(),
            });
        }
        Ok(OutputRef {
            process: from,
            port: output.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count() -> Process {
        Process::new("count", "jellyfish count -o {o:jfDB} {p:genome}")
            .unwrap()
            .with_literal("genome", "g1.fasta")
            .unwrap()
            .with_output("jfDB", "{p:genome}.jf")
            .unwrap()
    }

    fn dump() -> Process {
        Process::new("dump", "jellyfish dump -o {o:kmers} {i:jfDB}")
            .unwrap()
            .with_input("jfDB")
            .unwrap()
            .with_output("kmers", "{i:jfDB|%.jf}.txt")
            .unwrap()
    }

    #[test]
    fn test_process_creation() {
        let process = count();
        assert_eq!(process.name(), "count");
        assert_eq!(process.outputs().len(), 1);
        assert_eq!(process.params().len(), 1);
        assert!(process.declares(TokenKind::Output, "jfDB"));
        assert!(!process.declares(TokenKind::Input, "jfDB"));
    }

    #[test]
    fn test_process_empty_name_rejected() {
        assert_eq!(
            Process::new("  ", "echo").unwrap_err(),
            GraphError::EmptyProcessName
        );
    }

    #[test]
    fn test_process_malformed_command_rejected() {
        let err = Process::new("bad", "cat {i:reads").unwrap_err();
        assert!(matches!(err, GraphError::Template { .. }));
    }

    #[test]
    fn test_duplicate_port_rejected() {
        let err = dump().with_input("jfDB").unwrap_err();
        assert!(matches!(err, GraphError::DuplicatePort { .. }));
    }

    #[test]
    fn test_same_name_different_kinds_allowed() {
        let process = Process::new("copy", "cp {i:data} {o:data}")
            .unwrap()
            .with_input("data")
            .unwrap()
            .with_output("data", "copy.txt")
            .unwrap();
        assert_eq!(process.inputs().len(), 1);
        assert_eq!(process.outputs().len(), 1);
    }

    #[test]
    fn test_param_literal_rebind_rejected() {
        let mut process = Process::new("p", "echo {p:k}").unwrap().with_param("k").unwrap();
        process.bind_param_literal("k", 9).unwrap();
        let err = process.bind_param_literal("k", 18).unwrap_err();
        assert!(matches!(err, GraphError::Rebind { .. }));
    }

    #[test]
    fn test_bind_unknown_param() {
        let mut process = Process::new("p", "echo").unwrap();
        let err = process.bind_param_literal("k", 9).unwrap_err();
        assert!(matches!(err, GraphError::UnknownPort { .. }));
    }

    #[test]
    fn test_workflow_add_duplicate_process() {
        let mut workflow = Workflow::new("wf");
        workflow.add_process(count()).unwrap();
        let err = workflow.add_process(count()).unwrap_err();
        assert_eq!(err, GraphError::DuplicateProcess("count".to_string()));
        assert_eq!(workflow.len(), 1);
    }

    #[test]
    fn test_bind_input_registers_edge() {
        let mut workflow = Workflow::new("wf");
        let c = workflow.add_process(count()).unwrap();
        let d = workflow.add_process(dump()).unwrap();
        workflow.bind_input(d, "jfDB", c, "jfDB").unwrap();

        let refs: Vec<_> = workflow.process(d).unwrap().upstream_refs().collect();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].process, c);
        assert_eq!(refs[0].port, "jfDB");
    }

    #[test]
    fn test_bind_input_twice_rejected() {
        let mut workflow = Workflow::new("wf");
        let c = workflow.add_process(count()).unwrap();
        let d = workflow.add_process(dump()).unwrap();
        workflow.bind_input(d, "jfDB", c, "jfDB").unwrap();

        let err = workflow.bind_input(d, "jfDB", c, "jfDB").unwrap_err();
        assert!(matches!(err, GraphError::Rebind { kind: TokenKind::Input, .. }));
    }

    #[test]
    fn test_bind_from_unknown_output() {
        let mut workflow = Workflow::new("wf");
        let c = workflow.add_process(count()).unwrap();
        let d = workflow.add_process(dump()).unwrap();

        let err = workflow.bind_input(d, "jfDB", c, "nope").unwrap_err();
        assert!(matches!(err, GraphError::UnknownPort { kind: TokenKind::Output, .. }));
    }

    #[test]
    fn test_bind_unknown_process() {
        let mut workflow = Workflow::new("wf");
        let d = workflow.add_process(dump()).unwrap();
        let err = workflow.bind_input(d, "jfDB", ProcessId(7), "jfDB").unwrap_err();
        assert_eq!(err, GraphError::UnknownProcess(7));
    }

    #[test]
    fn test_bind_param_from_output() {
        let mut workflow = Workflow::new("wf");
        let c = workflow.add_process(count()).unwrap();
        let user = workflow
            .add_process(
                Process::new("user", "wc -l {p:db}")
                    .unwrap()
                    .with_param("db")
                    .unwrap(),
            )
            .unwrap();
        workflow.bind_param_from_output(user, "db", c, "jfDB").unwrap();

        let process = workflow.process(user).unwrap();
        assert!(matches!(
            process.param("db").unwrap().binding,
            Some(ParamBinding::FromOutput(_))
        ));
        assert_eq!(process.upstream_refs().count(), 1);
    }

    #[test]
    fn test_param_value_display() {
        assert_eq!(ParamValue::from(9).to_string(), "9");
        assert_eq!(ParamValue::from(-3i64).to_string(), "-3");
        assert_eq!(ParamValue::from("100M").to_string(), "100M");
    }

    #[test]
    fn test_workflow_find() {
        let mut workflow = Workflow::new("wf");
        let c = workflow.add_process(count()).unwrap();
        assert_eq!(workflow.find("count"), Some(c));
        assert_eq!(workflow.find("ghost"), None);
        assert!(!workflow.is_empty());
    }
}
