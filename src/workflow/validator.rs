//! Workflow Validation
//!
//! Seals a [`Workflow`] into a [`SealedWorkflow`] after checking:
//! - Process names are unique
//! - Every template reference names a declared port or parameter
//! - Every input port and every referenced parameter is bound
//! - Output paths never reference other outputs
//! - Literal output paths are not shared between processes
//! - The dependency graph has no cycles
//!
//! On success the topological layers are computed once and stored.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Component, Path, PathBuf};

use log::{debug, info, warn};

use super::error::GraphError;
use super::model::{Process, ProcessId, Workflow};
use super::sealed::SealedWorkflow;
use super::template::TokenKind;

/// Validates a workflow and freezes it.
pub fn seal_workflow(workflow: Workflow) -> Result<SealedWorkflow, GraphError> {
    let (name, processes) = workflow.into_parts();
    info!(
        "Validating workflow '{}' with {} processes",
        name,
        processes.len()
    );

    if processes.is_empty() {
        warn!("Workflow '{}' has no processes", name);
    }

    let mut seen_names: HashSet<&str> = HashSet::new();
    for process in &processes {
        if !seen_names.insert(process.name()) {
            return Err(GraphError::DuplicateProcess(process.name().to_string()));
        }
    }

    for process in &processes {
        validate_process(process)?;
    }

    check_literal_outputs(&processes)?;

    let (upstream, downstream) = build_edges(&processes);
    check_cycles(&processes, &downstream)?;
    let (layer_of, layers) = compute_layers(&upstream, &downstream);

    debug!(
        "Topological layers: {:?}",
        layers
            .iter()
            .map(|layer| layer.iter().map(|id| processes[id.0].name()).collect::<Vec<_>>())
            .collect::<Vec<_>>()
    );
    info!(
        "Workflow '{}' sealed: {} processes in {} layers",
        name,
        processes.len(),
        layers.len()
    );

    Ok(SealedWorkflow {
        name,
        processes,
        upstream,
        downstream,
        layer_of,
        layers,
    })
}

/// Checks one process's templates against its declarations and bindings.
fn validate_process(process: &Process) -> Result<(), GraphError> {
    let mut referenced_params: HashSet<&str> = HashSet::new();

    for token in process.command().references() {
        if !process.declares(token.kind, &token.name) {
            return Err(undeclared(process, token.kind, &token.name));
        }
        if token.kind == TokenKind::Param {
            referenced_params.insert(&token.name);
        }
    }

    for output in process.outputs() {
        for token in output.path.references() {
            if token.kind == TokenKind::Output {
                return Err(GraphError::OutputReferencesOutput {
                    process: process.name().to_string(),
                    output: output.name.clone(),
                    reference: token.name.clone(),
                });
            }
            if !process.declares(token.kind, &token.name) {
                return Err(undeclared(process, token.kind, &token.name));
            }
            if token.kind == TokenKind::Param {
                referenced_params.insert(&token.name);
            }
        }
    }

    for input in process.inputs() {
        if input.source.is_none() {
            return Err(GraphError::UnboundReference {
                process: process.name().to_string(),
                kind: TokenKind::Input,
                name: input.name.clone(),
            });
        }
    }

    for param in process.params() {
        if param.binding.is_some() {
            continue;
        }
        if referenced_params.contains(param.name.as_str()) {
            return Err(GraphError::UnboundReference {
                process: process.name().to_string(),
                kind: TokenKind::Param,
                name: param.name.clone(),
            });
        }
        warn!(
            "Process '{}': parameter '{}' is declared but never bound or used",
            process.name(),
            param.name
        );
    }

    if process.outputs().is_empty() {
        debug!(
            "Process '{}' declares no outputs and will always run",
            process.name()
        );
    }

    Ok(())
}

fn undeclared(process: &Process, kind: TokenKind, name: &str) -> GraphError {
    GraphError::UndeclaredReference {
        process: process.name().to_string(),
        kind,
        name: name.to_string(),
    }
}

/// Rejects two processes declaring the same reference-free output path.
///
/// Templated paths are checked again at dispatch, once they are concrete.
fn check_literal_outputs(processes: &[Process]) -> Result<(), GraphError> {
    let mut owners: HashMap<PathBuf, &str> = HashMap::new();

    for process in processes {
        for output in process.outputs() {
            if !output.path.is_literal() {
                continue;
            }
            let path = output.path.as_str();
            let key = normalize_path(Path::new(path));
            if let Some(first) = owners.insert(key, process.name()) {
                return Err(GraphError::OutputPathConflict {
                    path: path.to_string(),
                    first: first.to_string(),
                    second: process.name().to_string(),
                });
            }
        }
    }

    Ok(())
}

/// Lexically normalizes a path: `.` components and repeated separators go.
///
/// `..` components are kept.
pub fn normalize_path(path: &Path) -> PathBuf {
    let normalized: PathBuf = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    if normalized.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        normalized
    }
}

/// Derives deduplicated upstream/downstream adjacency from the bindings.
fn build_edges(processes: &[Process]) -> (Vec<Vec<ProcessId>>, Vec<Vec<ProcessId>>) {
    let mut upstream = vec![Vec::new(); processes.len()];
    let mut downstream = vec![Vec::new(); processes.len()];

    for (index, process) in processes.iter().enumerate() {
        let mut sources: Vec<ProcessId> = process.upstream_refs().map(|r| r.process).collect();
        sources.sort();
        sources.dedup();

        for source in &sources {
            downstream[source.0].push(ProcessId(index));
        }
        upstream[index] = sources;
    }

    (upstream, downstream)
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Depth-first cycle check, reporting the first cycle found as a name path.
fn check_cycles(processes: &[Process], downstream: &[Vec<ProcessId>]) -> Result<(), GraphError> {
    let mut marks = vec![Mark::Unvisited; processes.len()];
    let mut path = Vec::new();

    for start in 0..processes.len() {
        if marks[start] == Mark::Unvisited {
            if let Some(cycle) = visit(ProcessId(start), downstream, &mut marks, &mut path) {
                let names = cycle
                    .into_iter()
                    .map(|id| processes[id.0].name().to_string())
                    .collect();
                return Err(GraphError::Cycle(names));
            }
        }
    }

    Ok(())
}

fn visit(
    node: ProcessId,
    downstream: &[Vec<ProcessId>],
    marks: &mut [Mark],
    path: &mut Vec<ProcessId>,
) -> Option<Vec<ProcessId>> {
    marks[node.0] = Mark::OnStack;
    path.push(node);

    for &next in &downstream[node.0] {
        match marks[next.0] {
            Mark::OnStack => {
                let start = path.iter().position(|&id| id == next).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(next);
                return Some(cycle);
            }
            Mark::Unvisited => {
                if let Some(cycle) = visit(next, downstream, marks, path) {
                    return Some(cycle);
                }
            }
            Mark::Done => {}
        }
    }

    path.pop();
    marks[node.0] = Mark::Done;
    None
}

/// Groups processes into topological layers using Kahn's algorithm.
///
/// Must only be called on an acyclic graph.
fn compute_layers(
    upstream: &[Vec<ProcessId>],
    downstream: &[Vec<ProcessId>],
) -> (Vec<usize>, Vec<Vec<ProcessId>>) {
    let mut in_degree: Vec<usize> = upstream.iter().map(Vec::len).collect();
    let mut layer_of = vec![0; upstream.len()];
    let mut queue: VecDeque<ProcessId> = (0..upstream.len())
        .filter(|&i| in_degree[i] == 0)
        .map(ProcessId)
        .collect();

    while let Some(current) = queue.pop_front() {
        for &next in &downstream[current.0] {
            layer_of[next.0] = layer_of[next.0].max(layer_of[current.0] + 1);
            in_degree[next.0] -= 1;
            if in_degree[next.0] == 0 {
                queue.push_back(next);
            }
        }
    }

    let depth = layer_of.iter().map(|&l| l + 1).max().unwrap_or(0);
    let mut layers = vec![Vec::new(); depth];
    for (index, &layer) in layer_of.iter().enumerate() {
        layers[layer].push(ProcessId(index));
    }

    (layer_of, layers)
}
