//! Sealed Workflow
//!
//! The immutable, validated form of a [`Workflow`](super::Workflow). Only a
//! sealed workflow can be executed.

use super::model::{Process, ProcessId};

/// A validated, acyclic workflow graph.
///
/// Produced by [`Workflow::seal`](super::Workflow::seal). Holds the processes
/// in declaration order, the derived dependency edges, and the topological
/// layering used by the scheduler.
#[derive(Debug, Clone)]
pub struct SealedWorkflow {
    pub(crate) name: String,
    pub(crate) processes: Vec<Process>,
    pub(crate) upstream: Vec<Vec<ProcessId>>,
    pub(crate) downstream: Vec<Vec<ProcessId>>,
    pub(crate) layer_of: Vec<usize>,
    pub(crate) layers: Vec<Vec<ProcessId>>,
}

impl SealedWorkflow {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets a process by handle.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued for this workflow.
    pub fn process(&self, id: ProcessId) -> &Process {
        &self.processes[id.0]
    }

    /// Finds a process handle by name.
    pub fn find(&self, name: &str) -> Option<ProcessId> {
        self.processes
            .iter()
            .position(|p| p.name() == name)
            .map(ProcessId)
    }

    /// Iterates over all process handles in declaration order.
    pub fn ids(&self) -> impl Iterator<Item = ProcessId> {
        (0..self.processes.len()).map(ProcessId)
    }

    pub fn processes(&self) -> &[Process] {
        &self.processes
    }

    /// Processes whose outputs `id` consumes.
    pub fn upstream(&self, id: ProcessId) -> &[ProcessId] {
        &self.upstream[id.0]
    }

    /// Processes that consume an output of `id`.
    pub fn downstream(&self, id: ProcessId) -> &[ProcessId] {
        &self.downstream[id.0]
    }

    /// Topological layers: layer 0 has no dependencies, layer k depends only
    /// on layers below k.
    pub fn layers(&self) -> &[Vec<ProcessId>] {
        &self.layers
    }

    pub fn layer_of(&self, id: ProcessId) -> usize {
        self.layer_of[id.0]
    }

    /// Returns every process reachable from `id` through dependency edges.
    pub fn descendants(&self, id: ProcessId) -> Vec<ProcessId> {
        let mut seen = vec![false; self.processes.len()];
        let mut stack = self.downstream(id).to_vec();
        let mut found = Vec::new();

        while let Some(next) = stack.pop() {
            if seen[next.0] {
                continue;
            }
            seen[next.0] = true;
            found.push(next);
            stack.extend_from_slice(self.downstream(next));
        }

        found.sort();
        found
    }

    /// Returns the number of processes.
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    /// Returns true if the workflow has no processes.
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::workflow::{Process, Workflow};

    fn diamond() -> Workflow {
        let mut workflow = Workflow::new("diamond");
        let a = workflow
            .add_process(
                Process::new("a", "touch {o:out}")
                    .unwrap()
                    .with_output("out", "a.txt")
                    .unwrap(),
            )
            .unwrap();
        let mut mids = Vec::new();
        for name in ["b", "c"] {
            let id = workflow
                .add_process(
                    Process::new(name, "cp {i:in} {o:out}")
                        .unwrap()
                        .with_input("in")
                        .unwrap()
                        .with_output("out", format!("{}.txt", name))
                        .unwrap(),
                )
                .unwrap();
            workflow.bind_input(id, "in", a, "out").unwrap();
            mids.push(id);
        }
        let d = workflow
            .add_process(
                Process::new("d", "cat {i:left} {i:right} > {o:out}")
                    .unwrap()
                    .with_input("left")
                    .unwrap()
                    .with_input("right")
                    .unwrap()
                    .with_output("out", "d.txt")
                    .unwrap(),
            )
            .unwrap();
        workflow.bind_input(d, "left", mids[0], "out").unwrap();
        workflow.bind_input(d, "right", mids[1], "out").unwrap();
        workflow
    }

    #[test]
    fn test_sealed_layers() {
        let sealed = diamond().seal().unwrap();
        let names: Vec<Vec<&str>> = sealed
            .layers()
            .iter()
            .map(|layer| layer.iter().map(|id| sealed.process(*id).name()).collect())
            .collect();
        assert_eq!(names, vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
    }

    #[test]
    fn test_sealed_adjacency() {
        let sealed = diamond().seal().unwrap();
        let a = sealed.find("a").unwrap();
        let d = sealed.find("d").unwrap();
        assert_eq!(sealed.downstream(a).len(), 2);
        assert_eq!(sealed.upstream(d).len(), 2);
        assert_eq!(sealed.layer_of(d), 2);
    }

    #[test]
    fn test_sealed_descendants() {
        let sealed = diamond().seal().unwrap();
        let a = sealed.find("a").unwrap();
        let b = sealed.find("b").unwrap();

        assert_eq!(sealed.descendants(a).len(), 3);
        let from_b: Vec<_> = sealed
            .descendants(b)
            .into_iter()
            .map(|id| sealed.process(id).name().to_string())
            .collect();
        assert_eq!(from_b, vec!["d"]);
    }
}
