//! Execution Planner
//!
//! Owns the per-process execution records of a single run:
//! - Ready-set tracking in declaration order
//! - State transitions (Pending → Ready → Running → terminal)
//! - Publication of resolved output paths to dependents
//! - Failure propagation (transitive Aborted marking)
//!
//! The planner is mutated only by the scheduler loop; workers never touch it.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::model::{OutputRef, ProcessId};
use super::sealed::SealedWorkflow;

/// State of a process during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    /// Waiting for upstream processes
    Pending,
    /// All upstreams succeeded or were skipped
    Ready,
    /// Handed to a worker
    Running,
    /// Command ran and produced every output
    Succeeded,
    /// Outputs were already up to date
    Skipped,
    /// Resolution or execution failed
    Failed,
    /// Never ran because an ancestor failed or the run halted
    Aborted,
}

impl ProcessState {
    /// Returns true for states a process never leaves.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Skipped | Self::Failed | Self::Aborted
        )
    }

    /// Returns true if dependents may consume this process's outputs.
    pub fn is_available(self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        };
        f.write_str(label)
    }
}

/// A resolved output port path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedOutput {
    pub port: String,
    pub path: PathBuf,
}

/// Execution bookkeeping for a single process.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub state: ProcessState,
    /// Command handed to the shell, if it was invoked
    pub command: Option<String>,
    /// Output paths, once resolved
    pub outputs: Vec<ResolvedOutput>,
    /// Why the process failed or was aborted
    pub failure: Option<String>,
    pub start_time: Option<Instant>,
    pub duration: Option<Duration>,
}

impl ExecutionRecord {
    fn new() -> Self {
        Self {
            state: ProcessState::Pending,
            command: None,
            outputs: Vec::new(),
            failure: None,
            start_time: None,
            duration: None,
        }
    }

    fn finish(&mut self, state: ProcessState) {
        self.state = state;
        if let Some(start) = self.start_time {
            self.duration = Some(start.elapsed());
        }
    }
}

/// Tracks the progress of one run over a sealed workflow.
pub struct ExecutionPlanner<'a> {
    graph: &'a SealedWorkflow,
    records: Vec<ExecutionRecord>,
    /// Upstreams not yet Succeeded/Skipped, per process
    waiting_on: Vec<usize>,
    ready: BTreeSet<ProcessId>,
    halted: bool,
}

impl<'a> ExecutionPlanner<'a> {
    /// Creates a planner with every root process Ready.
    pub fn new(graph: &'a SealedWorkflow) -> Self {
        let mut planner = Self {
            graph,
            records: (0..graph.len()).map(|_| ExecutionRecord::new()).collect(),
            waiting_on: graph.ids().map(|id| graph.upstream(id).len()).collect(),
            ready: BTreeSet::new(),
            halted: false,
        };

        for id in graph.ids() {
            if planner.waiting_on[id.index()] == 0 {
                planner.promote(id);
            }
        }

        info!(
            "Planner ready: {} processes, {} initially ready",
            graph.len(),
            planner.ready.len()
        );
        planner
    }

    /// Takes the earliest-declared Ready process, if any.
    ///
    /// The process stays Ready until [`mark_running`](Self::mark_running) or
    /// a terminal transition.
    pub fn next_ready(&mut self) -> Option<ProcessId> {
        if self.halted {
            return None;
        }
        self.ready.pop_first()
    }

    /// Returns the concrete path of an upstream output, once published.
    pub fn output_path(&self, source: &OutputRef) -> Option<&PathBuf> {
        let record = self.records.get(source.process.index())?;
        if !record.state.is_available() {
            return None;
        }
        record
            .outputs
            .iter()
            .find(|o| o.port == source.port)
            .map(|o| &o.path)
    }

    /// Marks a process as handed to a worker.
    pub fn mark_running(&mut self, id: ProcessId, command: String, outputs: Vec<ResolvedOutput>) {
        self.ready.remove(&id);
        let record = &mut self.records[id.index()];
        record.state = ProcessState::Running;
        record.command = Some(command);
        record.outputs = outputs;
        record.start_time = Some(Instant::now());
        debug!("Process '{}' running", self.graph.process(id).name());
    }

    /// Marks a process as successfully executed and releases its dependents.
    pub fn mark_succeeded(&mut self, id: ProcessId) {
        self.records[id.index()].finish(ProcessState::Succeeded);
        self.release_dependents(id);
    }

    /// Marks a process as skipped (outputs up to date) and releases its dependents.
    ///
    /// The command was never invoked, so it is not recorded.
    pub fn mark_skipped(&mut self, id: ProcessId) {
        let record = &mut self.records[id.index()];
        record.command = None;
        record.finish(ProcessState::Skipped);
        self.release_dependents(id);
    }

    /// Marks a process as failed and aborts everything downstream of it.
    ///
    /// `invoked` tells whether the external command actually ran.
    pub fn mark_failed(&mut self, id: ProcessId, cause: String, invoked: bool) {
        self.ready.remove(&id);
        let record = &mut self.records[id.index()];
        if !invoked {
            record.command = None;
        }
        record.failure = Some(cause);
        record.finish(ProcessState::Failed);

        let name = self.graph.process(id).name().to_string();
        let descendants = self.graph.descendants(id);
        let aborted = self.abort(descendants, &format!("upstream process '{}' failed", name));
        if aborted > 0 {
            warn!(
                "Aborted {} process(es) downstream of failed '{}'",
                aborted, name
            );
        }
    }

    /// Stops dispatching: every Pending or Ready process becomes Aborted.
    pub fn halt(&mut self, reason: &str) {
        if self.halted {
            return;
        }
        self.halted = true;
        let candidates: Vec<ProcessId> = self.graph.ids().collect();
        let aborted = self.abort(candidates, reason);
        warn!("Run halted ({}): {} process(es) aborted", reason, aborted);
    }

    /// Returns true once dispatching has been stopped.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Returns true if some process is still Pending, Ready or Running.
    pub fn has_work_remaining(&self) -> bool {
        self.records.iter().any(|r| !r.state.is_terminal())
    }

    /// Returns (terminal, total).
    pub fn progress(&self) -> (usize, usize) {
        let done = self.records.iter().filter(|r| r.state.is_terminal()).count();
        (done, self.records.len())
    }

    pub fn record(&self, id: ProcessId) -> &ExecutionRecord {
        &self.records[id.index()]
    }

    pub fn state(&self, id: ProcessId) -> ProcessState {
        self.records[id.index()].state
    }

    /// Consumes the planner, returning the records in declaration order.
    ///
    /// Anything still non-terminal is reported as Aborted.
    pub fn into_records(mut self) -> Vec<ExecutionRecord> {
        let stranded: Vec<ProcessId> = self
            .graph
            .ids()
            .filter(|id| !self.records[id.index()].state.is_terminal())
            .collect();
        if !stranded.is_empty() {
            self.abort(stranded, "run ended before the process could start");
        }
        self.records
    }

    fn promote(&mut self, id: ProcessId) {
        let record = &mut self.records[id.index()];
        if record.state == ProcessState::Pending {
            record.state = ProcessState::Ready;
            self.ready.insert(id);
            debug!("Process '{}' ready", self.graph.process(id).name());
        }
    }

    fn release_dependents(&mut self, id: ProcessId) {
        let graph = self.graph;
        for &next in graph.downstream(id) {
            let waiting = &mut self.waiting_on[next.index()];
            *waiting = waiting.saturating_sub(1);
            if *waiting == 0 {
                self.promote(next);
            }
        }
    }

    /// Aborts every listed process that is Pending or Ready.
    fn abort(&mut self, ids: Vec<ProcessId>, reason: &str) -> usize {
        let mut count = 0;
        for id in ids {
            let record = &mut self.records[id.index()];
            if matches!(record.state, ProcessState::Pending | ProcessState::Ready) {
                record.state = ProcessState::Aborted;
                record.failure = Some(reason.to_string());
                self.ready.remove(&id);
                count += 1;
            }
        }
        count
    }
}
