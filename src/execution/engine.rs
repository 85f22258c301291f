//! Workflow Execution Engine
//!
//! Runs a sealed workflow:
//! - Bounded parallel dispatch in dependency order
//! - Output path claiming across processes
//! - Failure propagation, optional fail-fast, cancellation
//! - Timeline and resource monitoring

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::monitoring::{EventType, ExecutionTimeline, ResourceMonitor, ResourceUsage};
use crate::workflow::planner::{ExecutionPlanner, ProcessState, ResolvedOutput};
use crate::workflow::{ProcessId, SealedWorkflow, TemplateError};

use super::step::{
    execute_process, locate, resolve_process, CancelToken, ExecContext, ExecutionError,
    ResolvedProcess, StepOutcome,
};
use super::summary::{ProcessOutcome, RunSummary};

/// Interval for resource monitoring samples.
const MONITOR_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Default number of concurrently running processes.
pub const DEFAULT_MAX_PARALLEL: usize = 4;

type Completion = (ProcessId, Result<StepOutcome, ExecutionError>);

/// One entry of a dry-run preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedProcess {
    pub name: String,
    pub layer: usize,
    pub command: String,
    pub outputs: Vec<ResolvedOutput>,
}

/// Workflow execution engine.
///
/// # Example
///
/// ```rust,no_run
/// use kleuren_pipeline::execution::Engine;
/// use kleuren_pipeline::workflow::{Process, Workflow};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut workflow = Workflow::new("example");
///     workflow.add_process(
///         Process::new("hello", "echo hello > {o:out}")?.with_output("out", "hello.txt")?,
///     )?;
///
///     let mut engine = Engine::new(workflow.seal()?);
///     engine.set_max_parallel(2);
///     engine.set_working_dir("/data/analysis");
///
///     let summary = engine.run();
///     println!("{}", summary.render());
///     Ok(())
/// }
/// ```
pub struct Engine {
    graph: SealedWorkflow,
    max_parallel: usize,
    working_dir: Option<PathBuf>,
    shell: String,
    fail_fast: bool,
    monitor_resources: bool,
    cancel: CancelToken,
}

impl Engine {
    pub fn new(graph: SealedWorkflow) -> Self {
        Self {
            graph,
            max_parallel: DEFAULT_MAX_PARALLEL,
            working_dir: None,
            shell: "bash".to_string(),
            fail_fast: false,
            monitor_resources: true,
            cancel: CancelToken::new(),
        }
    }

    /// Sets the maximum number of parallel processes; 0 means one per CPU.
    pub fn set_max_parallel(&mut self, max: usize) {
        self.max_parallel = if max == 0 { num_cpus::get() } else { max };
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Sets the working directory commands run in and relative paths resolve against.
    pub fn set_working_dir(&mut self, dir: impl Into<PathBuf>) {
        self.working_dir = Some(dir.into());
    }

    /// Sets the shell used as `<shell> -c <command>`.
    pub fn set_shell(&mut self, shell: impl Into<String>) {
        self.shell = shell.into();
    }

    /// Stops dispatching new processes after the first failure.
    pub fn set_fail_fast(&mut self, fail_fast: bool) {
        self.fail_fast = fail_fast;
    }

    pub fn set_monitor_resources(&mut self, enabled: bool) {
        self.monitor_resources = enabled;
    }

    /// Returns a token that cancels the run from any thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn workflow(&self) -> &SealedWorkflow {
        &self.graph
    }

    /// Resolves every command in layer order without executing anything.
    ///
    /// Output paths are assumed to be produced as declared.
    pub fn preview(&self) -> Result<Vec<PlannedProcess>, TemplateError> {
        let mut published: HashMap<(ProcessId, String), PathBuf> = HashMap::new();
        let mut planned = Vec::with_capacity(self.graph.len());

        for (layer, ids) in self.graph.layers().iter().enumerate() {
            for &id in ids {
                let process = self.graph.process(id);
                let resolved = resolve_process(id, process, |source| {
                    published
                        .get(&(source.process, source.port.clone()))
                        .cloned()
                })
                .map_err(|e| {
                    error!("Cannot resolve process '{}': {}", process.name(), e);
                    e
                })?;

                for output in &resolved.outputs {
                    published.insert((id, output.port.clone()), output.path.clone());
                }
                planned.push(PlannedProcess {
                    name: resolved.name,
                    layer,
                    command: resolved.command,
                    outputs: resolved.outputs,
                });
            }
        }

        Ok(planned)
    }

    /// Executes the workflow and reports every process's outcome.
    ///
    /// Failures are contained per process and recorded in the summary; this
    /// never returns early.
    pub fn run(&self) -> RunSummary {
        let started_at = Utc::now();
        let start_time = Instant::now();

        info!(
            "Starting workflow '{}' ({} processes, max parallel: {}, fail fast: {})",
            self.graph.name(),
            self.graph.len(),
            self.max_parallel,
            self.fail_fast
        );
        if self.graph.is_empty() {
            warn!("Workflow '{}' has no processes", self.graph.name());
        }

        let ctx = ExecContext {
            shell: self.shell.clone(),
            working_dir: self.working_dir.clone(),
        };
        let mut planner = ExecutionPlanner::new(&self.graph);
        let mut timeline = ExecutionTimeline::new();
        let mut claimed: HashMap<PathBuf, ProcessId> = HashMap::new();
        let (tx, rx) = channel::<Completion>();

        let monitor_running = Arc::new(AtomicBool::new(true));
        let monitor_handle = self
            .monitor_resources
            .then(|| spawn_monitor(Arc::clone(&monitor_running)));

        let mut running_count = 0;

        loop {
            if self.cancel.is_cancelled() && !planner.is_halted() {
                planner.halt("run cancelled");
            }

            while running_count < self.max_parallel {
                let Some(id) = planner.next_ready() else {
                    break;
                };
                let name = self.graph.process(id).name();

                match self.prepare(id, &planner, &mut claimed) {
                    Ok(resolved) => {
                        info!("Starting process: {}", name);
                        timeline.record(name, EventType::Started);
                        planner.mark_running(id, resolved.command.clone(), resolved.outputs.clone());
                        self.spawn_worker(resolved, ctx.clone(), tx.clone());
                        running_count += 1;
                    }
                    Err(e) => {
                        error!("Process '{}' failed before start: {}", name, e);
                        timeline.record(name, EventType::Failed);
                        planner.mark_failed(id, e.to_string(), false);
                        self.halt_on_failure(&mut planner, name);
                    }
                }
            }

            if running_count == 0 {
                break;
            }

            let (id, result) = match rx.recv() {
                Ok(completion) => completion,
                Err(e) => {
                    error!("Failed to receive process completion: {}", e);
                    break;
                }
            };
            running_count -= 1;
            let name = self.graph.process(id).name();

            match result {
                Ok(StepOutcome::Executed) => {
                    planner.mark_succeeded(id);
                    timeline.record(name, EventType::Succeeded);
                    info!(
                        "Process '{}' completed successfully{}",
                        name,
                        format_duration(planner.record(id).duration)
                    );
                }
                Ok(StepOutcome::Skipped) => {
                    planner.mark_skipped(id);
                    timeline.record(name, EventType::Skipped);
                    info!("Process '{}' skipped (outputs up to date)", name);
                }
                Err(e) => {
                    error!("Process '{}' failed: {}", name, e);
                    timeline.record(name, EventType::Failed);
                    planner.mark_failed(id, e.to_string(), e.command_invoked());
                    self.halt_on_failure(&mut planner, name);
                }
            }

            let (done, total) = planner.progress();
            debug!("Progress: {}/{} processes finished", done, total);
        }

        monitor_running.store(false, Ordering::Relaxed);
        let resources = monitor_handle.and_then(|handle| match handle.join() {
            Ok(usage) => usage,
            Err(_) => {
                warn!("Resource monitor thread panicked");
                None
            }
        });

        let records = planner.into_records();
        let mut processes = Vec::with_capacity(records.len());
        for (process, record) in self.graph.processes().iter().zip(records) {
            if record.state == ProcessState::Aborted {
                timeline.record(process.name(), EventType::Aborted);
            }
            processes.push(ProcessOutcome {
                name: process.name().to_string(),
                state: record.state,
                command: record.command,
                outputs: record.outputs,
                failure: record.failure,
                duration_secs: record.duration.map(|d| d.as_secs_f64()),
            });
        }

        let success = processes.iter().all(|p| p.state.is_available());
        let elapsed = start_time.elapsed();
        if success {
            info!("Workflow '{}' completed in {:.2?}", self.graph.name(), elapsed);
        } else {
            error!("Workflow '{}' failed after {:.2?}", self.graph.name(), elapsed);
        }

        RunSummary {
            workflow: self.graph.name().to_string(),
            started_at,
            elapsed_secs: elapsed.as_secs_f64(),
            success,
            processes,
            resources,
            timeline: timeline.gantt_chart(),
        }
    }

    /// Resolves a ready process and claims its output paths.
    fn prepare(
        &self,
        id: ProcessId,
        planner: &ExecutionPlanner<'_>,
        claimed: &mut HashMap<PathBuf, ProcessId>,
    ) -> Result<ResolvedProcess, ExecutionError> {
        let process = self.graph.process(id);
        let resolved = resolve_process(id, process, |source| planner.output_path(source).cloned())?;

        let working_dir = self.working_dir.as_deref();
        let paths: Vec<PathBuf> = resolved
            .outputs
            .iter()
            .map(|o| locate(&o.path, working_dir))
            .collect();

        for path in &paths {
            if let Some(&owner) = claimed.get(path) {
                if owner != id {
                    return Err(ExecutionError::OutputConflict {
                        path: path.clone(),
                        owner: self.graph.process(owner).name().to_string(),
                    });
                }
            }
        }
        for path in paths {
            claimed.insert(path, id);
        }

        Ok(resolved)
    }

    fn spawn_worker(&self, resolved: ResolvedProcess, ctx: ExecContext, tx: Sender<Completion>) {
        let cancel = self.cancel.clone();
        thread::spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                execute_process(&resolved, &ctx, &cancel)
            }))
            .unwrap_or(Err(ExecutionError::Panicked));

            if let Err(e) = tx.send((resolved.id, result)) {
                error!("Failed to send completion signal: {}", e);
            }
        });
    }

    fn halt_on_failure(&self, planner: &mut ExecutionPlanner<'_>, name: &str) {
        if self.fail_fast {
            planner.halt(&format!("run halted after '{}' failed", name));
        }
    }
}

fn spawn_monitor(running: Arc<AtomicBool>) -> JoinHandle<Option<ResourceUsage>> {
    thread::spawn(move || {
        let Some(mut monitor) = ResourceMonitor::new() else {
            warn!("Resource monitoring unavailable on this platform");
            return None;
        };
        while running.load(Ordering::Relaxed) {
            monitor.sample();
            thread::sleep(MONITOR_SAMPLE_INTERVAL);
        }
        monitor.usage()
    })
}

fn format_duration(duration: Option<Duration>) -> String {
    duration
        .map(|d| format!(" in {:.2?}", d))
        .unwrap_or_default()
}
