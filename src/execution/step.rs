//! Individual Process Execution
//!
//! Handles the execution of a single workflow process including:
//! - Template resolution against upstream outputs
//! - The skip check (outputs present and up to date)
//! - Output directory creation
//! - Shell invocation under a reaping child guard
//! - Cancellation and cleanup of partial outputs

use std::collections::HashMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use log::{debug, error, warn};
use thiserror::Error;

use crate::workflow::model::{OutputRef, ParamBinding, Process, ProcessId};
use crate::workflow::planner::ResolvedOutput;
use crate::workflow::template::TokenKind;
use crate::workflow::validator::normalize_path;
use crate::workflow::TemplateError;

/// How often a running child is polled for exit and cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Number of stderr lines kept in failure messages.
const STDERR_TAIL_LINES: usize = 20;

/// Errors that fail a single process at dispatch or execution time.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    #[error("output path '{}' is already produced by '{owner}'", .path.display())]
    OutputConflict { path: PathBuf, owner: String },

    #[error("failed to start '{shell}': {source}")]
    Spawn {
        shell: String,
        #[source]
        source: io::Error,
    },

    #[error("command exited with status {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    #[error("command terminated by a signal: {stderr}")]
    Signalled { stderr: String },

    #[error("declared output '{port}' was not created at {}", .path.display())]
    MissingOutput { port: String, path: PathBuf },

    #[error("cancelled before completion")]
    Cancelled,

    #[error("worker thread panicked")]
    Panicked,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ExecutionError {
    /// Returns true if the external command was started before the failure.
    pub fn command_invoked(&self) -> bool {
        matches!(
            self,
            Self::NonZeroExit { .. }
                | Self::Signalled { .. }
                | Self::MissingOutput { .. }
                | Self::Cancelled
                | Self::Panicked
        )
    }
}

/// Shared flag used to cancel a run from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; running commands are killed.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Settings shared by every worker of a run.
#[derive(Debug, Clone)]
pub struct ExecContext {
    pub shell: String,
    pub working_dir: Option<PathBuf>,
}

/// A process with every template resolved to concrete text.
#[derive(Debug, Clone)]
pub struct ResolvedProcess {
    pub id: ProcessId,
    pub name: String,
    pub command: String,
    pub outputs: Vec<ResolvedOutput>,
    /// Upstream paths this process reads (inputs and output-bound parameters)
    pub dependencies: Vec<PathBuf>,
}

/// How a dispatched process finished successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Executed,
    Skipped,
}

/// Resolves a process's parameters, inputs, outputs and command.
///
/// `upstream` maps a bound output reference to its published path. Output
/// paths are resolved first since the command may reference them.
pub fn resolve_process<F>(
    id: ProcessId,
    process: &Process,
    upstream: F,
) -> Result<ResolvedProcess, TemplateError>
where
    F: Fn(&OutputRef) -> Option<PathBuf>,
{
    let mut dependencies = Vec::new();

    let mut params: HashMap<&str, String> = HashMap::new();
    for param in process.params() {
        match &param.binding {
            Some(ParamBinding::Literal(value)) => {
                params.insert(&param.name, value.to_string());
            }
            Some(ParamBinding::FromOutput(source)) => {
                if let Some(path) = upstream(source) {
                    params.insert(&param.name, path.to_string_lossy().into_owned());
                    dependencies.push(path);
                }
            }
            None => {}
        }
    }

    let mut inputs: HashMap<&str, String> = HashMap::new();
    for input in process.inputs() {
        if let Some(path) = input.source.as_ref().and_then(&upstream) {
            inputs.insert(&input.name, path.to_string_lossy().into_owned());
            dependencies.push(path);
        }
    }

    let mut outputs = Vec::with_capacity(process.outputs().len());
    for output in process.outputs() {
        let path = output.path.resolve(|kind, name| match kind {
            TokenKind::Param => params.get(name).cloned(),
            TokenKind::Input => inputs.get(name).cloned(),
            TokenKind::Output => None,
        })?;
        outputs.push(ResolvedOutput {
            port: output.name.clone(),
            path: PathBuf::from(path),
        });
    }

    let command = process.command().resolve(|kind, name| match kind {
        TokenKind::Param => params.get(name).cloned(),
        TokenKind::Input => inputs.get(name).cloned(),
        TokenKind::Output => outputs
            .iter()
            .find(|o| o.port == name)
            .map(|o| o.path.to_string_lossy().into_owned()),
    })?;

    debug!("Resolved '{}': {}", process.name(), command);

    Ok(ResolvedProcess {
        id,
        name: process.name().to_string(),
        command,
        outputs,
        dependencies,
    })
}

/// Runs one resolved process to completion, or skips it when up to date.
pub fn execute_process(
    process: &ResolvedProcess,
    ctx: &ExecContext,
    cancel: &CancelToken,
) -> Result<StepOutcome, ExecutionError> {
    let working_dir = ctx.working_dir.as_deref();

    if outputs_up_to_date(process, working_dir) {
        debug!("Process '{}' outputs are up to date", process.name);
        return Ok(StepOutcome::Skipped);
    }

    ensure_output_directories(&process.outputs, working_dir)?;

    match run_command(process, ctx, cancel) {
        Ok(()) => {}
        Err(e) => {
            if e.command_invoked() {
                discard_partial_outputs(process, working_dir);
            }
            return Err(e);
        }
    }

    for output in &process.outputs {
        let path = locate(&output.path, working_dir);
        if !path.exists() {
            return Err(ExecutionError::MissingOutput {
                port: output.port.clone(),
                path,
            });
        }
    }

    Ok(StepOutcome::Executed)
}

/// Resolves `path` against the working directory when it is relative.
///
/// The result is lexically normalized, so `./a.txt` and `a.txt` locate the
/// same file.
pub fn locate(path: &Path, working_dir: Option<&Path>) -> PathBuf {
    match working_dir {
        Some(dir) if path.is_relative() => normalize_path(&dir.join(path)),
        _ => normalize_path(path),
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// The skip condition.
///
/// True when the process declares outputs, all of them exist, and none is
/// older than the newest dependency. A process without outputs always runs.
pub fn outputs_up_to_date(process: &ResolvedProcess, working_dir: Option<&Path>) -> bool {
    if process.outputs.is_empty() {
        return false;
    }

    let mut oldest_output: Option<SystemTime> = None;
    for output in &process.outputs {
        match modified(&locate(&output.path, working_dir)) {
            Some(time) => {
                oldest_output = Some(oldest_output.map_or(time, |t| t.min(time)));
            }
            None => return false,
        }
    }

    let mut newest_input: Option<SystemTime> = None;
    for dependency in &process.dependencies {
        match modified(&locate(dependency, working_dir)) {
            Some(time) => {
                newest_input = Some(newest_input.map_or(time, |t| t.max(time)));
            }
            None => return false,
        }
    }

    match (newest_input, oldest_output) {
        (None, _) => true,
        (Some(input_time), Some(output_time)) => output_time >= input_time,
        (Some(_), None) => false,
    }
}

/// Creates parent directories for output files.
fn ensure_output_directories(
    outputs: &[ResolvedOutput],
    working_dir: Option<&Path>,
) -> Result<(), ExecutionError> {
    for output in outputs {
        let path = locate(&output.path, working_dir);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
                debug!("Created directory: {}", parent.display());
            }
        }
    }
    Ok(())
}

/// Removes whatever outputs a failed command left behind.
fn discard_partial_outputs(process: &ResolvedProcess, working_dir: Option<&Path>) {
    for output in &process.outputs {
        let path = locate(&output.path, working_dir);
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else if path.exists() {
            fs::remove_file(&path)
        } else {
            continue;
        };
        match removed {
            Ok(()) => debug!("Removed partial output {}", path.display()),
            Err(e) => warn!("Failed to remove partial output {}: {}", path.display(), e),
        }
    }
}

/// Owns a spawned child and kills and reaps it unless it was reaped already.
struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    fn spawn(command: &mut Command) -> io::Result<Self> {
        Ok(Self {
            child: command.spawn()?,
            reaped: false,
        })
    }

    fn poll(&mut self) -> io::Result<Option<ExitStatus>> {
        let status = self.child.try_wait()?;
        if status.is_some() {
            self.reaped = true;
        }
        Ok(status)
    }

    fn terminate(&mut self) {
        if self.reaped {
            return;
        }
        if let Err(e) = self.child.kill() {
            debug!("kill failed (child already exited?): {}", e);
        }
        if let Err(e) = self.child.wait() {
            warn!("Failed to reap child process {}: {}", self.child.id(), e);
        }
        self.reaped = true;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Reads a child pipe to the end on a helper thread.
fn drain<R>(pipe: Option<R>) -> Option<JoinHandle<String>>
where
    R: Read + Send + 'static,
{
    pipe.map(|mut reader| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            if let Err(e) = reader.read_to_end(&mut buf) {
                debug!("Pipe read ended early: {}", e);
            }
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle
        .map(|h| h.join().unwrap_or_default())
        .unwrap_or_default()
}

/// Returns the last `lines` lines of `text`.
fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

/// Invokes `<shell> -c <command>` and waits for it, honouring cancellation.
fn run_command(
    process: &ResolvedProcess,
    ctx: &ExecContext,
    cancel: &CancelToken,
) -> Result<(), ExecutionError> {
    let mut command = Command::new(&ctx.shell);
    command
        .arg("-c")
        .arg(&process.command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    if let Some(dir) = &ctx.working_dir {
        command.current_dir(dir);
        debug!("Executing '{}' in directory: {}", process.name, dir.display());
    }

    let mut guard = ChildGuard::spawn(&mut command).map_err(|source| ExecutionError::Spawn {
        shell: ctx.shell.clone(),
        source,
    })?;
    let stdout = drain(guard.child.stdout.take());
    let stderr = drain(guard.child.stderr.take());

    let status = loop {
        if cancel.is_cancelled() {
            guard.terminate();
            warn!("Process '{}' killed on cancellation", process.name);
            return Err(ExecutionError::Cancelled);
        }
        if let Some(status) = guard.poll()? {
            break status;
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stdout = collect(stdout);
    let stderr = collect(stderr);

    if status.success() {
        if !stdout.trim().is_empty() {
            debug!("Process '{}' output:\n{}", process.name, stdout);
        }
        return Ok(());
    }

    error!(
        "Process '{}' failed with exit code: {:?}",
        process.name,
        status.code()
    );
    if !stdout.trim().is_empty() {
        debug!("stdout:\n{}", stdout);
    }

    let stderr = match tail(&stderr, STDERR_TAIL_LINES) {
        s if s.is_empty() => "(no stderr)".to_string(),
        s => s,
    };
    match status.code() {
        Some(code) => Err(ExecutionError::NonZeroExit { code, stderr }),
        None => Err(ExecutionError::Signalled { stderr }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{Process, Workflow};
    use std::time::Instant;
    use tempfile::tempdir;

    fn context(dir: &Path) -> ExecContext {
        ExecContext {
            shell: "bash".to_string(),
            working_dir: Some(dir.to_path_buf()),
        }
    }

    fn resolved(command: &str, outputs: &[&str], dependencies: &[&str]) -> ResolvedProcess {
        ResolvedProcess {
            id: ProcessId(0),
            name: "test".to_string(),
            command: command.to_string(),
            outputs: outputs
                .iter()
                .map(|p| ResolvedOutput {
                    port: "out".to_string(),
                    path: PathBuf::from(p),
                })
                .collect(),
            dependencies: dependencies.iter().map(PathBuf::from).collect(),
        }
    }

    #[test]
    fn test_resolve_process_with_upstream() {
        let mut workflow = Workflow::new("wf");
        let count = workflow
            .add_process(
                Process::new("count", "jellyfish count -m {p:k} -o {o:jfDB} g1.fasta")
                    .unwrap()
                    .with_literal("k", 9)
                    .unwrap()
                    .with_output("jfDB", "g1.fasta.{p:k}.jf")
                    .unwrap(),
            )
            .unwrap();
        let dump = workflow
            .add_process(
                Process::new("dump", "jellyfish dump -c -o {o:kmers} {i:jfDB}")
                    .unwrap()
                    .with_input("jfDB")
                    .unwrap()
                    .with_literal("k", 9)
                    .unwrap()
                    .with_output("kmers", "{i:jfDB|%.9.jf}.kmers.{p:k}.txt")
                    .unwrap(),
            )
            .unwrap();
        workflow.bind_input(dump, "jfDB", count, "jfDB").unwrap();
        let sealed = workflow.seal().unwrap();

        let first = resolve_process(count, sealed.process(count), |_| None).unwrap();
        assert_eq!(first.command, "jellyfish count -m 9 -o g1.fasta.9.jf g1.fasta");
        assert!(first.dependencies.is_empty());

        let second = resolve_process(dump, sealed.process(dump), |r| {
            assert_eq!(r.process, count);
            Some(PathBuf::from("g1.fasta.9.jf"))
        })
        .unwrap();
        assert_eq!(
            second.command,
            "jellyfish dump -c -o g1.fasta.kmers.9.txt g1.fasta.9.jf"
        );
        assert_eq!(second.outputs[0].path, PathBuf::from("g1.fasta.kmers.9.txt"));
        assert_eq!(second.dependencies, vec![PathBuf::from("g1.fasta.9.jf")]);
    }

    #[test]
    fn test_resolve_process_missing_upstream_is_template_error() {
        let process = Process::new("dump", "cat {i:jfDB}")
            .unwrap()
            .with_input("jfDB")
            .unwrap();
        let err = resolve_process(ProcessId(0), &process, |_| None).unwrap_err();
        assert!(matches!(err, TemplateError::Unresolved { kind: TokenKind::Input, .. }));
    }

    #[test]
    fn test_outputs_up_to_date_no_outputs() {
        let dir = tempdir().unwrap();
        assert!(!outputs_up_to_date(&resolved("true", &[], &[]), Some(dir.path())));
    }

    #[test]
    fn test_outputs_up_to_date_missing_output() {
        let dir = tempdir().unwrap();
        let process = resolved("true", &["out.txt"], &[]);
        assert!(!outputs_up_to_date(&process, Some(dir.path())));
    }

    #[test]
    fn test_outputs_up_to_date_without_dependencies() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("out.txt"), "x").unwrap();
        let process = resolved("true", &["out.txt"], &[]);
        assert!(outputs_up_to_date(&process, Some(dir.path())));
    }

    #[test]
    fn test_outputs_outdated_when_input_newer() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("out.txt"), "output").unwrap();
        thread::sleep(Duration::from_millis(50));
        fs::write(dir.path().join("in.txt"), "input").unwrap();

        // Force a clearly newer mtime on coarse-grained filesystems
        let later = SystemTime::now() + Duration::from_secs(5);
        fs::File::options()
            .write(true)
            .open(dir.path().join("in.txt"))
            .unwrap()
            .set_modified(later)
            .unwrap();

        let process = resolved("true", &["out.txt"], &["in.txt"]);
        assert!(!outputs_up_to_date(&process, Some(dir.path())));
    }

    #[test]
    fn test_outputs_fresh_when_output_newer() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("in.txt"), "input").unwrap();
        fs::write(dir.path().join("out.txt"), "output").unwrap();

        let process = resolved("true", &["out.txt"], &["in.txt"]);
        assert!(outputs_up_to_date(&process, Some(dir.path())));
    }

    #[test]
    fn test_execute_creates_output_and_directories() {
        let dir = tempdir().unwrap();
        let process = resolved("echo hello > nested/out.txt", &["nested/out.txt"], &[]);

        let outcome = execute_process(&process, &context(dir.path()), &CancelToken::new()).unwrap();
        assert_eq!(outcome, StepOutcome::Executed);
        let content = fs::read_to_string(dir.path().join("nested/out.txt")).unwrap();
        assert_eq!(content.trim(), "hello");
    }

    #[test]
    fn test_execute_skips_up_to_date() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("out.txt"), "existing").unwrap();
        let process = resolved("echo overwritten > out.txt", &["out.txt"], &[]);

        let outcome = execute_process(&process, &context(dir.path()), &CancelToken::new()).unwrap();
        assert_eq!(outcome, StepOutcome::Skipped);
        assert_eq!(
            fs::read_to_string(dir.path().join("out.txt")).unwrap(),
            "existing"
        );
    }

    #[test]
    fn test_execute_non_zero_exit_discards_partial_output() {
        let dir = tempdir().unwrap();
        let process = resolved(
            "echo partial > out.txt; echo boom >&2; exit 3",
            &["out.txt"],
            &[],
        );

        let err = execute_process(&process, &context(dir.path()), &CancelToken::new()).unwrap_err();
        match &err {
            ExecutionError::NonZeroExit { code, stderr } => {
                assert_eq!(*code, 3);
                assert!(stderr.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.command_invoked());
        assert!(!dir.path().join("out.txt").exists());
    }

    #[test]
    fn test_execute_missing_output() {
        let dir = tempdir().unwrap();
        let process = resolved("true", &["never.txt"], &[]);

        let err = execute_process(&process, &context(dir.path()), &CancelToken::new()).unwrap_err();
        assert!(matches!(err, ExecutionError::MissingOutput { .. }));
    }

    #[test]
    fn test_execute_spawn_failure() {
        let dir = tempdir().unwrap();
        let ctx = ExecContext {
            shell: "/nonexistent/shell".to_string(),
            working_dir: Some(dir.path().to_path_buf()),
        };
        let err = execute_process(&resolved("true", &[], &[]), &ctx, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Spawn { .. }));
        assert!(!err.command_invoked());
    }

    #[test]
    fn test_execute_cancellation_kills_child() {
        let dir = tempdir().unwrap();
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            trigger.cancel();
        });

        let started = Instant::now();
        let err = execute_process(
            &resolved("sleep 10", &[], &[]),
            &context(dir.path()),
            &cancel,
        )
        .unwrap_err();
        canceller.join().unwrap();

        assert!(matches!(err, ExecutionError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_locate_relative_and_absolute() {
        let base = Path::new("/data");
        assert_eq!(locate(Path::new("a.txt"), Some(base)), PathBuf::from("/data/a.txt"));
        assert_eq!(locate(Path::new("/tmp/a.txt"), Some(base)), PathBuf::from("/tmp/a.txt"));
        assert_eq!(locate(Path::new("a.txt"), None), PathBuf::from("a.txt"));
        assert_eq!(
            locate(Path::new("./out/a.txt"), Some(base)),
            locate(Path::new("out//a.txt"), Some(base))
        );
    }

    #[test]
    fn test_tail_keeps_last_lines() {
        let text = "1\n2\n3\n4\n";
        assert_eq!(tail(text, 2), "3\n4");
        assert_eq!(tail("", 2), "");
    }
}
