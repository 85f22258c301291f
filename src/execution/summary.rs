//! Run Summary
//!
//! Per-process outcomes of a finished run, with a text rendering for the
//! terminal and a JSON form for reports.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use colored::{ColoredString, Colorize};
use serde::{Deserialize, Serialize};

use crate::monitoring::ResourceUsage;
use crate::workflow::planner::{ProcessState, ResolvedOutput};

/// Final outcome of one process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessOutcome {
    pub name: String,
    pub state: ProcessState,
    /// Command line actually invoked; absent when it never ran
    pub command: Option<String>,
    pub outputs: Vec<ResolvedOutput>,
    pub failure: Option<String>,
    pub duration_secs: Option<f64>,
}

impl ProcessOutcome {
    pub fn duration(&self) -> Option<Duration> {
        self.duration_secs.map(Duration::from_secs_f64)
    }
}

/// Everything known about a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub workflow: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    /// True only if every process Succeeded or was Skipped
    pub success: bool,
    pub processes: Vec<ProcessOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceUsage>,
    /// Rendered Gantt chart of the run
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timeline: String,
}

impl RunSummary {
    pub fn elapsed(&self) -> Duration {
        Duration::from_secs_f64(self.elapsed_secs)
    }

    /// Finds the outcome of a process by name.
    pub fn process(&self, name: &str) -> Option<&ProcessOutcome> {
        self.processes.iter().find(|p| p.name == name)
    }

    pub fn state_of(&self, name: &str) -> Option<ProcessState> {
        self.process(name).map(|p| p.state)
    }

    pub fn count(&self, state: ProcessState) -> usize {
        self.processes.iter().filter(|p| p.state == state).count()
    }

    /// Processes that ended Failed or Aborted.
    pub fn failures(&self) -> impl Iterator<Item = &ProcessOutcome> {
        self.processes
            .iter()
            .filter(|p| matches!(p.state, ProcessState::Failed | ProcessState::Aborted))
    }

    /// Renders a per-process table followed by totals.
    pub fn render(&self) -> String {
        let width = self
            .processes
            .iter()
            .map(|p| p.name.len())
            .max()
            .unwrap_or(0)
            .max(7);

        let mut out = format!("Workflow '{}'\n\n", self.workflow);
        out.push_str(&format!("{:<width$}  {:<10}  {:>9}  DETAIL\n", "PROCESS", "STATE", "TIME"));

        for process in &self.processes {
            let time = process
                .duration_secs
                .map(|s| format!("{:.2}s", s))
                .unwrap_or_else(|| "-".to_string());
            let detail = match (&process.failure, &process.command) {
                (Some(failure), _) => first_line(failure).to_string(),
                (None, Some(command)) => command.clone(),
                (None, None) => String::new(),
            };
            out.push_str(&format!(
                "{:<width$}  {}  {:>9}  {}\n",
                process.name,
                state_label(process.state),
                time,
                detail
            ));
        }

        out.push_str(&format!(
            "\n{} succeeded, {} skipped, {} failed, {} aborted in {:.2?}\n",
            self.count(ProcessState::Succeeded),
            self.count(ProcessState::Skipped),
            self.count(ProcessState::Failed),
            self.count(ProcessState::Aborted),
            self.elapsed()
        ));
        out.push_str(if self.success {
            "Result: SUCCESS\n"
        } else {
            "Result: FAILED\n"
        });
        out
    }

    /// Writes the summary as pretty JSON.
    pub fn save_json(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
    }

    /// Reads a summary written by [`save_json`](Self::save_json).
    pub fn load_json(path: impl AsRef<Path>) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

fn state_label(state: ProcessState) -> ColoredString {
    let label = format!("{:<10}", state.to_string());
    match state {
        ProcessState::Succeeded => label.green(),
        ProcessState::Skipped => label.cyan(),
        ProcessState::Failed => label.red().bold(),
        ProcessState::Aborted => label.yellow(),
        _ => label.normal(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn outcome(name: &str, state: ProcessState) -> ProcessOutcome {
        ProcessOutcome {
            name: name.to_string(),
            state,
            command: None,
            outputs: Vec::new(),
            failure: None,
            duration_secs: None,
        }
    }

    fn sample() -> RunSummary {
        let mut count = outcome("count_g1", ProcessState::Failed);
        count.command = Some("jellyfish count -m 9 g1.fasta".to_string());
        count.failure = Some("command exited with status 1: boom\nmore".to_string());
        count.duration_secs = Some(0.5);

        let mut dump = outcome("dump_g1", ProcessState::Aborted);
        dump.failure = Some("upstream process 'count_g1' failed".to_string());

        let mut other = outcome("count_g2", ProcessState::Succeeded);
        other.command = Some("jellyfish count -m 9 g2.fasta".to_string());
        other.outputs.push(ResolvedOutput {
            port: "jfDB".to_string(),
            path: PathBuf::from("g2.fasta.9.jf"),
        });

        RunSummary {
            workflow: "kleuren".to_string(),
            started_at: Utc::now(),
            elapsed_secs: 1.25,
            success: false,
            processes: vec![count, dump, other],
            resources: None,
            timeline: String::new(),
        }
    }

    #[test]
    fn test_counts_and_failures() {
        let summary = sample();
        assert_eq!(summary.count(ProcessState::Failed), 1);
        assert_eq!(summary.count(ProcessState::Aborted), 1);
        assert_eq!(summary.count(ProcessState::Skipped), 0);

        let failed: Vec<&str> = summary.failures().map(|p| p.name.as_str()).collect();
        assert_eq!(failed, vec!["count_g1", "dump_g1"]);
        assert_eq!(summary.state_of("count_g2"), Some(ProcessState::Succeeded));
        assert_eq!(summary.state_of("missing"), None);
    }

    #[test]
    fn test_render() {
        let rendered = sample().render();
        assert!(rendered.contains("count_g1"));
        assert!(rendered.contains("failed"));
        assert!(rendered.contains("upstream process 'count_g1' failed"));
        assert!(rendered.contains("jellyfish count -m 9 g2.fasta"));
        assert!(!rendered.contains("more"));
        assert!(rendered.contains("Result: FAILED"));
    }

    #[test]
    fn test_save_and_load_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.json");
        let summary = sample();
        summary.save_json(&path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"state\": \"aborted\""));
        assert!(!raw.contains("resources"));

        let loaded = RunSummary::load_json(&path).unwrap();
        assert_eq!(loaded.processes, summary.processes);
        assert!(!loaded.success);
    }

    #[test]
    fn test_duration_conversion() {
        let summary = sample();
        assert_eq!(
            summary.process("count_g1").unwrap().duration(),
            Some(Duration::from_millis(500))
        );
        assert_eq!(summary.elapsed(), Duration::from_millis(1250));
    }
}
