//! Resource Usage Monitoring
//!
//! Samples CPU and memory of the pipeline process and every command it has
//! spawned, so the run report reflects the external tools too.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sysinfo::{get_current_pid, Pid, ProcessRefreshKind, System};

/// A single resource usage sample over the whole process tree.
#[derive(Debug, Clone)]
pub struct ResourceSample {
    pub timestamp: Instant,
    /// Summed CPU usage percentage (can exceed 100 on multiple cores)
    pub cpu_usage: f32,
    /// Summed resident memory in megabytes
    pub memory_mb: u64,
    /// Number of live processes in the tree
    pub processes: usize,
}

/// Aggregate figures reported at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub samples: usize,
    pub average_cpu: f32,
    pub peak_memory_mb: u64,
    pub peak_processes: usize,
}

/// Monitors the current process and its descendants.
///
/// # Example
///
/// ```rust,ignore
/// use kleuren_pipeline::monitoring::ResourceMonitor;
///
/// if let Some(mut monitor) = ResourceMonitor::new() {
///     monitor.sample();
///     std::thread::sleep(std::time::Duration::from_millis(300));
///     monitor.sample();
///     println!("{}", monitor.summary());
/// }
/// ```
pub struct ResourceMonitor {
    system: System,
    root: Pid,
    samples: Vec<ResourceSample>,
    warmup_done: bool,
    last_sample: Option<Instant>,
    min_interval: Duration,
}

impl ResourceMonitor {
    /// Creates a monitor rooted at the current process.
    ///
    /// Returns `None` on platforms where the current PID is unavailable.
    pub fn new() -> Option<Self> {
        let root = get_current_pid().ok()?;
        Some(Self {
            system: System::new(),
            root,
            samples: Vec::new(),
            warmup_done: false,
            last_sample: None,
            min_interval: Duration::from_millis(250),
        })
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Takes a sample.
    ///
    /// The first call only primes CPU counters. Later calls are rate-limited
    /// by `min_interval`.
    pub fn sample(&mut self) {
        let now = Instant::now();
        let refresh_kind = ProcessRefreshKind::new().with_cpu().with_memory();

        if !self.warmup_done {
            self.system.refresh_processes_specifics(refresh_kind);
            self.warmup_done = true;
            self.last_sample = Some(now);
            return;
        }

        if let Some(last) = self.last_sample {
            if now.duration_since(last) < self.min_interval {
                return;
            }
        }

        self.system.refresh_processes_specifics(refresh_kind);
        self.last_sample = Some(now);

        let tree = self.process_tree();
        if tree.is_empty() {
            return;
        }

        let mut cpu = 0.0;
        let mut memory = 0;
        for pid in &tree {
            if let Some(process) = self.system.process(*pid) {
                cpu += process.cpu_usage();
                memory += process.memory();
            }
        }

        self.samples.push(ResourceSample {
            timestamp: now,
            cpu_usage: cpu,
            memory_mb: memory / (1024 * 1024),
            processes: tree.len(),
        });
    }

    /// Collects the root PID and all of its live descendants.
    fn process_tree(&self) -> HashSet<Pid> {
        let mut tree = HashSet::new();
        if self.system.process(self.root).is_none() {
            return tree;
        }
        tree.insert(self.root);

        // Parent links only point upwards, so iterate until no new child appears
        loop {
            let before = tree.len();
            for (pid, process) in self.system.processes() {
                if let Some(parent) = process.parent() {
                    if tree.contains(&parent) {
                        tree.insert(*pid);
                    }
                }
            }
            if tree.len() == before {
                break;
            }
        }
        tree
    }

    pub fn samples(&self) -> &[ResourceSample] {
        &self.samples
    }

    pub fn peak_memory_mb(&self) -> u64 {
        self.samples.iter().map(|s| s.memory_mb).max().unwrap_or(0)
    }

    pub fn average_cpu(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.cpu_usage).sum::<f32>() / self.samples.len() as f32
    }

    /// Returns aggregate figures, or `None` if nothing was sampled.
    pub fn usage(&self) -> Option<ResourceUsage> {
        if self.samples.is_empty() {
            return None;
        }
        Some(ResourceUsage {
            samples: self.samples.len(),
            average_cpu: self.average_cpu(),
            peak_memory_mb: self.peak_memory_mb(),
            peak_processes: self.samples.iter().map(|s| s.processes).max().unwrap_or(0),
        })
    }

    /// Returns a human-readable summary of resource usage.
    pub fn summary(&self) -> String {
        match self.usage() {
            Some(usage) => usage.to_string(),
            None => "No resource data collected".to_string(),
        }
    }
}

impl std::fmt::Display for ResourceUsage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Resource Usage:\n  Average CPU: {:.1}%\n  Peak Memory: {} MB\n  Peak Processes: {}\n  Samples: {}",
            self.average_cpu, self.peak_memory_mb, self.peak_processes, self.samples
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use std::thread;

    fn monitor() -> ResourceMonitor {
        ResourceMonitor::new().unwrap()
    }

    #[test]
    fn test_first_sample_is_warmup() {
        let mut monitor = monitor();
        monitor.sample();
        assert!(monitor.samples().is_empty());
        assert!(monitor.usage().is_none());
    }

    #[test]
    fn test_sampling_after_interval() {
        let mut monitor = monitor().with_min_interval(Duration::from_millis(100));
        monitor.sample();

        // Within the interval: ignored
        monitor.sample();
        assert!(monitor.samples().is_empty());

        thread::sleep(Duration::from_millis(150));
        monitor.sample();
        assert_eq!(monitor.samples().len(), 1);
        assert!(monitor.samples()[0].processes >= 1);
    }

    #[test]
    fn test_tree_includes_children() {
        let mut child = Command::new("sleep").arg("2").spawn().unwrap();
        let mut monitor = monitor().with_min_interval(Duration::from_millis(50));
        monitor.sample();
        thread::sleep(Duration::from_millis(100));
        monitor.sample();
        child.kill().unwrap();
        child.wait().unwrap();

        assert!(monitor.samples()[0].processes >= 2);
    }

    #[test]
    fn test_usage_and_summary() {
        let mut monitor = monitor().with_min_interval(Duration::from_millis(50));
        monitor.sample();
        thread::sleep(Duration::from_millis(100));
        monitor.sample();

        let usage = monitor.usage().unwrap();
        assert_eq!(usage.samples, 1);
        assert!(usage.average_cpu >= 0.0);

        let summary = monitor.summary();
        assert!(summary.contains("Average CPU"));
        assert!(summary.contains("Peak Memory"));
    }

    #[test]
    fn test_summary_empty() {
        let monitor = monitor();
        assert_eq!(monitor.summary(), "No resource data collected");
        assert_eq!(monitor.peak_memory_mb(), 0);
        assert_eq!(monitor.average_cpu(), 0.0);
    }
}
