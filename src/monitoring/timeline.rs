//! Execution Timeline
//!
//! Records when each process was dispatched and how it finished, for the
//! run report and the ASCII Gantt chart.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// What happened to a process at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Handed to a worker
    Started,
    /// Command ran and produced its outputs
    Succeeded,
    /// Outputs were already up to date
    Skipped,
    /// Command or resolution failed
    Failed,
    /// Never started because an upstream failed or the run stopped
    Aborted,
}

impl EventType {
    fn ends_process(self) -> bool {
        !matches!(self, EventType::Started)
    }

    /// Bar fill character used in the Gantt chart.
    fn glyph(self) -> char {
        match self {
            EventType::Failed => 'x',
            EventType::Skipped => '-',
            _ => '#',
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub process: String,
    pub event_type: EventType,
    pub timestamp: Instant,
}

/// Span of one process relative to the run start, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Span {
    start: u128,
    end: Option<u128>,
    outcome: Option<EventType>,
}

/// Ordered log of process events for one run.
#[derive(Debug, Clone)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    start_time: Instant,
}

impl ExecutionTimeline {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            start_time: Instant::now(),
        }
    }

    pub fn record(&mut self, process: &str, event_type: EventType) {
        self.events.push(TimelineEvent {
            process: process.to_string(),
            event_type,
            timestamp: Instant::now(),
        });
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    fn offset(&self, at: Instant) -> u128 {
        at.duration_since(self.start_time).as_millis()
    }

    /// Builds per-process spans, in order of first appearance.
    fn spans(&self) -> Vec<(String, Span)> {
        let mut order: Vec<String> = Vec::new();
        let mut spans: HashMap<String, Span> = HashMap::new();

        for event in &self.events {
            let at = self.offset(event.timestamp);
            if !spans.contains_key(&event.process) {
                order.push(event.process.clone());
            }
            let span = spans.entry(event.process.clone()).or_insert(Span {
                start: at,
                end: None,
                outcome: None,
            });
            if event.event_type == EventType::Started {
                span.start = at;
            } else if event.event_type.ends_process() {
                span.end = Some(at);
                span.outcome = Some(event.event_type);
            }
        }

        order
            .into_iter()
            .filter_map(|name| spans.remove(&name).map(|span| (name, span)))
            .collect()
    }

    /// Durations of processes that started and finished, in milliseconds.
    pub fn durations(&self) -> HashMap<String, u128> {
        let mut started: HashMap<&str, u128> = HashMap::new();
        let mut durations = HashMap::new();

        for event in &self.events {
            let at = self.offset(event.timestamp);
            match event.event_type {
                EventType::Started => {
                    started.insert(&event.process, at);
                }
                EventType::Aborted => {}
                _ => {
                    if let Some(start) = started.get(event.process.as_str()) {
                        durations.insert(event.process.clone(), at - start);
                    }
                }
            }
        }

        durations
    }

    /// Renders an ASCII Gantt chart, one row per dispatched process.
    ///
    /// Aborted processes never ran and get no bar.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let total = self.offset(Instant::now());
        if total == 0 {
            return output;
        }
        let scale = 50.0 / total as f64;

        for (name, span) in self.spans() {
            let (Some(end), Some(outcome)) = (span.end, span.outcome) else {
                continue;
            };
            if outcome == EventType::Aborted {
                continue;
            }
            let start_pos = (span.start as f64 * scale) as usize;
            let width = ((end.saturating_sub(span.start)) as f64 * scale).max(1.0) as usize;

            let mut bar = " ".repeat(start_pos);
            bar.extend(std::iter::repeat(outcome.glyph()).take(width));

            output.push_str(&format!(
                "{} |{:<50}| ({} ms)\n",
                truncate(&name, 16),
                bar,
                end.saturating_sub(span.start)
            ));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total));
        output
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Pads or truncates a name to exactly `width` characters.
fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        format!("{:width$}", s, width = width)
    } else {
        let head: String = s.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
