//! Resource Monitoring Module
//!
//! Tracks process tree resource usage and the execution timeline of a run.
//!
//! # Components
//!
//! - [`ResourceMonitor`]: CPU and memory usage of the pipeline and its commands
//! - [`ExecutionTimeline`]: Process start/finish timing for Gantt charts

pub mod resource;
pub mod timeline;

pub use resource::{ResourceMonitor, ResourceSample, ResourceUsage};
pub use timeline::{EventType, ExecutionTimeline, TimelineEvent};
