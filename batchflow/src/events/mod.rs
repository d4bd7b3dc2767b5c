//! Event sinks for pipeline observability.
//!
//! The engine reports run and step lifecycle transitions to an
//! [`EventSink`]. Event types are dotted names (`step.started`); payloads are
//! JSON objects.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, RecordedEvent};

/// A pipeline run started.
pub const PIPELINE_STARTED: &str = "pipeline.started";
/// Every step completed.
pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
/// A step failed and the run stopped.
pub const PIPELINE_FAILED: &str = "pipeline.failed";
/// The run was stopped from outside.
pub const PIPELINE_CANCELLED: &str = "pipeline.cancelled";
/// A step worker started.
pub const STEP_STARTED: &str = "step.started";
/// A step worker completed.
pub const STEP_COMPLETED: &str = "step.completed";
/// A step worker failed.
pub const STEP_FAILED: &str = "step.failed";
/// A step worker stopped because of cancellation.
pub const STEP_CANCELLED: &str = "step.cancelled";
