//! Run configuration for pipelines.

use crate::events::{EventSink, NoOpEventSink};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

fn default_channel_capacity() -> usize {
    1
}

fn default_collect_sink_outputs() -> bool {
    true
}

fn default_event_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpEventSink)
}

/// Settings applied to every run of a pipeline.
#[derive(Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Batches buffered per edge before the producer blocks.
    #[serde(default = "default_channel_capacity")]
    channel_capacity: usize,
    /// Whether batches emitted by sink steps are kept in the run output.
    /// Retention is unbounded for the length of a run.
    #[serde(default = "default_collect_sink_outputs")]
    collect_sink_outputs: bool,
    /// Receiver of lifecycle events.
    #[serde(skip, default = "default_event_sink")]
    event_sink: Arc<dyn EventSink>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            collect_sink_outputs: default_collect_sink_outputs(),
            event_sink: default_event_sink(),
        }
    }
}

impl std::fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("channel_capacity", &self.channel_capacity)
            .field("collect_sink_outputs", &self.collect_sink_outputs)
            .finish_non_exhaustive()
    }
}

impl PipelineConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration from JSON. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if `json` is malformed.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Sets the per-edge channel capacity. Zero is raised to one.
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Sets whether sink outputs are collected.
    ///
    /// Collected batches are held in memory until the run ends, so a
    /// pipeline fed by a generator that never marks its last batch should
    /// turn collection off and consume results in its sink steps instead.
    #[must_use]
    pub fn with_collect_sink_outputs(mut self, collect: bool) -> Self {
        self.collect_sink_outputs = collect;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Returns the per-edge channel capacity, at least one.
    #[must_use]
    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity.max(1)
    }

    /// Returns whether sink outputs are collected.
    #[must_use]
    pub fn collect_sink_outputs(&self) -> bool {
        self.collect_sink_outputs
    }

    /// Returns the event sink.
    #[must_use]
    pub fn event_sink(&self) -> &Arc<dyn EventSink> {
        &self.event_sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.channel_capacity(), 1);
        assert!(config.collect_sink_outputs());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let config = PipelineConfig::new().with_channel_capacity(0);
        assert_eq!(config.channel_capacity(), 1);
    }

    #[test]
    fn test_from_json_partial() {
        let config = PipelineConfig::from_json(r#"{"channel_capacity": 8}"#).unwrap();
        assert_eq!(config.channel_capacity(), 8);
        assert!(config.collect_sink_outputs());

        let config = PipelineConfig::from_json(r#"{"collect_sink_outputs": false}"#).unwrap();
        assert_eq!(config.channel_capacity(), 1);
        assert!(!config.collect_sink_outputs());
    }

    #[test]
    fn test_from_json_rejects_bad_types() {
        assert!(PipelineConfig::from_json(r#"{"channel_capacity": "many"}"#).is_err());
    }

    #[test]
    fn test_serializes_without_sink() {
        let json = serde_json::to_value(PipelineConfig::new().with_channel_capacity(4)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"channel_capacity": 4, "collect_sink_outputs": true})
        );
    }
}
