//! Event sink trait and implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

/// Receives run and step lifecycle events from the engine.
///
/// The engine calls [`EventSink::emit`] from the coordinator and
/// [`EventSink::try_emit`] from step workers, which must never block on a
/// slow sink.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event.
    async fn emit(&self, event_type: &str, data: Option<Value>);

    /// Emits an event without awaiting. Must never fail.
    fn try_emit(&self, event_type: &str, data: Option<Value>);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: Option<Value>) {}

    fn try_emit(&self, _event_type: &str, _data: Option<Value>) {}
}

/// Writes events to `tracing`, at warn level for failures and info otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventSink;

impl LoggingEventSink {
    /// Creates a logging sink.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn log(event_type: &str, data: Option<&Value>) {
        let step = data
            .and_then(|d| d.get("step"))
            .and_then(Value::as_str)
            .unwrap_or("-");
        let payload = data.map(Value::to_string).unwrap_or_default();
        if event_type.ends_with(".failed") {
            warn!(event = event_type, step, %payload, "pipeline event");
        } else {
            info!(event = event_type, step, %payload, "pipeline event");
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        Self::log(event_type, data.as_ref());
    }

    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        Self::log(event_type, data.as_ref());
    }
}

/// An event kept by [`CollectingEventSink`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedEvent {
    /// Dotted event name, such as `step.completed`.
    pub event_type: String,
    /// JSON payload, if any.
    pub data: Option<Value>,
    /// When the sink received the event.
    pub received_at: DateTime<Utc>,
}

impl RecordedEvent {
    /// Returns the step named by the payload, if any.
    pub fn step(&self) -> Option<&str> {
        self.data.as_ref()?.get("step")?.as_str()
    }
}

/// Keeps every event in memory, in arrival order.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the received events.
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// Returns the received event types in arrival order.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|event| event.event_type.clone())
            .collect()
    }

    /// Returns the payloads of `event_type` events about `step`.
    #[must_use]
    pub fn events_for_step(&self, event_type: &str, step: &str) -> Vec<Value> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.event_type == event_type && event.step() == Some(step))
            .filter_map(|event| event.data.clone())
            .collect()
    }

    /// Returns the number of received events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Returns true if nothing was received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Forgets all received events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.try_emit(event_type, data);
    }

    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.events.lock().push(RecordedEvent {
            event_type: event_type.to_string(),
            data,
            received_at: Utc::now(),
        });
    }
}
