//! Mock steps for testing.

use super::fixtures::numbered_batch;
use crate::core::{Batch, Record};
use crate::steps::{
    BatchStream, GeneratorStep, GeneratorStream, StepContext, StepLogic, TransformStep,
};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A pass-through transform that records every batch it receives.
#[derive(Debug, Default)]
pub struct RecordingStep {
    inputs: Vec<String>,
    batches: Mutex<Vec<Batch>>,
}

impl RecordingStep {
    /// Creates a new recording step.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a recording step declaring required input fields.
    #[must_use]
    pub fn requiring(fields: impl IntoIterator<Item = impl Into<String>>) -> Arc<Self> {
        Arc::new(Self {
            inputs: fields.into_iter().map(Into::into).collect(),
            batches: Mutex::new(Vec::new()),
        })
    }

    /// Returns step logic sharing this recorder.
    #[must_use]
    pub fn logic(self: &Arc<Self>) -> StepLogic {
        StepLogic::Transform(self.clone())
    }

    /// Returns all recorded batches.
    #[must_use]
    pub fn batches(&self) -> Vec<Batch> {
        self.batches.lock().clone()
    }

    /// Returns all recorded records, flattened.
    #[must_use]
    pub fn records(&self) -> Vec<Record> {
        self.batches.lock().iter().flatten().cloned().collect()
    }

    /// Returns the number of batches received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.batches.lock().len()
    }
}

impl TransformStep for RecordingStep {
    fn input_fields(&self) -> Vec<String> {
        self.inputs.clone()
    }

    fn process<'a>(&'a self, input: Batch, _ctx: &'a StepContext) -> BatchStream<'a> {
        self.batches.lock().push(input.clone());
        stream::once(async move { Ok(input) }).boxed()
    }
}

/// A transform that passes batches through until a given call, then fails.
#[derive(Debug)]
pub struct FailingStep {
    message: String,
    succeed_first: usize,
    calls: AtomicUsize,
}

impl FailingStep {
    /// Creates a step failing on its first call.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            succeed_first: 0,
            calls: AtomicUsize::new(0),
        }
    }

    /// Lets the first `calls` batches through before failing.
    #[must_use]
    pub fn after(mut self, calls: usize) -> Self {
        self.succeed_first = calls;
        self
    }

    /// Returns the number of calls so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TransformStep for FailingStep {
    fn process<'a>(&'a self, input: Batch, _ctx: &'a StepContext) -> BatchStream<'a> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let result = if call < self.succeed_first {
            Ok(input)
        } else {
            Err(anyhow::anyhow!("{}", self.message))
        };
        stream::once(async move { result }).boxed()
    }
}

/// A transform setting one field on every record.
#[derive(Debug, Clone)]
pub struct AddField {
    field: String,
    value: serde_json::Value,
    inputs: Vec<String>,
    delay: Duration,
}

impl AddField {
    /// Creates a step setting `field` to `value`.
    #[must_use]
    pub fn new(field: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            field: field.into(),
            value,
            inputs: Vec::new(),
            delay: Duration::ZERO,
        }
    }

    /// Declares required input fields.
    #[must_use]
    pub fn requiring(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.inputs = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Sleeps before handling each batch.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl TransformStep for AddField {
    fn input_fields(&self) -> Vec<String> {
        self.inputs.clone()
    }

    fn output_fields(&self) -> Vec<String> {
        vec![self.field.clone()]
    }

    fn process<'a>(&'a self, input: Batch, _ctx: &'a StepContext) -> BatchStream<'a> {
        stream::once(async move {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let output = input
                .into_iter()
                .map(|mut record| {
                    record.insert(self.field.clone(), self.value.clone());
                    record
                })
                .collect();
            Ok(output)
        })
        .boxed()
    }
}

/// A generator emitting batches of numbered records `{"id": n}`.
#[derive(Debug)]
pub struct CountingGenerator {
    batches: Option<usize>,
    batch_size: usize,
    delay: Duration,
    produced: AtomicUsize,
}

impl CountingGenerator {
    /// Emits `batches` batches of `batch_size` records, marking the last.
    /// Zero batches yields a single empty final batch.
    #[must_use]
    pub fn new(batches: usize, batch_size: usize) -> Self {
        Self {
            batches: Some(batches),
            batch_size,
            delay: Duration::ZERO,
            produced: AtomicUsize::new(0),
        }
    }

    /// Emits batches until the run is stopped.
    #[must_use]
    pub fn endless(batch_size: usize) -> Self {
        Self {
            batches: None,
            ..Self::new(0, batch_size)
        }
    }

    /// Sleeps before each batch.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Returns the number of batches emitted so far.
    #[must_use]
    pub fn produced(&self) -> usize {
        self.produced.load(Ordering::SeqCst)
    }
}

impl GeneratorStep for CountingGenerator {
    fn output_fields(&self) -> Vec<String> {
        vec!["id".to_string()]
    }

    fn produce<'a>(&'a self, _ctx: &'a StepContext) -> GeneratorStream<'a> {
        if self.batches == Some(0) {
            return stream::once(async { Ok((Vec::new(), true)) }).boxed();
        }
        stream::unfold(0usize, move |index| async move {
            if self.batches.is_some_and(|total| index >= total) {
                return None;
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.produced.fetch_add(1, Ordering::SeqCst);
            let batch = numbered_batch(index * self.batch_size, self.batch_size);
            let last = self.batches.is_some_and(|total| index + 1 == total);
            Some((Ok((batch, last)), index + 1))
        })
        .boxed()
    }
}
