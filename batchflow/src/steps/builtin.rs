//! Built-in step implementations.

use super::{BatchStream, GeneratorStep, GeneratorStream, StepContext, TransformStep};
use crate::core::{Batch, Record, RuntimeParameter};
use futures::stream::{self, StreamExt};
use std::fmt::Debug;

/// A closure-based transform step.
///
/// The closure receives one input batch and returns the output batches.
pub struct FnTransform<F>
where
    F: Fn(Batch, &StepContext) -> anyhow::Result<Vec<Batch>> + Send + Sync,
{
    func: F,
    inputs: Vec<String>,
    outputs: Vec<String>,
    parameters: Vec<RuntimeParameter>,
}

impl<F> FnTransform<F>
where
    F: Fn(Batch, &StepContext) -> anyhow::Result<Vec<Batch>> + Send + Sync,
{
    /// Creates a new closure-based transform.
    pub fn new(func: F) -> Self {
        Self {
            func,
            inputs: Vec::new(),
            outputs: Vec::new(),
            parameters: Vec::new(),
        }
    }

    /// Sets the required input fields.
    #[must_use]
    pub fn with_inputs(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.inputs = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the produced output fields.
    #[must_use]
    pub fn with_outputs(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.outputs = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Declares a runtime parameter.
    #[must_use]
    pub fn with_parameter(mut self, parameter: RuntimeParameter) -> Self {
        self.parameters.push(parameter);
        self
    }
}

impl<F> Debug for FnTransform<F>
where
    F: Fn(Batch, &StepContext) -> anyhow::Result<Vec<Batch>> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTransform")
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

impl<F> TransformStep for FnTransform<F>
where
    F: Fn(Batch, &StepContext) -> anyhow::Result<Vec<Batch>> + Send + Sync,
{
    fn input_fields(&self) -> Vec<String> {
        self.inputs.clone()
    }

    fn output_fields(&self) -> Vec<String> {
        self.outputs.clone()
    }

    fn runtime_parameters(&self) -> Vec<RuntimeParameter> {
        self.parameters.clone()
    }

    fn process<'a>(&'a self, input: Batch, ctx: &'a StepContext) -> BatchStream<'a> {
        match (self.func)(input, ctx) {
            Ok(batches) => stream::iter(batches.into_iter().map(Ok)).boxed(),
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        }
    }
}

/// A closure-based generator step.
///
/// The closure returns every batch up front; the last one is marked as the
/// end of the stream. An empty result produces a single empty final batch.
pub struct FnGenerator<F>
where
    F: Fn(&StepContext) -> anyhow::Result<Vec<Batch>> + Send + Sync,
{
    func: F,
    outputs: Vec<String>,
    parameters: Vec<RuntimeParameter>,
}

impl<F> FnGenerator<F>
where
    F: Fn(&StepContext) -> anyhow::Result<Vec<Batch>> + Send + Sync,
{
    /// Creates a new closure-based generator.
    pub fn new(func: F) -> Self {
        Self {
            func,
            outputs: Vec::new(),
            parameters: Vec::new(),
        }
    }

    /// Sets the produced output fields.
    #[must_use]
    pub fn with_outputs(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.outputs = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Declares a runtime parameter.
    #[must_use]
    pub fn with_parameter(mut self, parameter: RuntimeParameter) -> Self {
        self.parameters.push(parameter);
        self
    }
}

impl<F> Debug for FnGenerator<F>
where
    F: Fn(&StepContext) -> anyhow::Result<Vec<Batch>> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnGenerator")
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

impl<F> GeneratorStep for FnGenerator<F>
where
    F: Fn(&StepContext) -> anyhow::Result<Vec<Batch>> + Send + Sync,
{
    fn output_fields(&self) -> Vec<String> {
        self.outputs.clone()
    }

    fn runtime_parameters(&self) -> Vec<RuntimeParameter> {
        self.parameters.clone()
    }

    fn produce<'a>(&'a self, ctx: &'a StepContext) -> GeneratorStream<'a> {
        match (self.func)(ctx) {
            Ok(batches) => stream::iter(mark_last(batches).into_iter().map(Ok)).boxed(),
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        }
    }
}

fn mark_last(batches: Vec<Batch>) -> Vec<(Batch, bool)> {
    if batches.is_empty() {
        return vec![(Vec::new(), true)];
    }
    let last = batches.len() - 1;
    batches
        .into_iter()
        .enumerate()
        .map(|(i, batch)| (batch, i == last))
        .collect()
}

/// Generator that emits an in-memory list of records in fixed-size batches.
///
/// The batch size can be overridden at run time with the optional
/// `batch_size` parameter.
#[derive(Debug, Clone)]
pub struct LoadRecords {
    records: Vec<Record>,
    batch_size: usize,
    outputs: Vec<String>,
}

impl LoadRecords {
    /// Name of the runtime parameter overriding the batch size.
    pub const BATCH_SIZE_PARAM: &'static str = "batch_size";

    /// Creates a loader. A batch size of zero is treated as one.
    #[must_use]
    pub fn new(records: Vec<Record>, batch_size: usize) -> Self {
        let mut outputs: Vec<String> = Vec::new();
        for record in &records {
            for key in record.keys() {
                if !outputs.contains(key) {
                    outputs.push(key.clone());
                }
            }
        }

        Self {
            records,
            batch_size: batch_size.max(1),
            outputs,
        }
    }

    fn effective_batch_size(&self, ctx: &StepContext) -> anyhow::Result<usize> {
        match ctx.param(Self::BATCH_SIZE_PARAM) {
            None => Ok(self.batch_size),
            Some(value) => value
                .as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .filter(|n| *n > 0)
                .ok_or_else(|| anyhow::anyhow!("batch_size must be a positive integer, got {value}")),
        }
    }
}

impl GeneratorStep for LoadRecords {
    fn output_fields(&self) -> Vec<String> {
        self.outputs.clone()
    }

    fn runtime_parameters(&self) -> Vec<RuntimeParameter> {
        vec![RuntimeParameter::new(Self::BATCH_SIZE_PARAM)
            .optional()
            .with_description("Number of records per emitted batch.")]
    }

    fn produce<'a>(&'a self, ctx: &'a StepContext) -> GeneratorStream<'a> {
        let batch_size = match self.effective_batch_size(ctx) {
            Ok(size) => size,
            Err(e) => return stream::once(async move { Err(e) }).boxed(),
        };
        let batches: Vec<Batch> = self
            .records
            .chunks(batch_size)
            .map(<[Record]>::to_vec)
            .collect();
        stream::iter(mark_last(batches).into_iter().map(Ok)).boxed()
    }
}

/// Transform that keeps only the named fields, in the given order.
#[derive(Debug, Clone)]
pub struct KeepFields {
    fields: Vec<String>,
}

impl KeepFields {
    /// Creates a new field filter.
    #[must_use]
    pub fn new(fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl TransformStep for KeepFields {
    fn input_fields(&self) -> Vec<String> {
        self.fields.clone()
    }

    fn output_fields(&self) -> Vec<String> {
        self.fields.clone()
    }

    fn process<'a>(&'a self, input: Batch, _ctx: &'a StepContext) -> BatchStream<'a> {
        let output: Batch = input
            .into_iter()
            .map(|mut record| {
                let mut kept = Record::new();
                for field in &self.fields {
                    if let Some(value) = record.remove(field) {
                        kept.insert(field.clone(), value);
                    }
                }
                kept
            })
            .collect();
        stream::once(async move { Ok(output) }).boxed()
    }
}
