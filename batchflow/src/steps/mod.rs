//! Step contract and built-in steps.
//!
//! Steps are the units of work in a batchflow pipeline. Every step is one of
//! two capability variants, selected by [`StepLogic`]:
//!
//! - [`TransformStep`]: called once per input batch, yields any number of
//!   output batches.
//! - [`GeneratorStep`]: a source with no input, invoked once, yielding
//!   `(batch, last)` pairs until `last` is true.

mod builtin;
pub mod task;

pub use builtin::{FnGenerator, FnTransform, KeepFields, LoadRecords};

use crate::core::{Batch, ParamValue, RuntimeParameter, StepKind};
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Lazy, finite sequence of batches produced by a transform call.
pub type BatchStream<'a> = BoxStream<'a, anyhow::Result<Batch>>;

/// Lazy sequence of batches produced by a generator, each tagged with the
/// end-of-stream marker.
pub type GeneratorStream<'a> = BoxStream<'a, anyhow::Result<(Batch, bool)>>;

/// Per-run view a step gets of its own configuration.
#[derive(Debug, Clone, Default)]
pub struct StepContext {
    step_name: String,
    run_id: String,
    parameters: HashMap<String, ParamValue>,
}

impl StepContext {
    /// Creates a context with no parameters.
    #[must_use]
    pub fn new(step_name: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            run_id: run_id.into(),
            parameters: HashMap::new(),
        }
    }

    /// Adds a parameter slot.
    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, value: ParamValue) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    /// Returns the step name.
    #[must_use]
    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    /// Returns the run id.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Returns the bound value of a parameter, `None` if unset or undeclared.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&serde_json::Value> {
        self.parameters.get(name).and_then(ParamValue::as_value)
    }

    /// Returns the bound value of a parameter.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameter is unset or was never declared.
    pub fn require_param(&self, name: &str) -> anyhow::Result<&serde_json::Value> {
        self.param(name).ok_or_else(|| {
            anyhow::anyhow!(
                "runtime parameter '{}' of step '{}' is not bound",
                name,
                self.step_name
            )
        })
    }
}

/// A step that transforms input batches into output batches.
pub trait TransformStep: Send + Sync + Debug {
    /// Fields every input record must carry.
    fn input_fields(&self) -> Vec<String> {
        Vec::new()
    }

    /// Fields this step adds to or sets on its output records.
    fn output_fields(&self) -> Vec<String> {
        Vec::new()
    }

    /// Parameters bound at run time.
    fn runtime_parameters(&self) -> Vec<RuntimeParameter> {
        Vec::new()
    }

    /// Processes one input batch.
    ///
    /// The batch is owned by the call; the returned stream may split, merge
    /// or filter it.
    fn process<'a>(&'a self, input: Batch, ctx: &'a StepContext) -> BatchStream<'a>;
}

/// A source step with no inputs.
pub trait GeneratorStep: Send + Sync + Debug {
    /// Fields carried by generated records.
    fn output_fields(&self) -> Vec<String> {
        Vec::new()
    }

    /// Parameters bound at run time.
    fn runtime_parameters(&self) -> Vec<RuntimeParameter> {
        Vec::new()
    }

    /// Produces the step's batches. The stream ends at the first element
    /// whose marker is `true`.
    fn produce<'a>(&'a self, ctx: &'a StepContext) -> GeneratorStream<'a>;
}

/// The processing logic of a step, dispatched by capability.
#[derive(Debug, Clone)]
pub enum StepLogic {
    /// A transform step.
    Transform(Arc<dyn TransformStep>),
    /// A generator step.
    Generator(Arc<dyn GeneratorStep>),
}

impl StepLogic {
    /// Wraps a transform step.
    pub fn transform(step: impl TransformStep + 'static) -> Self {
        Self::Transform(Arc::new(step))
    }

    /// Wraps a generator step.
    pub fn generator(step: impl GeneratorStep + 'static) -> Self {
        Self::Generator(Arc::new(step))
    }

    /// Returns the capability variant.
    #[must_use]
    pub fn kind(&self) -> StepKind {
        match self {
            Self::Transform(_) => StepKind::Transform,
            Self::Generator(_) => StepKind::Generator,
        }
    }

    /// Returns the declared required input fields.
    #[must_use]
    pub fn input_fields(&self) -> Vec<String> {
        match self {
            Self::Transform(step) => step.input_fields(),
            Self::Generator(_) => Vec::new(),
        }
    }

    /// Returns the declared output fields.
    #[must_use]
    pub fn output_fields(&self) -> Vec<String> {
        match self {
            Self::Transform(step) => step.output_fields(),
            Self::Generator(step) => step.output_fields(),
        }
    }

    /// Returns the declared runtime parameters.
    #[must_use]
    pub fn runtime_parameters(&self) -> Vec<RuntimeParameter> {
        match self {
            Self::Transform(step) => step.runtime_parameters(),
            Self::Generator(step) => step.runtime_parameters(),
        }
    }
}
