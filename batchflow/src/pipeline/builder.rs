//! Pipeline declaration with validation.

use super::engine::Engine;
use super::{Levels, PipelineConfig, PipelineResult, StepGraph, StepNode};
use crate::cancellation::CancellationToken;
use crate::core::{Batch, RuntimeParameters};
use crate::errors::{
    BatchflowError, DuplicateEdgeError, GeneratorInputError, MissingFieldsError,
    UnknownStepError,
};
use crate::steps::StepLogic;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// A named DAG of steps.
///
/// Steps and edges are validated as they are added; a rejected declaration
/// leaves the pipeline unchanged.
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// The pipeline name.
    name: String,
    /// Run settings.
    config: PipelineConfig,
    /// The step topology.
    graph: StepGraph,
    /// Step nodes by name.
    steps: HashMap<String, StepNode>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: PipelineConfig::default(),
            graph: StepGraph::new(),
            steps: HashMap::new(),
        }
    }

    /// Replaces the run settings.
    #[must_use]
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds a step, consuming and returning the pipeline.
    ///
    /// # Errors
    ///
    /// Fails like [`Pipeline::add_step`].
    pub fn with_step(mut self, name: &str, logic: StepLogic) -> Result<Self, BatchflowError> {
        self.add_step(name, logic)?;
        Ok(self)
    }

    /// Adds an edge, consuming and returning the pipeline.
    ///
    /// # Errors
    ///
    /// Fails like [`Pipeline::add_edge`].
    pub fn with_edge(mut self, from: &str, to: &str) -> Result<Self, BatchflowError> {
        self.add_edge(from, to)?;
        Ok(self)
    }

    /// Registers a step.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStepName` or `DuplicateStepError`.
    pub fn add_step(&mut self, name: &str, logic: StepLogic) -> Result<(), BatchflowError> {
        self.graph.add_step(name)?;
        let node = StepNode::new(name, logic);
        debug!(pipeline = %self.name, step = %name, kind = %node.kind(), "Step added");
        self.steps.insert(name.to_string(), node);
        Ok(())
    }

    /// Connects `from` to `to`.
    ///
    /// The fields `to` requires must be supplied by `from` together with the
    /// predecessors `to` already has.
    ///
    /// # Errors
    ///
    /// Returns `UnknownStepError`, `GeneratorInputError`, `CycleError`,
    /// `DuplicateEdgeError` or `MissingFieldsError`.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<(), BatchflowError> {
        self.add_edges(&[from], to)
    }

    /// Connects every step in `froms` to `to` at once.
    ///
    /// Required fields are checked against all producers together, so a
    /// consumer can take fields from several branches. Either every edge is
    /// added or none is.
    ///
    /// # Errors
    ///
    /// Fails like [`Pipeline::add_edge`] for any of the edges.
    pub fn add_edges(&mut self, froms: &[&str], to: &str) -> Result<(), BatchflowError> {
        for name in froms.iter().copied().chain(std::iter::once(to)) {
            if !self.graph.contains(name) {
                return Err(UnknownStepError::new(name).into());
            }
        }
        if let Some(consumer) = self.steps.get(to).filter(|node| node.is_generator()) {
            let from = froms.first().copied().unwrap_or_default();
            return Err(GeneratorInputError::new(from, consumer.name()).into());
        }

        let mut seen = HashSet::new();
        for from in froms {
            if !seen.insert(*from) {
                return Err(DuplicateEdgeError::new(*from, to).into());
            }
            self.graph.check_edge(from, to)?;
        }

        self.check_fields(froms, to)?;

        for from in froms {
            self.graph.add_edge(from, to)?;
            debug!(pipeline = %self.name, from = %from, to = %to, "Edge added");
        }
        Ok(())
    }

    /// Verifies `to`'s required fields are supplied by its current
    /// predecessors plus `froms`.
    fn check_fields(&self, froms: &[&str], to: &str) -> Result<(), BatchflowError> {
        let Some(consumer) = self.steps.get(to) else {
            return Ok(());
        };
        if consumer.input_fields().is_empty() {
            return Ok(());
        }

        let producers: Vec<String> = self
            .graph
            .predecessors(to)
            .iter()
            .cloned()
            .chain(froms.iter().map(|s| (*s).to_string()))
            .collect();
        let mut supplied = BTreeSet::new();
        for producer in &producers {
            supplied.extend(self.available_fields(producer)?);
        }

        let missing: Vec<String> = consumer
            .input_fields()
            .difference(&supplied)
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(MissingFieldsError::new(to, producers, missing).into())
        }
    }

    /// Returns the fields records carry when they leave `name`.
    ///
    /// These are the fields the step and all its ancestors declare: outputs
    /// of generators, inputs and outputs of transforms.
    ///
    /// # Errors
    ///
    /// Returns `UnknownStepError` if the step does not exist.
    pub fn available_fields(&self, name: &str) -> Result<BTreeSet<String>, UnknownStepError> {
        let mut fields = BTreeSet::new();
        let ancestors = self.graph.ancestors(name)?;
        for step in ancestors.iter().map(String::as_str).chain(std::iter::once(name)) {
            let Some(node) = self.steps.get(step) else {
                continue;
            };
            fields.extend(node.output_fields().iter().cloned());
            if !node.is_generator() {
                fields.extend(node.input_fields().iter().cloned());
            }
        }
        Ok(fields)
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the run settings.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Returns the step topology.
    #[must_use]
    pub fn graph(&self) -> &StepGraph {
        &self.graph
    }

    /// Returns a step by name.
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&StepNode> {
        self.steps.get(name)
    }

    /// Returns the steps in registration order.
    pub fn steps(&self) -> impl Iterator<Item = &StepNode> {
        self.graph
            .step_names()
            .iter()
            .filter_map(|name| self.steps.get(name))
    }

    /// Returns the number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.len()
    }

    /// Returns true if the pipeline has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    /// Computes the execution levels.
    #[must_use]
    pub fn levels(&self) -> Levels {
        Levels::compute(&self.graph)
    }

    /// Returns a stable digest of the declaration.
    ///
    /// Covers the name, each step's name, kind, fields and parameter names
    /// in registration order, and every edge in registration order.
    #[must_use]
    pub fn signature(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("pipeline:{}\n", self.name).as_bytes());
        for node in self.steps() {
            let inputs: Vec<&str> = node.input_fields().iter().map(String::as_str).collect();
            let params: Vec<&str> = node
                .runtime_parameters()
                .iter()
                .map(|p| p.name.as_str())
                .collect();
            hasher.update(
                format!(
                    "step:{}:{}:{}:{}:{}\n",
                    node.name(),
                    node.kind(),
                    inputs.join(","),
                    node.output_fields().join(","),
                    params.join(",")
                )
                .as_bytes(),
            );
        }
        for (from, to) in self.graph.edges() {
            hasher.update(format!("edge:{from}->{to}\n").as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    pub(crate) fn engine(&self) -> Engine<'_> {
        Engine {
            name: &self.name,
            graph: &self.graph,
            steps: &self.steps,
            config: &self.config,
        }
    }

    /// Runs the pipeline.
    ///
    /// `inputs` is fed to every transform step without predecessors.
    ///
    /// # Errors
    ///
    /// Returns `UnboundParameterError` or `UnknownParameterError` before any
    /// step runs. Failures during the run are reported in the result.
    pub async fn run(
        &self,
        inputs: Vec<Batch>,
        params: RuntimeParameters,
    ) -> Result<PipelineResult, BatchflowError> {
        self.engine().run(inputs, params, None).await
    }

    /// Runs the pipeline, stopping early if `token` is cancelled.
    ///
    /// # Errors
    ///
    /// Fails like [`Pipeline::run`].
    pub async fn run_with_cancellation(
        &self,
        inputs: Vec<Batch>,
        params: RuntimeParameters,
        token: Arc<CancellationToken>,
    ) -> Result<PipelineResult, BatchflowError> {
        self.engine().run(inputs, params, Some(token)).await
    }
}
