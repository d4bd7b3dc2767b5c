//! Error types for the batchflow framework.
//!
//! Declaration-time errors (graph and wiring) carry an [`ErrorInfo`] with a
//! stable code and a fix hint. Run-time errors identify the step that raised
//! them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for batchflow operations.
#[derive(Debug, Error)]
pub enum BatchflowError {
    /// A step with the same name already exists.
    #[error("{0}")]
    DuplicateStep(#[from] DuplicateStepError),

    /// A step name does not match the allowed pattern.
    #[error("{0}")]
    InvalidStepName(#[from] InvalidStepName),

    /// An edge references a step that does not exist.
    #[error("{0}")]
    UnknownStep(#[from] UnknownStepError),

    /// An edge would introduce a cycle.
    #[error("{0}")]
    Cycle(#[from] CycleError),

    /// The edge already exists.
    #[error("{0}")]
    DuplicateEdge(#[from] DuplicateEdgeError),

    /// An edge targets a generator step.
    #[error("{0}")]
    GeneratorInput(#[from] GeneratorInputError),

    /// The producers of an edge do not supply the consumer's required fields.
    #[error("{0}")]
    MissingFields(#[from] MissingFieldsError),

    /// Runtime parameters were left unbound.
    #[error("{0}")]
    UnboundParameter(#[from] UnboundParameterError),

    /// A runtime parameter binding does not match any declared parameter.
    #[error("{0}")]
    UnknownParameter(#[from] UnknownParameterError),

    /// Predecessor batches could not be merged positionally.
    #[error("{0}")]
    BatchAlignment(#[from] BatchAlignmentError),

    /// A step's processing logic failed.
    #[error("{0}")]
    StepProcessing(#[from] StepProcessingError),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BatchflowError {
    /// Returns the diagnostic info for declaration-time errors.
    #[must_use]
    pub fn info(&self) -> Option<ErrorInfo> {
        match self {
            Self::DuplicateStep(e) => Some(e.info()),
            Self::InvalidStepName(e) => Some(e.info()),
            Self::UnknownStep(e) => Some(e.info()),
            Self::Cycle(e) => Some(e.info()),
            Self::DuplicateEdge(e) => Some(e.info()),
            Self::GeneratorInput(e) => Some(e.info()),
            Self::MissingFields(e) => Some(e.info()),
            Self::UnboundParameter(e) => Some(e.info()),
            Self::UnknownParameter(e) => Some(e.info()),
            Self::BatchAlignment(_) | Self::StepProcessing(_) | Self::Internal(_) => None,
        }
    }

    /// Returns the name of the step the error is attributed to, if any.
    #[must_use]
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::BatchAlignment(e) => Some(&e.step),
            Self::StepProcessing(e) => Some(&e.step),
            Self::DuplicateStep(e) => Some(&e.name),
            Self::GeneratorInput(e) => Some(&e.to),
            Self::MissingFields(e) => Some(&e.consumer),
            _ => None,
        }
    }
}

/// Metadata about a declaration error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Error code (e.g., "GRAPH-004-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ErrorInfo {
    /// Creates a new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Converts to a JSON object.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("code".to_string(), serde_json::json!(self.code));
        map.insert("summary".to_string(), serde_json::json!(self.summary));
        if let Some(ref hint) = self.fix_hint {
            map.insert("fix_hint".to_string(), serde_json::json!(hint));
        }
        if !self.context.is_empty() {
            map.insert("context".to_string(), serde_json::json!(self.context));
        }
        serde_json::Value::Object(map)
    }
}

/// Error raised when adding a step whose name is taken.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Step with name '{name}' already exists in the pipeline")]
pub struct DuplicateStepError {
    /// The duplicated name.
    pub name: String,
}

impl DuplicateStepError {
    /// Creates a new duplicate step error.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Returns diagnostic info.
    #[must_use]
    pub fn info(&self) -> ErrorInfo {
        ErrorInfo::new("GRAPH-001-DUPLICATE", format!("Step '{}' is declared twice", self.name))
            .with_fix_hint("Give every step a unique name.")
    }
}

/// Error raised when a step name is empty or contains forbidden characters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid step name '{name}': only letters, digits, '_' and '-' are allowed")]
pub struct InvalidStepName {
    /// The rejected name.
    pub name: String,
}

impl InvalidStepName {
    /// Creates a new invalid name error.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Returns diagnostic info.
    #[must_use]
    pub fn info(&self) -> ErrorInfo {
        ErrorInfo::new("GRAPH-002-NAME", format!("Step name '{}' is not valid", self.name))
            .with_fix_hint("Use a non-empty name made of letters, digits, '_' or '-'.")
    }
}

/// Error raised when an edge references a step that was never added.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Step with name '{name}' does not exist in the pipeline")]
pub struct UnknownStepError {
    /// The missing step name.
    pub name: String,
}

impl UnknownStepError {
    /// Creates a new unknown step error.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Returns diagnostic info.
    #[must_use]
    pub fn info(&self) -> ErrorInfo {
        ErrorInfo::new("GRAPH-003-UNKNOWN", format!("Step '{}' not found", self.name))
            .with_fix_hint("Add the step before connecting it. Check for typos in step names.")
    }
}

/// Error raised when an edge would create a cycle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Edge from '{from}' to '{to}' would create a cycle: {}", .cycle_path.join(" -> "))]
pub struct CycleError {
    /// The producer of the rejected edge.
    pub from: String,
    /// The consumer of the rejected edge.
    pub to: String,
    /// The cycle the edge would close, starting and ending at `from`.
    pub cycle_path: Vec<String>,
}

impl CycleError {
    /// Creates a new cycle error.
    #[must_use]
    pub fn new(from: impl Into<String>, to: impl Into<String>, cycle_path: Vec<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            cycle_path,
        }
    }

    /// Returns diagnostic info.
    #[must_use]
    pub fn info(&self) -> ErrorInfo {
        ErrorInfo::new(
            "GRAPH-004-CYCLE",
            format!("Pipeline would contain a cycle: {}", self.cycle_path.join(" -> ")),
        )
        .with_fix_hint("Remove one of the edges in the cycle to break it.")
        .with_context_entry("from", self.from.clone())
        .with_context_entry("to", self.to.clone())
    }
}

/// Error raised when an edge is added twice.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Edge from '{from}' to '{to}' already exists")]
pub struct DuplicateEdgeError {
    /// The producer.
    pub from: String,
    /// The consumer.
    pub to: String,
}

impl DuplicateEdgeError {
    /// Creates a new duplicate edge error.
    #[must_use]
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Returns diagnostic info.
    #[must_use]
    pub fn info(&self) -> ErrorInfo {
        ErrorInfo::new("GRAPH-005-EDGE", format!("Edge {} -> {} is declared twice", self.from, self.to))
    }
}

/// Error raised when an edge points into a generator step.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Step '{to}' is a generator and cannot receive input from '{from}'")]
pub struct GeneratorInputError {
    /// The producer.
    pub from: String,
    /// The generator step.
    pub to: String,
}

impl GeneratorInputError {
    /// Creates a new generator input error.
    #[must_use]
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Returns diagnostic info.
    #[must_use]
    pub fn info(&self) -> ErrorInfo {
        ErrorInfo::new("WIRING-001-GENERATOR", format!("Generator '{}' has no inputs", self.to))
            .with_fix_hint("Generators are sources. Connect them as producers only.")
    }
}

/// Error raised when producers do not supply a consumer's required fields.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Step '{consumer}' requires fields {missing:?} which are not produced by {producers:?}")]
pub struct MissingFieldsError {
    /// The consumer step.
    pub consumer: String,
    /// The producers checked.
    pub producers: Vec<String>,
    /// Required fields not supplied, sorted.
    pub missing: Vec<String>,
}

impl MissingFieldsError {
    /// Creates a new missing fields error.
    #[must_use]
    pub fn new(consumer: impl Into<String>, producers: Vec<String>, missing: Vec<String>) -> Self {
        Self {
            consumer: consumer.into(),
            producers,
            missing,
        }
    }

    /// Returns diagnostic info.
    #[must_use]
    pub fn info(&self) -> ErrorInfo {
        ErrorInfo::new(
            "WIRING-002-FIELDS",
            format!("Step '{}' is missing inputs: {}", self.consumer, self.missing.join(", ")),
        )
        .with_fix_hint(
            "Connect a producer that declares these output fields, or wire all predecessors at once with add_edges.",
        )
    }
}

/// Error raised when required runtime parameters are not bound before a run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unbound runtime parameters: {}", format_pairs(.missing))]
pub struct UnboundParameterError {
    /// `(step, parameter)` pairs left unbound, sorted.
    pub missing: Vec<(String, String)>,
}

impl UnboundParameterError {
    /// Creates a new unbound parameter error.
    #[must_use]
    pub fn new(mut missing: Vec<(String, String)>) -> Self {
        missing.sort();
        Self { missing }
    }

    /// Returns diagnostic info.
    #[must_use]
    pub fn info(&self) -> ErrorInfo {
        ErrorInfo::new("RUN-001-UNBOUND", self.to_string())
            .with_fix_hint("Bind every required runtime parameter when calling run.")
    }
}

/// Error raised when a binding names a step or parameter that is not declared.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown runtime parameters: {}", format_pairs(.unknown))]
pub struct UnknownParameterError {
    /// `(step, parameter)` pairs that match nothing, sorted.
    pub unknown: Vec<(String, String)>,
}

impl UnknownParameterError {
    /// Creates a new unknown parameter error.
    #[must_use]
    pub fn new(mut unknown: Vec<(String, String)>) -> Self {
        unknown.sort();
        Self { unknown }
    }

    /// Returns diagnostic info.
    #[must_use]
    pub fn info(&self) -> ErrorInfo {
        ErrorInfo::new("RUN-002-UNKNOWN_PARAM", self.to_string())
            .with_fix_hint("Check the step name and the parameter names the step declares.")
    }
}

fn format_pairs(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(step, param)| format!("{step}.{param}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// The batch seen on one inbound edge when a positional merge failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeBatch {
    /// The producer of the edge.
    pub from: String,
    /// Batch length, or `None` if the edge had already ended.
    pub len: Option<usize>,
}

/// Error raised when predecessor batches cannot be merged by position.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Cannot merge inputs of step '{step}': {}", describe_edges(.edges))]
pub struct BatchAlignmentError {
    /// The consumer step.
    pub step: String,
    /// What each inbound edge delivered, in edge registration order.
    pub edges: Vec<EdgeBatch>,
}

impl BatchAlignmentError {
    /// Creates a new alignment error.
    #[must_use]
    pub fn new(step: impl Into<String>, edges: Vec<EdgeBatch>) -> Self {
        Self {
            step: step.into(),
            edges,
        }
    }
}

fn describe_edges(edges: &[EdgeBatch]) -> String {
    edges
        .iter()
        .map(|e| match e.len {
            Some(len) => format!("{} sent {} records", e.from, len),
            None => format!("{} ended", e.from),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Error raised when a step's processing logic fails.
#[derive(Debug, Error)]
#[error("Step '{step}' failed: {source}")]
pub struct StepProcessingError {
    /// The failing step.
    pub step: String,
    /// The original cause.
    #[source]
    pub source: anyhow::Error,
}

impl StepProcessingError {
    /// Creates a new step processing error.
    #[must_use]
    pub fn new(step: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            step: step.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_info_creation() {
        let info = ErrorInfo::new("TEST-001", "Test error")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("step", "my_step");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.summary, "Test error");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
        assert_eq!(info.context.get("step"), Some(&"my_step".to_string()));
        assert_eq!(info.to_json()["code"], "TEST-001");
    }

    #[test]
    fn test_cycle_error_message() {
        let err = CycleError::new(
            "y",
            "x",
            vec!["y".to_string(), "x".to_string(), "y".to_string()],
        );

        assert!(err.to_string().contains("y -> x -> y"));
        assert_eq!(err.info().code, "GRAPH-004-CYCLE");
    }

    #[test]
    fn test_unbound_parameter_sorted() {
        let err = UnboundParameterError::new(vec![
            ("b".to_string(), "temperature".to_string()),
            ("a".to_string(), "model".to_string()),
        ]);

        assert_eq!(err.missing[0].0, "a");
        assert_eq!(err.to_string(), "Unbound runtime parameters: a.model, b.temperature");
    }

    #[test]
    fn test_alignment_error_message() {
        let err = BatchAlignmentError::new(
            "d",
            vec![
                EdgeBatch { from: "b".to_string(), len: Some(2) },
                EdgeBatch { from: "c".to_string(), len: None },
            ],
        );

        assert_eq!(err.to_string(), "Cannot merge inputs of step 'd': b sent 2 records, c ended");
    }

    #[test]
    fn test_batchflow_error_step_attribution() {
        let err: BatchflowError =
            StepProcessingError::new("b", anyhow::anyhow!("boom")).into();
        assert_eq!(err.step(), Some("b"));
        assert!(err.info().is_none());

        let err: BatchflowError = UnknownStepError::new("ghost").into();
        assert_eq!(err.info().unwrap().code, "GRAPH-003-UNKNOWN");
    }
}
