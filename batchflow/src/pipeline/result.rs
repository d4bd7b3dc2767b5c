//! Outcomes of a pipeline run.

use crate::core::{Batch, Record, RunStatus, StepStatus};
use crate::errors::BatchflowError;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

/// Data produced by a completed run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Identifier of the run.
    pub run_id: String,
    /// Name of the pipeline.
    pub pipeline: String,
    /// When the first worker was launched.
    pub started_at: DateTime<Utc>,
    /// When the last worker finished.
    pub finished_at: DateTime<Utc>,
    /// Batches emitted by each sink step, in emission order.
    pub outputs: HashMap<String, Vec<Batch>>,
    /// Final status of every step.
    pub step_status: BTreeMap<String, StepStatus>,
}

impl PipelineOutput {
    /// Returns the batches emitted by a sink step.
    #[must_use]
    pub fn sink(&self, name: &str) -> Option<&[Batch]> {
        self.outputs.get(name).map(Vec::as_slice)
    }

    /// Returns the records emitted by a sink step, flattened across batches.
    #[must_use]
    pub fn records(&self, name: &str) -> Vec<Record> {
        self.outputs
            .get(name)
            .map(|batches| batches.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the elapsed wall time in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// The first failure of a run.
#[derive(Debug)]
pub struct PipelineFailure {
    /// The step that failed first.
    pub step: String,
    /// What went wrong.
    pub error: BatchflowError,
    /// Identifier of the run.
    pub run_id: String,
    /// Final status of every step.
    pub step_status: BTreeMap<String, StepStatus>,
}

/// The result of running a pipeline.
#[derive(Debug)]
pub enum PipelineResult {
    /// Every step completed.
    Completed(PipelineOutput),
    /// A step failed; the rest of the run was cancelled.
    Failed(PipelineFailure),
    /// The run was stopped by the caller.
    Cancelled {
        /// Identifier of the run.
        run_id: String,
        /// The reason given for the stop.
        reason: String,
    },
}

impl PipelineResult {
    /// Returns true if the run completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Returns true if a step failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Returns the run status.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        match self {
            Self::Completed(_) => RunStatus::Completed,
            Self::Failed(_) => RunStatus::Failed,
            Self::Cancelled { .. } => RunStatus::Cancelled,
        }
    }

    /// Returns the run output if the run completed.
    #[must_use]
    pub fn output(&self) -> Option<&PipelineOutput> {
        match self {
            Self::Completed(output) => Some(output),
            _ => None,
        }
    }

    /// Returns the failure if a step failed.
    #[must_use]
    pub fn failure(&self) -> Option<&PipelineFailure> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    /// Consumes the result, returning the output if the run completed.
    #[must_use]
    pub fn into_output(self) -> Option<PipelineOutput> {
        match self {
            Self::Completed(output) => Some(output),
            _ => None,
        }
    }

    /// Returns the run id.
    #[must_use]
    pub fn run_id(&self) -> &str {
        match self {
            Self::Completed(output) => &output.run_id,
            Self::Failed(failure) => &failure.run_id,
            Self::Cancelled { run_id, .. } => run_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn output() -> PipelineOutput {
        let now = Utc::now();
        let mut outputs = HashMap::new();
        outputs.insert(
            "sink".to_string(),
            vec![
                vec![json!({"n": 1}).as_object().cloned().unwrap()],
                vec![json!({"n": 2}).as_object().cloned().unwrap()],
            ],
        );
        PipelineOutput {
            run_id: "run-1".into(),
            pipeline: "p".into(),
            started_at: now,
            finished_at: now,
            outputs,
            step_status: BTreeMap::new(),
        }
    }

    #[test]
    fn test_output_accessors() {
        let out = output();
        assert_eq!(out.sink("sink").map(<[Batch]>::len), Some(2));
        assert_eq!(out.records("sink").len(), 2);
        assert!(out.sink("missing").is_none());
        assert!(out.records("missing").is_empty());
        assert_eq!(out.duration_ms(), 0);
    }

    #[test]
    fn test_result_status() {
        let completed = PipelineResult::Completed(output());
        assert!(completed.is_completed());
        assert_eq!(completed.status(), RunStatus::Completed);
        assert_eq!(completed.run_id(), "run-1");

        let failed = PipelineResult::Failed(PipelineFailure {
            step: "b".into(),
            error: BatchflowError::Internal("boom".into()),
            run_id: "run-2".into(),
            step_status: BTreeMap::new(),
        });
        assert!(failed.is_failed());
        assert_eq!(failed.failure().map(|f| f.step.as_str()), Some("b"));
        assert!(failed.output().is_none());

        let cancelled = PipelineResult::Cancelled {
            run_id: "run-3".into(),
            reason: "stop".into(),
        };
        assert_eq!(cancelled.status(), RunStatus::Cancelled);
        assert!(cancelled.into_output().is_none());
    }
}
