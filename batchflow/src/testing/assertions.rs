//! Assertions for pipeline results.

use crate::core::StepStatus;
use crate::pipeline::{PipelineFailure, PipelineOutput, PipelineResult};

/// Asserts that the run completed and returns its output.
///
/// # Panics
///
/// Panics if the run failed or was cancelled.
#[track_caller]
pub fn assert_completed(result: &PipelineResult) -> &PipelineOutput {
    match result {
        PipelineResult::Completed(output) => output,
        PipelineResult::Failed(failure) => panic!(
            "Expected completed run, step '{}' failed: {}",
            failure.step, failure.error
        ),
        PipelineResult::Cancelled { reason, .. } => {
            panic!("Expected completed run, got cancelled: {reason}")
        }
    }
}

/// Asserts that the run failed at `step` and returns the failure.
///
/// # Panics
///
/// Panics if the run did not fail, or failed at another step.
#[track_caller]
pub fn assert_failed_at<'r>(result: &'r PipelineResult, step: &str) -> &'r PipelineFailure {
    let Some(failure) = result.failure() else {
        panic!("Expected run to fail at '{step}', got status {}", result.status());
    };
    assert_eq!(
        failure.step, step,
        "Expected failure at '{}', got '{}': {}",
        step, failure.step, failure.error
    );
    assert_eq!(failure.step_status.get(step), Some(&StepStatus::Failed));
    failure
}

/// Asserts that the run was cancelled and returns the reason.
///
/// # Panics
///
/// Panics if the run completed or failed.
#[track_caller]
pub fn assert_cancelled(result: &PipelineResult) -> &str {
    match result {
        PipelineResult::Cancelled { reason, .. } => reason,
        other => panic!("Expected cancelled run, got status {}", other.status()),
    }
}

/// Asserts the final status of a step in a completed run.
///
/// # Panics
///
/// Panics if the step is unknown or has another status.
#[track_caller]
pub fn assert_step_status(output: &PipelineOutput, step: &str, expected: StepStatus) {
    assert_eq!(
        output.step_status.get(step),
        Some(&expected),
        "Unexpected status for step '{step}'"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "Expected completed run")]
    fn test_assert_completed_panics_on_cancel() {
        let result = PipelineResult::Cancelled {
            run_id: "r".into(),
            reason: "stop".into(),
        };
        let _ = assert_completed(&result);
    }

    #[test]
    fn test_assert_cancelled_returns_reason() {
        let result = PipelineResult::Cancelled {
            run_id: "r".into(),
            reason: "stop".into(),
        };
        assert_eq!(assert_cancelled(&result), "stop");
    }
}
