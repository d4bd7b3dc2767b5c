//! Testing utilities for batchflow pipelines.
//!
//! This module provides:
//! - Mock steps that record, fail or generate numbered records
//! - Record and batch fixtures
//! - Assertions for run results

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_cancelled, assert_completed, assert_failed_at, assert_step_status};
pub use fixtures::{numbered_batch, numbered_records, record};
pub use mocks::{AddField, CountingGenerator, FailingStep, RecordingStep};
