//! Core domain model types for batchflow.
//!
//! This module contains the fundamental types used throughout the framework:
//! - Records and batches
//! - Step and run status enums
//! - Runtime parameters bound at run time

mod params;
mod record;
mod status;

pub use params::{ParamValue, RuntimeParameter, RuntimeParameters};
pub use record::{merge_records, Batch, Record};
pub use status::{RunStatus, StepKind, StepStatus};
