//! # Batchflow
//!
//! A streaming DAG executor for batched record-processing pipelines.
//!
//! Batchflow runs a directed acyclic graph of steps over streams of record
//! batches:
//!
//! - **Incremental validation**: steps and edges are checked as they are
//!   declared, so a cycle or an unsatisfied field requirement is rejected at
//!   the edge that introduces it
//! - **Streaming execution**: every step is a tokio task, connected to its
//!   neighbours by bounded per-edge channels
//! - **Positional merge**: a step with several predecessors sees record `i`
//!   of each incoming batch combined into one record
//! - **Failure propagation**: the first failing step cancels the run
//! - **Event-driven observability**: lifecycle events and `tracing` spans
//!
//! ## Quick Start
//!
//! ```rust
//! use batchflow::prelude::*;
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), BatchflowError> {
//! let records: Vec<Record> = vec![
//!     json!({"text": "hello"}).as_object().cloned().unwrap_or_default(),
//!     json!({"text": "world"}).as_object().cloned().unwrap_or_default(),
//! ];
//!
//! let mut pipeline = Pipeline::new("shout");
//! pipeline.add_step("load", StepLogic::generator(LoadRecords::new(records, 16)))?;
//! pipeline.add_step(
//!     "upper",
//!     StepLogic::transform(
//!         FnTransform::new(|batch: Batch, _ctx: &StepContext| {
//!             let upper = batch
//!                 .into_iter()
//!                 .map(|mut record| {
//!                     let text = record["text"].as_str().unwrap_or_default().to_uppercase();
//!                     record.insert("upper".into(), text.into());
//!                     record
//!                 })
//!                 .collect();
//!             Ok(vec![upper])
//!         })
//!         .with_inputs(["text"])
//!         .with_outputs(["upper"]),
//!     ),
//! )?;
//! pipeline.add_edge("load", "upper")?;
//!
//! let result = pipeline.run(Vec::new(), RuntimeParameters::new()).await?;
//! let output = result.output().map(|o| o.records("upper")).unwrap_or_default();
//! assert_eq!(output[1]["upper"], json!("WORLD"));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod steps;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::core::{
        merge_records, Batch, ParamValue, Record, RunStatus, RuntimeParameter,
        RuntimeParameters, StepKind, StepStatus,
    };
    pub use crate::errors::{
        BatchAlignmentError, BatchflowError, CycleError, ErrorInfo, MissingFieldsError,
        StepProcessingError, UnboundParameterError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::{init_logging, LogFormat};
    pub use crate::pipeline::{
        Levels, Pipeline, PipelineConfig, PipelineFailure, PipelineOutput, PipelineResult,
        StepGraph, StepNode,
    };
    pub use crate::steps::task::{ChatMessage, Llm, Task, TaskStep, TextGeneration};
    pub use crate::steps::{
        BatchStream, FnGenerator, FnTransform, GeneratorStep, GeneratorStream, KeepFields,
        LoadRecords, StepContext, StepLogic, TransformStep,
    };
}
