//! Pipeline declaration and execution.
//!
//! This module provides:
//! - The step graph with incremental cycle rejection
//! - Level computation for tiered worker launch
//! - Per-edge channel routing with positional merge
//! - The streaming execution engine

mod builder;
mod config;
mod engine;
mod graph;
mod levels;
mod node;
mod result;
pub mod router;


pub use builder::Pipeline;
pub use config::PipelineConfig;
pub use graph::{is_valid_step_name, StepGraph};
pub use levels::Levels;
pub use node::StepNode;
pub use result::{PipelineFailure, PipelineOutput, PipelineResult};
