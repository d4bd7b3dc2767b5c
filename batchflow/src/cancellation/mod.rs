//! Cooperative cancellation for pipeline runs.
//!
//! A run owns one [`CancellationToken`]. It is cancelled when a step fails or
//! when the caller requests a stop; workers observe it at their suspension
//! points.

mod token;

pub use token::{CancelCallback, CancellationToken};
