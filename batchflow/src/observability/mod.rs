//! Observability setup.
//!
//! The crate logs through `tracing`; applications call [`init_logging`] once
//! to print those logs. Lifecycle events for programmatic consumers live in
//! [`crate::events`].

mod logging;

pub use logging::{init_logging, LogFormat, DEFAULT_FILTER};
