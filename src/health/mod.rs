//! Health probe subsystem.
//!
//! # Data Flow
//! ```text
//! Probe request (HTTP layer)
//!     → handler.rs (evaluate test, dispatch to callback)
//!     → outcome.rs (normalize bool / Result / panic)
//!     → healthy(ctx) | not_healthy(ctx)
//!
//! Termination signal (lifecycle::signals)
//!     → handler.rs swaps the test for `false`, permanently
//! ```
//!
//! # Design Decisions
//! - The test is evaluated fresh on every probe, never cached
//! - Errors and panics in the test are "not healthy", not crashes
//! - A failing not-healthy callback is logged and dropped

pub mod handler;
pub mod outcome;

pub use handler::{HealthHandler, HealthHandlerOptions, HealthTest, ProbeCallback};
pub use outcome::{HealthError, ProbeOutcome};
