//! HTTP adapter subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (accept loop, hyper-util connection driver)
//!     → Axum router (request ID, trace, timeout layers)
//!     → probe.rs (ProbeContext) → HealthHandler → reply
//!     → Send to client
//! ```

pub mod probe;
pub mod server;

/// Header carrying the request ID.
pub const X_REQUEST_ID: &str = "x-request-id";

pub use probe::{default_options, ProbeContext};
pub use server::{HttpServer, ServerError, ServerState};
