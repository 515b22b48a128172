//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → tls.rs (optional TLS handshake)
//!     → connection.rs (presence set, active count)
//!     → Hand off to HTTP layer
//!
//! Close (drain.rs):
//!     terminate every tracked connection → native server close → callback
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Secure servers track a connection only once its handshake completes
//! - Draining terminates; it never waits for in-flight requests

pub mod connection;
pub mod drain;
pub mod listener;
pub mod tls;

pub use connection::{ConnectionId, ConnectionObserver, ConnectionSet, ConnectionTracker, Terminate};
pub use drain::{AcceptEvent, CloseCallback, CloseError, DrainingClose, Server};
pub use listener::{Listener, ListenerError};
