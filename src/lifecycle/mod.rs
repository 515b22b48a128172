//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → SignalBus::emit → every subscribed listener, in order
//!
//! Shutdown (shutdown.rs):
//!     Signal received → per-hook grace timer → cleanup callback
//!
//! Startup (startup.rs):
//!     Load config → bus + hooks → health handler → bind server → serve
//! ```
//!
//! # Design Decisions
//! - The bus and hook registry are explicit objects, injected, never global
//! - Each hook has its own grace period and its own subscriptions
//! - Repeated signals are not coalesced unless `Delivery::Once` is configured

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{HookError, HookKey, ShutdownHooks};
pub use signals::{Delivery, ListenerId, Signal, SignalBus};
pub use startup::{Service, ServiceError, CLOSE_SERVER_HOOK};
