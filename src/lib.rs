//! Graceful shutdown plumbing for services running under Kubernetes.
//!
//! On a termination signal the health probe flips to "not healthy" so the
//! orchestrator stops routing traffic, registered cleanup hooks run after
//! their grace period, and the HTTP server is closed with every live
//! connection terminated first.

pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::ServiceConfig;
pub use health::{HealthHandler, HealthHandlerOptions, HealthTest, ProbeCallback};
pub use http::HttpServer;
pub use lifecycle::{Delivery, HookKey, Service, ShutdownHooks, Signal, SignalBus};
pub use net::DrainingClose;
