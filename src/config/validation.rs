//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (connection limits, grace period)
//! - Check addresses parse and paths are routable
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;

use crate::config::schema::ServiceConfig;

/// Upper bound on the shutdown grace period.
pub const MAX_GRACE_PERIOD_MS: u64 = 60 * 60 * 1000;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid {field} address `{value}`")]
    InvalidAddress { field: &'static str, value: String },
    #[error("listener.max_connections must be greater than zero")]
    ZeroConnections,
    #[error("shutdown.signals must not be empty")]
    NoSignals,
    #[error("shutdown.grace_period_ms {0} exceeds the one hour limit")]
    GracePeriodTooLong(u64),
    #[error("health.path `{0}` must start with '/'")]
    InvalidHealthPath(String),
    #[error("health.request_timeout_secs must be greater than zero")]
    ZeroTimeout,
}

/// Check a parsed configuration.
pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::ZeroConnections);
    }

    if config.shutdown.signals.is_empty() {
        errors.push(ValidationError::NoSignals);
    }
    if config.shutdown.grace_period_ms > MAX_GRACE_PERIOD_MS {
        errors.push(ValidationError::GracePeriodTooLong(config.shutdown.grace_period_ms));
    }

    if !config.health.path.starts_with('/') {
        errors.push(ValidationError::InvalidHealthPath(config.health.path.clone()));
    }
    if config.health.request_timeout_secs == 0 {
        errors.push(ValidationError::ZeroTimeout);
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
