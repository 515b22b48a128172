//! Result normalization for health tests and probe callbacks.
//!
//! Tests may answer with a plain `bool` or a `Result<bool, E>`; callbacks with
//! `()` or `Result<(), E>`. Both collapse into `Result<_, HealthError>` so the
//! handler treats a returned error and a panic the same way.

use std::any::Any;
use std::fmt;

/// Failure raised while evaluating a health test or running a probe callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HealthError {
    #[error("{0}")]
    Failed(String),
    #[error("panicked: {0}")]
    Panicked(String),
}

impl HealthError {
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        HealthError::Panicked(message)
    }
}

/// Conversion of a test or callback return value into a uniform outcome.
pub trait ProbeOutcome<T> {
    fn into_outcome(self) -> Result<T, HealthError>;
}

impl ProbeOutcome<bool> for bool {
    fn into_outcome(self) -> Result<bool, HealthError> {
        Ok(self)
    }
}

impl<E: fmt::Display> ProbeOutcome<bool> for Result<bool, E> {
    fn into_outcome(self) -> Result<bool, HealthError> {
        self.map_err(|e| HealthError::Failed(e.to_string()))
    }
}

impl ProbeOutcome<()> for () {
    fn into_outcome(self) -> Result<(), HealthError> {
        Ok(())
    }
}

impl<E: fmt::Display> ProbeOutcome<()> for Result<(), E> {
    fn into_outcome(self) -> Result<(), HealthError> {
        self.map_err(|e| HealthError::Failed(e.to_string()))
    }
}
