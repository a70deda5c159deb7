//! Orchestrator and step errors

use thiserror::Error;

use crate::state::StateError;

/// Errors surfaced by the orchestrator facade
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("State error: {0}")]
    State(StateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Orchestrator is shutting down")]
    ShuttingDown,
}

impl From<StateError> for OrchestratorError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NotFound(what) => Self::NotFound(what),
            other => Self::State(other),
        }
    }
}

/// Result alias for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Failure of a single step attempt
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    /// The body failed; the attempt may be retried
    #[error("{0}")]
    Failed(String),

    /// The body stopped because cancellation was requested; never retried
    #[error("cancelled")]
    Cancelled,

    /// The body panicked; treated like a failure
    #[error("panicked: {0}")]
    Panicked(String),
}

impl StepError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// Build from a caught panic payload
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        Self::Panicked(panic_message(payload.as_ref()))
    }
}

/// Best-effort text of a panic payload
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_not_found_maps_to_not_found() {
        let err: OrchestratorError = StateError::NotFound("run r1".to_string()).into();
        assert!(matches!(err, OrchestratorError::NotFound(ref what) if what == "run r1"));

        let err: OrchestratorError = StateError::ChannelError.into();
        assert!(matches!(err, OrchestratorError::State(StateError::ChannelError)));
    }

    #[test]
    fn test_panic_message_from_payloads() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(StepError::from_panic(payload), StepError::Panicked("boom".to_string()));

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(payload.as_ref()), "owned boom");

        let payload: Box<dyn std::any::Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[test]
    fn test_step_error_display() {
        assert_eq!(StepError::failed("flaky").to_string(), "flaky");
        assert_eq!(StepError::Cancelled.to_string(), "cancelled");
    }
}
