//! State manager messages
//!
//! Commands and responses for the actor pattern.

use runstore::{Plan, Run, RunStatus, StoreError, Transition};
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors from state operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Record already exists: {0}")]
    Duplicate(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Channel error")]
    ChannelError,
}

impl From<StoreError> for StateError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what),
            // Ids double as path components; a malformed one names nothing
            StoreError::InvalidId(id) => Self::NotFound(id),
            StoreError::Duplicate(what) => Self::Duplicate(what),
            other => Self::StoreError(other.to_string()),
        }
    }
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;

/// Commands sent to the StateManager actor
#[derive(Debug)]
pub enum StateCommand {
    // Plan operations
    CreatePlan {
        plan: Plan,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    GetPlan {
        id: String,
        reply: oneshot::Sender<StateResponse<Option<Plan>>>,
    },
    ListPlans {
        reply: oneshot::Sender<StateResponse<Vec<Plan>>>,
    },

    // Run operations
    CreateRun {
        run_id: String,
        plan_id: String,
        reply: oneshot::Sender<StateResponse<Run>>,
    },
    GetRun {
        id: String,
        reply: oneshot::Sender<StateResponse<Option<Run>>>,
    },
    ListRunsForPlan {
        plan_id: String,
        reply: oneshot::Sender<StateResponse<Vec<Run>>>,
    },
    ListRunsByStatus {
        status: RunStatus,
        reply: oneshot::Sender<StateResponse<Vec<Run>>>,
    },

    // Guarded status writes
    SetRunning {
        id: String,
        manifest_path: String,
        log_path: String,
        reply: oneshot::Sender<StateResponse<Transition>>,
    },
    SetCompleted {
        id: String,
        status: RunStatus,
        reply: oneshot::Sender<StateResponse<Transition>>,
    },
    RequestCancel {
        id: String,
        reply: oneshot::Sender<StateResponse<Transition>>,
    },
    SetPaths {
        id: String,
        manifest_path: String,
        log_path: String,
        reply: oneshot::Sender<StateResponse<Run>>,
    },

    // Shutdown
    Shutdown,
}
