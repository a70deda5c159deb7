//! Run record and its status state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Status of a plan run
///
/// Legal moves are `queued → running → {done | failed}` and
/// `{queued | running} → cancelled`. `done`, `failed` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Created, waiting in the queue
    #[default]
    Queued,
    /// Picked up by a worker
    Running,
    /// Every step completed
    Done,
    /// Stopped by a cancel request
    Cancelled,
    /// A step timed out or errored, or the worker faulted
    Failed,
}

impl RunStatus {
    /// Every status, in lifecycle order
    pub const ALL: [RunStatus; 5] = [
        RunStatus::Queued,
        RunStatus::Running,
        RunStatus::Done,
        RunStatus::Cancelled,
        RunStatus::Failed,
    ];

    /// Stable lowercase name, as stored and serialized
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    /// Whether no further transition may leave this status
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Failed)
    }

    /// Whether moving from `self` to `to` is a legal transition
    pub fn can_transition_to(&self, to: RunStatus) -> bool {
        let allowed = matches!(
            (self, to),
            (Self::Queued, Self::Running)
                | (Self::Running, Self::Done)
                | (Self::Running, Self::Failed)
                | (Self::Queued, Self::Cancelled)
                | (Self::Running, Self::Cancelled)
        );
        debug!(from = %self, %to, allowed, "RunStatus::can_transition_to: called");
        allowed
    }

    /// Statuses a run may be in for a move to `to` to apply
    pub fn sources_of(to: RunStatus) -> Vec<RunStatus> {
        Self::ALL.into_iter().filter(|s| s.can_transition_to(to)).collect()
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "done" => Ok(Self::Done),
            "cancelled" => Ok(Self::Cancelled),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown run status: {}", s)),
        }
    }
}

/// Durable record of one run of a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    /// Unique identifier
    pub id: String,

    /// Plan this run executes
    pub plan_id: String,

    /// Current status
    pub status: RunStatus,

    /// Root-relative path of the run manifest (set when the run starts)
    pub manifest_path: Option<String>,

    /// Root-relative path of the run log (set when the run starts)
    pub log_path: Option<String>,

    /// When the run was enqueued
    pub created_at: DateTime<Utc>,

    /// When a worker picked the run up
    pub started_at: Option<DateTime<Utc>>,

    /// When the run reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Create a queued run
    pub fn queued(id: impl Into<String>, plan_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            plan_id: plan_id.into(),
            status: RunStatus::Queued,
            manifest_path: None,
            log_path: None,
            created_at: crate::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Check if the run is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Outcome of a guarded status write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The write applied; holds the updated record
    Applied(Run),
    /// The run was not in a state the write could apply from; holds the record unchanged
    Rejected(Run),
}

impl Transition {
    /// The record after the attempt, whichever way it went
    pub fn run(&self) -> &Run {
        match self {
            Self::Applied(run) | Self::Rejected(run) => run,
        }
    }

    /// Consume into the record
    pub fn into_run(self) -> Run {
        match self {
            Self::Applied(run) | Self::Rejected(run) => run,
        }
    }

    /// Whether the write applied
    pub fn applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_status_display_and_parse() {
        for status in RunStatus::ALL {
            let parsed: RunStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("paused".parse::<RunStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!RunStatus::Queued.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Done.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }

    #[test]
    fn test_cancel_allowed_from_pre_terminal_only() {
        assert_eq!(
            RunStatus::sources_of(RunStatus::Cancelled),
            vec![RunStatus::Queued, RunStatus::Running]
        );
    }

    #[test]
    fn test_done_only_from_running() {
        assert_eq!(RunStatus::sources_of(RunStatus::Done), vec![RunStatus::Running]);
        assert!(!RunStatus::Queued.can_transition_to(RunStatus::Done));
    }

    #[test]
    fn test_run_serializes_camel_case() {
        let run = Run::queued("r1", "p1");
        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["id"], "r1");
        assert_eq!(json["planId"], "p1");
        assert_eq!(json["status"], "queued");
        assert!(json["manifestPath"].is_null());
        assert!(json["logPath"].is_null());
        assert!(json["startedAt"].is_null());
    }

    fn any_status() -> impl Strategy<Value = RunStatus> {
        prop::sample::select(RunStatus::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn prop_terminal_states_never_transition(from in any_status(), to in any_status()) {
            if from.is_terminal() {
                prop_assert!(!from.can_transition_to(to));
            }
        }

        #[test]
        fn prop_no_self_transitions(status in any_status()) {
            prop_assert!(!status.can_transition_to(status));
        }
    }
}
