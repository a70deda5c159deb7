//! Step outcome records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Final status of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Not finished yet
    #[default]
    Unknown,
    /// An attempt returned normally
    Completed,
    /// Stopped cooperatively
    Cancelled,
    /// The last attempt exceeded its timeout
    Timeout,
    /// The last attempt returned an error
    Error,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Outcome of one step, as recorded in the run manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub name: String,
    pub status: StepStatus,
    /// Attempts actually started
    pub attempts: u32,
    /// Whether any attempt hit the timeout
    pub timed_out: bool,
    /// Error text of the last failed attempt, when the step ended in error
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl StepResult {
    /// A fresh result for a step about to start
    pub fn started(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Unknown,
            attempts: 0,
            timed_out: false,
            error: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Close the result with a final status
    pub fn finish(mut self, status: StepStatus) -> Self {
        self.status = status;
        self.ended_at = Some(Utc::now());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_result_json_shape() {
        let result = StepResult::started("prepare").finish(StepStatus::Completed);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["name"], "prepare");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["timedOut"], false);
        assert!(json["error"].is_null());
        assert!(json["endedAt"].is_string());
    }
}
