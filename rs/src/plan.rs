//! Plan record
//!
//! Plans are authored elsewhere; the run subsystem only looks them up and
//! copies their artifact list into each run manifest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A plan runs are executed for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    /// Unique identifier
    pub id: String,

    /// Short human-readable title
    pub title: String,

    /// Root-relative paths of documents generated for the plan
    #[serde(default)]
    pub artifacts: Vec<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Plan {
    /// Create a plan with a specific ID
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artifacts: Vec::new(),
            created_at: crate::now(),
        }
    }

    /// Builder method to add an artifact path
    pub fn with_artifact(mut self, path: impl Into<String>) -> Self {
        self.artifacts.push(path.into());
        self
    }
}
