//! Run manifest and execution log
//!
//! The manifest is a JSON mirror of a run, replaced wholesale after every
//! step. The log is append-only plain text, one line per event.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use runstore::RunStatus;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::step::StepResult;

/// JSON document describing a run and its steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub plan_id: String,
    pub run_id: String,
    pub status: RunStatus,
    /// Null for a run cancelled before it started
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub log_path: String,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub steps: Vec<StepResult>,
}

impl Manifest {
    /// Manifest for a run that just started
    pub fn running(plan_id: &str, run_id: &str, log_path: impl Into<String>, artifacts: Vec<String>) -> Self {
        Self {
            plan_id: plan_id.to_string(),
            run_id: run_id.to_string(),
            status: RunStatus::Running,
            started_at: Some(Utc::now()),
            completed_at: None,
            log_path: log_path.into(),
            artifacts,
            steps: Vec::new(),
        }
    }

    /// Final manifest for a run cancelled while still queued
    pub fn cancelled_before_start(
        plan_id: &str,
        run_id: &str,
        log_path: impl Into<String>,
        artifacts: Vec<String>,
    ) -> Self {
        Self {
            plan_id: plan_id.to_string(),
            run_id: run_id.to_string(),
            status: RunStatus::Cancelled,
            started_at: None,
            completed_at: Some(Utc::now()),
            log_path: log_path.into(),
            artifacts,
            steps: Vec::new(),
        }
    }

    /// Mark the manifest terminal
    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }
}

/// Writes manifests atomically
#[derive(Debug, Clone)]
pub struct ManifestWriter {
    path: PathBuf,
}

impl ManifestWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the manifest on disk with `manifest`
    ///
    /// Serialized to a sibling temp file and renamed over the target, so a
    /// reader never sees a partial document.
    pub fn write(&self, manifest: &Manifest) -> io::Result<()> {
        debug!(path = %self.path.display(), status = %manifest.status, steps = manifest.steps.len(), "ManifestWriter::write: called");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(manifest)?;
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path)
    }

    /// Read a manifest, `None` if it does not exist
    pub fn read(path: &Path) -> io::Result<Option<Manifest>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Destination for step log lines
pub trait LogSink: Send + Sync {
    /// Record one line; implementations must not fail the caller
    fn line(&self, text: &str);
}

/// Append-only execution log of one run
#[derive(Debug, Clone)]
pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line, creating the file and its parents as needed
    pub fn append(&self, text: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", text)
    }

    /// Read a log, `None` if it does not exist
    pub fn read(path: &Path) -> io::Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl LogSink for RunLog {
    fn line(&self, text: &str) {
        if let Err(e) = self.append(text) {
            warn!(path = %self.path.display(), error = %e, "Failed to append to run log");
        }
    }
}

/// Log sink that keeps lines in memory
#[derive(Debug, Default)]
pub struct MemoryLog {
    lines: Mutex<Vec<String>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl LogSink for MemoryLog {
    fn line(&self, text: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(text.to_string());
        }
    }
}
