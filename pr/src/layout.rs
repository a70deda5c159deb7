//! On-disk layout of run artifacts
//!
//! `<root>/plans/<planId>/runs/<runId>/{manifest.json,execution.log,cancel.flag}`

use std::path::PathBuf;

const MANIFEST_FILE: &str = "manifest.json";
const LOG_FILE: &str = "execution.log";
const CANCEL_FILE: &str = "cancel.flag";

/// Resolves run artifact paths under the storage root
#[derive(Debug, Clone)]
pub struct RunLayout {
    root: PathBuf,
}

impl RunLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root-relative POSIX directory of a run
    pub fn run_dir_rel(plan_id: &str, run_id: &str) -> String {
        format!("plans/{}/runs/{}", plan_id, run_id)
    }

    /// Root-relative POSIX path of a run's manifest
    pub fn manifest_rel(plan_id: &str, run_id: &str) -> String {
        format!("{}/{}", Self::run_dir_rel(plan_id, run_id), MANIFEST_FILE)
    }

    /// Root-relative POSIX path of a run's log
    pub fn log_rel(plan_id: &str, run_id: &str) -> String {
        format!("{}/{}", Self::run_dir_rel(plan_id, run_id), LOG_FILE)
    }

    pub fn run_dir(&self, plan_id: &str, run_id: &str) -> PathBuf {
        self.root.join("plans").join(plan_id).join("runs").join(run_id)
    }

    pub fn manifest_path(&self, plan_id: &str, run_id: &str) -> PathBuf {
        self.run_dir(plan_id, run_id).join(MANIFEST_FILE)
    }

    pub fn log_path(&self, plan_id: &str, run_id: &str) -> PathBuf {
        self.run_dir(plan_id, run_id).join(LOG_FILE)
    }

    pub fn marker_path(&self, plan_id: &str, run_id: &str) -> PathBuf {
        self.run_dir(plan_id, run_id).join(CANCEL_FILE)
    }

    /// Absolute path of a root-relative POSIX path stored on a run record
    pub fn resolve(&self, rel: &str) -> PathBuf {
        rel.split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |acc, part| acc.join(part))
    }
}
