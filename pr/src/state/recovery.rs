//! Crash recovery
//!
//! Runs left `running` by a crashed process are failed; runs still `queued`
//! are handed back to the queue in creation order.

use runstore::RunStatus;
use tracing::{debug, info, warn};

use crate::layout::RunLayout;
use crate::manifest::{ManifestWriter, RunLog};
use crate::queue::RunQueue;

use super::StateManager;

/// Recovery statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Interrupted runs moved to `failed`
    pub failed: usize,
    /// Queued runs put back on the queue
    pub requeued: usize,
}

impl std::fmt::Display for RecoveryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed: {}, requeued: {}", self.failed, self.requeued)
    }
}

/// Repair state left behind by a previous process
pub async fn recover(state: &StateManager, layout: &RunLayout, queue: &RunQueue) -> eyre::Result<RecoveryStats> {
    debug!("recover: called");
    let mut stats = RecoveryStats::default();

    let interrupted = state
        .list_runs_by_status(RunStatus::Running)
        .await
        .map_err(|e| eyre::eyre!("Failed to list running runs: {}", e))?;

    for run in interrupted {
        info!(run_id = %run.id, plan_id = %run.plan_id, "Failing interrupted run");
        let transition = state
            .set_completed(&run.id, RunStatus::Failed)
            .await
            .map_err(|e| eyre::eyre!("Failed to fail run {}: {}", run.id, e))?;
        if !transition.applied() {
            debug!(run_id = %run.id, "recover: run moved on before recovery");
            continue;
        }
        stats.failed += 1;

        if let Some(rel) = run.log_path.as_deref() {
            let log = RunLog::new(layout.resolve(rel));
            if let Err(e) = log.append(&format!("recovered: run interrupted\nEND run {} failed", run.id)) {
                warn!(run_id = %run.id, error = %e, "Failed to append recovery line");
            }
        }
        if let Some(rel) = run.manifest_path.as_deref() {
            let path = layout.resolve(rel);
            match ManifestWriter::read(&path) {
                Ok(Some(mut manifest)) => {
                    manifest.finish(RunStatus::Failed);
                    if let Err(e) = ManifestWriter::new(&path).write(&manifest) {
                        warn!(run_id = %run.id, error = %e, "Failed to finalize recovered manifest");
                    }
                }
                Ok(None) => debug!(run_id = %run.id, "recover: no manifest to finalize"),
                Err(e) => warn!(run_id = %run.id, error = %e, "Failed to read recovered manifest"),
            }
        }
    }

    let queued = state
        .list_runs_by_status(RunStatus::Queued)
        .await
        .map_err(|e| eyre::eyre!("Failed to list queued runs: {}", e))?;

    for run in queued {
        debug!(run_id = %run.id, "recover: requeueing run");
        queue.enqueue(&run.plan_id, &run.id)?;
        stats.requeued += 1;
    }

    info!(%stats, "Recovery complete");
    Ok(stats)
}
