//! Worker - drains the run queue and executes runs

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use eyre::{Context, Result};
use futures::FutureExt;
use runstore::{Run, RunStatus};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelSignal;
use crate::error::panic_message;
use crate::layout::RunLayout;
use crate::manifest::{LogSink, Manifest, ManifestWriter, RunLog};
use crate::queue::{QueuedRun, RunQueue};
use crate::state::StateManager;
use crate::step::{StepStatus, run_step};

use super::locks::PlanLocks;
use super::pipeline::PipelineSource;

/// Everything a worker needs to execute a run
#[derive(Clone)]
pub struct WorkerContext {
    pub state: StateManager,
    pub layout: RunLayout,
    pub pipeline: Arc<dyn PipelineSource>,
    pub locks: Arc<PlanLocks>,
}

/// Files and signal of one run
struct RunFiles {
    manifest_rel: String,
    log_rel: String,
    writer: ManifestWriter,
    log: RunLog,
    signal: CancelSignal,
}

impl RunFiles {
    fn new(layout: &RunLayout, plan_id: &str, run_id: &str) -> Self {
        let manifest_rel = RunLayout::manifest_rel(plan_id, run_id);
        let log_rel = RunLayout::log_rel(plan_id, run_id);
        Self {
            writer: ManifestWriter::new(layout.resolve(&manifest_rel)),
            log: RunLog::new(layout.resolve(&log_rel)),
            signal: CancelSignal::with_marker(layout.marker_path(plan_id, run_id)),
            manifest_rel,
            log_rel,
        }
    }
}

impl WorkerContext {
    /// Execute one dequeued run, returning the status it ended in
    ///
    /// Errors leave the run for [`WorkerContext::recover_fault`].
    pub async fn process(&self, queued: &QueuedRun) -> Result<RunStatus> {
        let QueuedRun { plan_id, run_id } = queued;
        debug!(%plan_id, %run_id, "process: called");
        let files = RunFiles::new(&self.layout, plan_id, run_id);

        let run = self
            .state
            .get_run(run_id)
            .await?
            .ok_or_else(|| eyre::eyre!("run {} vanished before execution", run_id))?;

        if run.status != RunStatus::Queued || files.signal.is_raised() {
            return self.short_circuit(&run, &files).await;
        }

        let plan = self.state.require_plan(plan_id).await?;
        let transition = self
            .state
            .set_running(run_id, &files.manifest_rel, &files.log_rel)
            .await?;
        if !transition.applied() {
            debug!(%run_id, status = %transition.run().status, "process: lost the start to another writer");
            return self.short_circuit(transition.run(), &files).await;
        }
        info!(%plan_id, %run_id, "Run started");

        files
            .log
            .append(&format!("BEGIN run {}", run_id))
            .context("Failed to write run log")?;
        let mut manifest = Manifest::running(plan_id, run_id, files.log_rel.clone(), plan.artifacts.clone());
        files.writer.write(&manifest).context("Failed to write manifest")?;

        let mut outcome = RunStatus::Done;
        for step in self.pipeline.steps_for(&plan) {
            if self.cancel_requested(run_id, &files.signal).await? {
                files.log.line(&format!("run {} cancelled before step {}", run_id, step.name));
                outcome = RunStatus::Cancelled;
                break;
            }

            let result = run_step(&step.name, step.body, &step.policy, &files.log, &files.signal).await;
            let status = result.status;
            manifest.steps.push(result);
            files.writer.write(&manifest).context("Failed to write manifest")?;

            match status {
                StepStatus::Completed => {}
                StepStatus::Cancelled => {
                    files.log.line(&format!("run {} cancelled during step {}", run_id, step.name));
                    outcome = RunStatus::Cancelled;
                    break;
                }
                other => {
                    warn!(%run_id, step = %step.name, status = %other, "Step did not complete, failing run");
                    outcome = RunStatus::Failed;
                    break;
                }
            }
        }

        if outcome == RunStatus::Done && self.cancel_requested(run_id, &files.signal).await? {
            files.log.line(&format!("run {} cancelled after last step", run_id));
            outcome = RunStatus::Cancelled;
        }

        // A racing cancel may already have moved the run; the store decides
        let recorded = self.state.set_completed(run_id, outcome).await?.into_run().status;
        if recorded != outcome {
            debug!(%run_id, %outcome, %recorded, "process: store kept an earlier terminal status");
        }

        manifest.finish(recorded);
        files.writer.write(&manifest).context("Failed to write manifest")?;
        files
            .log
            .append(&format!("END run {} {}", run_id, recorded))
            .context("Failed to write run log")?;

        info!(%plan_id, %run_id, status = %recorded, "Run finished");
        Ok(recorded)
    }

    /// A run that must not execute steps: cancelled while queued, or not queued at all
    async fn short_circuit(&self, run: &Run, files: &RunFiles) -> Result<RunStatus> {
        let run_id = &run.id;
        if !(run.status == RunStatus::Cancelled || (!run.is_terminal() && files.signal.is_raised())) {
            debug!(%run_id, status = %run.status, "short_circuit: nothing to execute");
            return Ok(run.status);
        }

        let recorded = self.state.request_cancel(run_id).await?.into_run().status;
        if recorded != RunStatus::Cancelled {
            debug!(%run_id, status = %recorded, "short_circuit: run ended before the cancel landed");
            return Ok(recorded);
        }
        info!(%run_id, "Run cancelled before start");

        files
            .log
            .append(&format!("run {} cancelled before start", run_id))
            .context("Failed to write run log")?;
        files
            .log
            .append(&format!("END run {} cancelled", run_id))
            .context("Failed to write run log")?;
        let artifacts = match self.state.get_plan(&run.plan_id).await {
            Ok(Some(plan)) => plan.artifacts,
            _ => Vec::new(),
        };
        let manifest = Manifest::cancelled_before_start(&run.plan_id, run_id, files.log_rel.clone(), artifacts);
        files.writer.write(&manifest).context("Failed to write manifest")?;
        self.state
            .set_paths(run_id, &files.manifest_rel, &files.log_rel)
            .await?;
        Ok(RunStatus::Cancelled)
    }

    /// Whether the run was cancelled through either channel
    async fn cancel_requested(&self, run_id: &str, signal: &CancelSignal) -> Result<bool> {
        if signal.is_raised() {
            return Ok(true);
        }
        let cancelled = matches!(
            self.state.get_run(run_id).await?,
            Some(Run {
                status: RunStatus::Cancelled,
                ..
            })
        );
        if cancelled {
            // Make the status-only cancel visible to step bodies too
            signal.raise_local();
        }
        Ok(cancelled)
    }

    /// Put a run whose processing faulted into a terminal status
    ///
    /// `cancelled` if cancellation was requested, otherwise `failed`.
    pub async fn recover_fault(&self, queued: &QueuedRun, reason: &str) {
        let QueuedRun { plan_id, run_id } = queued;
        debug!(%plan_id, %run_id, %reason, "recover_fault: called");
        let files = RunFiles::new(&self.layout, plan_id, run_id);

        let run = match self.state.get_run(run_id).await {
            Ok(Some(run)) => run,
            Ok(None) => {
                warn!(%run_id, "Faulted run no longer exists");
                return;
            }
            Err(e) => {
                error!(%run_id, error = %e, "Could not load faulted run");
                return;
            }
        };
        if run.is_terminal() {
            debug!(%run_id, status = %run.status, "recover_fault: already terminal");
            return;
        }

        let target = if files.signal.is_raised() {
            RunStatus::Cancelled
        } else {
            RunStatus::Failed
        };

        // failed is only reachable from running
        if target == RunStatus::Failed
            && run.status == RunStatus::Queued
            && let Err(e) = self
                .state
                .set_running(run_id, &files.manifest_rel, &files.log_rel)
                .await
        {
            error!(%run_id, error = %e, "Could not start faulted run for failing");
            return;
        }

        let recorded = match self.state.set_completed(run_id, target).await {
            Ok(transition) => transition.into_run().status,
            Err(e) => {
                error!(%run_id, error = %e, "Could not finalize faulted run");
                return;
            }
        };
        warn!(%run_id, status = %recorded, %reason, "Recovered faulted run");

        files.log.line(&format!("run {} fault: {}", run_id, reason));
        files.log.line(&format!("END run {} {}", run_id, recorded));

        let mut manifest = match ManifestWriter::read(files.writer.path()) {
            Ok(Some(manifest)) => manifest,
            _ => Manifest::running(plan_id, run_id, files.log_rel.clone(), Vec::new()),
        };
        manifest.finish(recorded);
        if let Err(e) = files.writer.write(&manifest) {
            warn!(%run_id, error = %e, "Failed to write manifest for faulted run");
        }
        if let Err(e) = self
            .state
            .set_paths(run_id, &files.manifest_rel, &files.log_rel)
            .await
        {
            warn!(%run_id, error = %e, "Failed to record paths for faulted run");
        }
    }
}

/// Long-lived consumer of the run queue
pub struct Worker {
    id: usize,
    ctx: WorkerContext,
    queue: Arc<RunQueue>,
    shutdown: CancellationToken,
}

impl Worker {
    pub fn new(id: usize, ctx: WorkerContext, queue: Arc<RunQueue>, shutdown: CancellationToken) -> Self {
        Self {
            id,
            ctx,
            queue,
            shutdown,
        }
    }

    /// Dequeue and process runs until shutdown or the queue closes
    pub async fn run(self) {
        info!(worker = self.id, "Worker started");
        loop {
            // Runs still queued at shutdown stay queued for the next start
            if self.shutdown.is_cancelled() {
                debug!(worker = self.id, "run: shutdown requested");
                break;
            }
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    debug!(worker = self.id, "run: shutdown requested");
                    break;
                }
                next = self.queue.dequeue() => next,
            };
            match next {
                Some(queued) => self.handle(queued).await,
                None => {
                    debug!(worker = self.id, "run: queue closed");
                    break;
                }
            }
        }
        info!(worker = self.id, "Worker stopped");
    }

    /// Process one run; faults and panics never escape
    async fn handle(&self, queued: QueuedRun) {
        let _plan_guard = self.ctx.locks.acquire(&queued.plan_id).await;
        debug!(worker = self.id, run_id = %queued.run_id, "handle: acquired plan lock");

        match AssertUnwindSafe(self.ctx.process(&queued)).catch_unwind().await {
            Ok(Ok(status)) => {
                debug!(worker = self.id, run_id = %queued.run_id, %status, "handle: run processed");
            }
            Ok(Err(e)) => {
                error!(worker = self.id, run_id = %queued.run_id, error = %e, "Run processing failed");
                self.ctx.recover_fault(&queued, &format!("{:#}", e)).await;
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!(worker = self.id, run_id = %queued.run_id, %reason, "Run processing panicked");
                self.ctx.recover_fault(&queued, &format!("panicked: {}", reason)).await;
            }
        }
    }
}
