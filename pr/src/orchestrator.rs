//! Orchestrator - the facade the HTTP API and CLI talk to
//!
//! Owns the state actor, the run queue and the worker pool. `connect` gives
//! a handle for reading and cancelling runs without executing any; `start`
//! additionally recovers interrupted state and spawns workers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use runstore::{Plan, Run};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cancel::CancelSignal;
use crate::config::Config;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::layout::RunLayout;
use crate::manifest::{Manifest, ManifestWriter, RunLog};
use crate::queue::RunQueue;
use crate::state::{RecoveryStats, StateManager, recover};
use crate::worker::{ConfigPipeline, PipelineSource, PlanLocks, WorkerContext, spawn_workers};

const WAIT_POLL: Duration = Duration::from_millis(20);

/// Plan run orchestrator
pub struct Orchestrator {
    state: StateManager,
    layout: RunLayout,
    queue: Arc<RunQueue>,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown_timeout: Duration,
}

impl Orchestrator {
    /// Open storage without executing anything
    pub fn connect(config: &Config) -> eyre::Result<Self> {
        debug!(root = %config.storage.root.display(), "connect: called");
        let state = StateManager::spawn(config.storage.database_path())?;
        Ok(Self {
            state,
            layout: RunLayout::new(&config.storage.root),
            queue: Arc::new(RunQueue::new()),
            shutdown: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
            shutdown_timeout: config.worker.shutdown_timeout(),
        })
    }

    /// Open storage, recover, and start workers running the configured pipeline
    pub async fn start(config: &Config) -> eyre::Result<Self> {
        let pipeline = ConfigPipeline::new(&config.pipeline, config.worker.poll_interval());
        Self::start_with_pipeline(config, Arc::new(pipeline)).await
    }

    /// Open storage, recover, and start workers running `pipeline`
    pub async fn start_with_pipeline(config: &Config, pipeline: Arc<dyn PipelineSource>) -> eyre::Result<Self> {
        let orchestrator = Self::connect(config)?;
        let stats = orchestrator.recover().await?;
        debug!(%stats, "start_with_pipeline: recovery done");

        let ctx = WorkerContext {
            state: orchestrator.state.clone(),
            layout: orchestrator.layout.clone(),
            pipeline,
            locks: Arc::new(PlanLocks::new()),
        };
        let handles = spawn_workers(
            config.worker.count,
            ctx,
            Arc::clone(&orchestrator.queue),
            orchestrator.shutdown.clone(),
        );
        if let Ok(mut workers) = orchestrator.workers.lock() {
            workers.extend(handles);
        }
        info!(workers = config.worker.count, "Orchestrator started");
        Ok(orchestrator)
    }

    async fn recover(&self) -> eyre::Result<RecoveryStats> {
        recover(&self.state, &self.layout, &self.queue).await
    }

    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    /// Runs waiting for a worker
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    // === Plans ===

    /// Register a plan; a missing ID is generated
    pub async fn create_plan(&self, id: Option<String>, title: &str, artifacts: Vec<String>) -> OrchestratorResult<Plan> {
        let id = id.unwrap_or_else(new_id);
        debug!(%id, %title, "create_plan: called");
        let mut plan = Plan::new(id, title);
        plan.artifacts = artifacts;
        self.state.create_plan(plan.clone()).await?;
        Ok(plan)
    }

    pub async fn list_plans(&self) -> OrchestratorResult<Vec<Plan>> {
        Ok(self.state.list_plans().await?)
    }

    // === Runs ===

    /// Create a queued run for `plan_id` and hand it to the workers
    pub async fn enqueue(&self, plan_id: &str) -> OrchestratorResult<Run> {
        debug!(%plan_id, "enqueue: called");
        self.state.require_plan(plan_id).await?;
        let run = self.state.create_run(&new_id(), plan_id).await?;
        self.queue.enqueue(plan_id, &run.id)?;
        info!(%plan_id, run_id = %run.id, "Run queued");
        Ok(run)
    }

    /// A run of `plan_id`, NotFound if absent or belonging to another plan
    pub async fn get_run(&self, plan_id: &str, run_id: &str) -> OrchestratorResult<Run> {
        debug!(%plan_id, %run_id, "get_run: called");
        match self.state.get_run(run_id).await? {
            Some(run) if run.plan_id == plan_id => Ok(run),
            _ => Err(OrchestratorError::NotFound(format!("run {} of plan {}", run_id, plan_id))),
        }
    }

    /// Runs of a plan, newest first
    pub async fn list_runs(&self, plan_id: &str) -> OrchestratorResult<Vec<Run>> {
        debug!(%plan_id, "list_runs: called");
        self.state.require_plan(plan_id).await?;
        Ok(self.state.list_runs_for_plan(plan_id).await?)
    }

    /// Request cancellation of a run
    ///
    /// Terminal runs are returned unchanged. Otherwise the marker file is
    /// written first, then the status moves to `cancelled` if it still can.
    pub async fn cancel(&self, plan_id: &str, run_id: &str) -> OrchestratorResult<Run> {
        debug!(%plan_id, %run_id, "cancel: called");
        let run = self.get_run(plan_id, run_id).await?;
        if run.is_terminal() {
            debug!(%run_id, status = %run.status, "cancel: already terminal");
            return Ok(run);
        }

        CancelSignal::write_marker(&self.layout.marker_path(plan_id, run_id))?;
        let transition = self.state.request_cancel(run_id).await?;
        info!(%plan_id, %run_id, applied = transition.applied(), "Cancel requested");
        Ok(transition.into_run())
    }

    /// The run's manifest document
    pub async fn manifest(&self, plan_id: &str, run_id: &str) -> OrchestratorResult<Manifest> {
        let run = self.get_run(plan_id, run_id).await?;
        let path = match run.manifest_path.as_deref() {
            Some(rel) => self.layout.resolve(rel),
            None => self.layout.manifest_path(plan_id, run_id),
        };
        ManifestWriter::read(&path)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("manifest of run {}", run_id)))
    }

    /// The run's execution log
    pub async fn log(&self, plan_id: &str, run_id: &str) -> OrchestratorResult<String> {
        let run = self.get_run(plan_id, run_id).await?;
        let path = match run.log_path.as_deref() {
            Some(rel) => self.layout.resolve(rel),
            None => self.layout.log_path(plan_id, run_id),
        };
        RunLog::read(&path)?.ok_or_else(|| OrchestratorError::NotFound(format!("log of run {}", run_id)))
    }

    /// Poll until the run is terminal or `timeout` passes; returns the latest record
    pub async fn wait_terminal(&self, plan_id: &str, run_id: &str, timeout: Duration) -> OrchestratorResult<Run> {
        debug!(%run_id, ?timeout, "wait_terminal: called");
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let run = self.get_run(plan_id, run_id).await?;
            if run.is_terminal() || tokio::time::Instant::now() >= deadline {
                return Ok(run);
            }
            tokio::time::sleep(WAIT_POLL).await;
        }
    }

    /// Stop accepting runs, let workers finish their current run, stop the state actor
    ///
    /// Runs still queued stay `queued` in the store and are picked up on the next start.
    pub async fn shutdown(&self) {
        info!(pending = self.queue.len(), "Orchestrator shutting down");
        self.queue.close();
        self.shutdown.cancel();

        let handles: Vec<_> = match self.workers.lock() {
            Ok(mut workers) => workers.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        let joined = tokio::time::timeout(self.shutdown_timeout, futures::future::join_all(handles)).await;
        if joined.is_err() {
            warn!(timeout = ?self.shutdown_timeout, "Workers did not stop in time");
        }

        if let Err(e) = self.state.shutdown().await {
            debug!(error = %e, "shutdown: state actor already stopped");
        }
        info!("Orchestrator stopped");
    }
}

fn new_id() -> String {
    Uuid::now_v7().simple().to_string()
}
