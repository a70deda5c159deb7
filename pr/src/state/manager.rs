//! StateManager - actor that owns the run store
//!
//! Processes commands via channels for serialized access to persistent state.

use std::path::Path;

use runstore::{Plan, Run, RunStatus, Store, Transition};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::messages::{StateCommand, StateError, StateResponse};

/// Handle to send commands to the StateManager
#[derive(Debug, Clone)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
}

impl StateManager {
    /// Open the store at `store_path` and spawn the actor
    pub fn spawn(store_path: impl AsRef<Path>) -> eyre::Result<Self> {
        debug!(store_path = %store_path.as_ref().display(), "spawn: called");
        let store = Store::open(store_path.as_ref())?;
        Ok(Self::with_store(store))
    }

    /// Spawn the actor around an already opened store
    pub fn with_store(store: Store) -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(store, rx));
        info!("StateManager spawned");
        Self { tx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<StateResponse<T>>) -> StateCommand,
    ) -> StateResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    // === Plan operations ===

    /// Create a plan record
    pub async fn create_plan(&self, plan: Plan) -> StateResponse<()> {
        debug!(plan_id = %plan.id, "create_plan: called");
        self.request(|reply| StateCommand::CreatePlan { plan, reply }).await
    }

    /// Get a plan by ID
    pub async fn get_plan(&self, id: &str) -> StateResponse<Option<Plan>> {
        debug!(%id, "get_plan: called");
        let id = id.to_string();
        self.request(|reply| StateCommand::GetPlan { id, reply }).await
    }

    /// Get a plan by ID, NotFound if absent
    pub async fn require_plan(&self, id: &str) -> StateResponse<Plan> {
        self.get_plan(id)
            .await?
            .ok_or_else(|| StateError::NotFound(format!("plan {}", id)))
    }

    /// List all plans
    pub async fn list_plans(&self) -> StateResponse<Vec<Plan>> {
        debug!("list_plans: called");
        self.request(|reply| StateCommand::ListPlans { reply }).await
    }

    // === Run operations ===

    /// Create a queued run
    pub async fn create_run(&self, run_id: &str, plan_id: &str) -> StateResponse<Run> {
        debug!(%run_id, %plan_id, "create_run: called");
        let run_id = run_id.to_string();
        let plan_id = plan_id.to_string();
        self.request(|reply| StateCommand::CreateRun { run_id, plan_id, reply })
            .await
    }

    /// Get a run by ID
    pub async fn get_run(&self, id: &str) -> StateResponse<Option<Run>> {
        debug!(%id, "get_run: called");
        let id = id.to_string();
        self.request(|reply| StateCommand::GetRun { id, reply }).await
    }

    /// Runs of a plan, newest first
    pub async fn list_runs_for_plan(&self, plan_id: &str) -> StateResponse<Vec<Run>> {
        debug!(%plan_id, "list_runs_for_plan: called");
        let plan_id = plan_id.to_string();
        self.request(|reply| StateCommand::ListRunsForPlan { plan_id, reply })
            .await
    }

    /// Runs in a status, oldest first
    pub async fn list_runs_by_status(&self, status: RunStatus) -> StateResponse<Vec<Run>> {
        debug!(%status, "list_runs_by_status: called");
        self.request(|reply| StateCommand::ListRunsByStatus { status, reply })
            .await
    }

    /// Move a queued run to running
    pub async fn set_running(&self, id: &str, manifest_path: &str, log_path: &str) -> StateResponse<Transition> {
        debug!(%id, %manifest_path, %log_path, "set_running: called");
        let id = id.to_string();
        let manifest_path = manifest_path.to_string();
        let log_path = log_path.to_string();
        self.request(|reply| StateCommand::SetRunning {
            id,
            manifest_path,
            log_path,
            reply,
        })
        .await
    }

    /// Move a run to a terminal status, a no-op if it already is terminal
    pub async fn set_completed(&self, id: &str, status: RunStatus) -> StateResponse<Transition> {
        debug!(%id, %status, "set_completed: called");
        let id = id.to_string();
        self.request(|reply| StateCommand::SetCompleted { id, status, reply })
            .await
    }

    /// Cancel a queued or running run
    pub async fn request_cancel(&self, id: &str) -> StateResponse<Transition> {
        debug!(%id, "request_cancel: called");
        let id = id.to_string();
        self.request(|reply| StateCommand::RequestCancel { id, reply }).await
    }

    /// Attach manifest and log paths without changing status
    pub async fn set_paths(&self, id: &str, manifest_path: &str, log_path: &str) -> StateResponse<Run> {
        debug!(%id, "set_paths: called");
        let id = id.to_string();
        let manifest_path = manifest_path.to_string();
        let log_path = log_path.to_string();
        self.request(|reply| StateCommand::SetPaths {
            id,
            manifest_path,
            log_path,
            reply,
        })
        .await
    }

    /// Stop the actor; later requests fail with `ChannelError`
    pub async fn shutdown(&self) -> StateResponse<()> {
        debug!("shutdown: called");
        self.tx
            .send(StateCommand::Shutdown)
            .await
            .map_err(|_| StateError::ChannelError)
    }
}

/// The actor loop that processes commands
async fn actor_loop(store: Store, mut rx: mpsc::Receiver<StateCommand>) {
    debug!("actor_loop: StateManager actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StateCommand::CreatePlan { plan, reply } => {
                debug!(plan_id = %plan.id, "actor_loop: CreatePlan command");
                let _ = reply.send(store.create_plan(&plan).map_err(StateError::from));
            }

            StateCommand::GetPlan { id, reply } => {
                debug!(%id, "actor_loop: GetPlan command");
                let _ = reply.send(store.get_plan(&id).map_err(StateError::from));
            }

            StateCommand::ListPlans { reply } => {
                debug!("actor_loop: ListPlans command");
                let _ = reply.send(store.list_plans().map_err(StateError::from));
            }

            StateCommand::CreateRun { run_id, plan_id, reply } => {
                debug!(%run_id, %plan_id, "actor_loop: CreateRun command");
                let _ = reply.send(store.create_run(&run_id, &plan_id).map_err(StateError::from));
            }

            StateCommand::GetRun { id, reply } => {
                debug!(%id, "actor_loop: GetRun command");
                let _ = reply.send(store.get_run(&id).map_err(StateError::from));
            }

            StateCommand::ListRunsForPlan { plan_id, reply } => {
                debug!(%plan_id, "actor_loop: ListRunsForPlan command");
                let _ = reply.send(store.list_for_plan(&plan_id).map_err(StateError::from));
            }

            StateCommand::ListRunsByStatus { status, reply } => {
                debug!(%status, "actor_loop: ListRunsByStatus command");
                let _ = reply.send(store.list_by_status(status).map_err(StateError::from));
            }

            StateCommand::SetRunning {
                id,
                manifest_path,
                log_path,
                reply,
            } => {
                debug!(%id, "actor_loop: SetRunning command");
                let result = store.set_running(&id, &manifest_path, &log_path);
                let _ = reply.send(result.map_err(StateError::from));
            }

            StateCommand::SetCompleted { id, status, reply } => {
                debug!(%id, %status, "actor_loop: SetCompleted command");
                let _ = reply.send(store.set_completed(&id, status).map_err(StateError::from));
            }

            StateCommand::RequestCancel { id, reply } => {
                debug!(%id, "actor_loop: RequestCancel command");
                let _ = reply.send(store.request_cancel(&id).map_err(StateError::from));
            }

            StateCommand::SetPaths {
                id,
                manifest_path,
                log_path,
                reply,
            } => {
                debug!(%id, "actor_loop: SetPaths command");
                let result = store.set_paths(&id, &manifest_path, &log_path);
                let _ = reply.send(result.map_err(StateError::from));
            }

            StateCommand::Shutdown => {
                info!("StateManager shutting down");
                break;
            }
        }
    }

    debug!("actor_loop: StateManager actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manager_with_plan() -> StateManager {
        let state = StateManager::with_store(Store::open_in_memory().unwrap());
        state.create_plan(Plan::new("p1", "Plan one")).await.unwrap();
        state
    }

    #[tokio::test]
    async fn test_run_lifecycle_through_actor() {
        let state = manager_with_plan().await;
        let run = state.create_run("r1", "p1").await.unwrap();
        assert_eq!(run.status, RunStatus::Queued);

        let started = state.set_running("r1", "m.json", "e.log").await.unwrap();
        assert!(started.applied());
        assert_eq!(started.run().manifest_path.as_deref(), Some("m.json"));

        let done = state.set_completed("r1", RunStatus::Done).await.unwrap();
        assert!(done.applied());
        assert_eq!(done.run().status, RunStatus::Done);

        let cancel = state.request_cancel("r1").await.unwrap();
        assert!(!cancel.applied());
        assert_eq!(cancel.run().status, RunStatus::Done);
    }

    #[tokio::test]
    async fn test_missing_plan_is_not_found() {
        let state = StateManager::with_store(Store::open_in_memory().unwrap());
        assert!(state.get_plan("nope").await.unwrap().is_none());
        let err = state.require_plan("nope").await.unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_invalid_id_maps_to_not_found() {
        let state = StateManager::with_store(Store::open_in_memory().unwrap());
        let err = state.create_plan(Plan::new("a/b", "bad")).await.unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_requests_fail_after_shutdown() {
        let state = manager_with_plan().await;
        state.shutdown().await.unwrap();
        tokio::task::yield_now().await;
        let err = state.list_plans().await.unwrap_err();
        assert!(matches!(err, StateError::ChannelError));
    }
}
