//! Store - SQLite-backed plan and run records

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::plan::Plan;
use crate::run::{Run, RunStatus, Transition};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS plans (
    id          TEXT PRIMARY KEY,
    title       TEXT NOT NULL,
    artifacts   TEXT NOT NULL DEFAULT '[]',
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS runs (
    id             TEXT PRIMARY KEY,
    plan_id        TEXT NOT NULL,
    status         TEXT NOT NULL,
    manifest_path  TEXT,
    log_path       TEXT,
    created_at     TEXT NOT NULL,
    started_at     TEXT,
    completed_at   TEXT
);

CREATE INDEX IF NOT EXISTS idx_runs_plan_id ON runs(plan_id);
CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status);
"#;

const RUN_COLUMNS: &str = "id, plan_id, status, manifest_path, log_path, created_at, started_at, completed_at";

/// Raw row before timestamp/status parsing
struct RunRow {
    id: String,
    plan_id: String,
    status: String,
    manifest_path: Option<String>,
    log_path: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl RunRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            plan_id: row.get(1)?,
            status: row.get(2)?,
            manifest_path: row.get(3)?,
            log_path: row.get(4)?,
            created_at: row.get(5)?,
            started_at: row.get(6)?,
            completed_at: row.get(7)?,
        })
    }

    fn into_run(self) -> StoreResult<Run> {
        let corrupt = |reason: String| StoreError::Corrupt {
            id: self.id.clone(),
            reason,
        };
        let status = self.status.parse::<RunStatus>().map_err(&corrupt)?;
        let created_at = parse_ts(&self.created_at).map_err(&corrupt)?;
        let started_at = self.started_at.as_deref().map(parse_ts).transpose().map_err(&corrupt)?;
        let completed_at = self.completed_at.as_deref().map(parse_ts).transpose().map_err(&corrupt)?;
        Ok(Run {
            id: self.id,
            plan_id: self.plan_id,
            status,
            manifest_path: self.manifest_path,
            log_path: self.log_path,
            created_at,
            started_at,
            completed_at,
        })
    }
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp {:?}: {}", raw, e))
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

/// Durable store for plans and runs
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database file at `path`, creating parent directories
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Store::open: called");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let store = Self::init(conn)?;
        info!(path = %path.display(), "Opened run store");
        Ok(store)
    }

    /// Open a throwaway in-memory store
    pub fn open_in_memory() -> StoreResult<Self> {
        debug!("Store::open_in_memory: called");
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    // === Plans ===

    /// Insert a new plan
    pub fn create_plan(&self, plan: &Plan) -> StoreResult<()> {
        debug!(plan_id = %plan.id, "Store::create_plan: called");
        if !crate::is_valid_id(&plan.id) {
            return Err(StoreError::InvalidId(plan.id.clone()));
        }
        let artifacts = serde_json::to_string(&plan.artifacts).map_err(|e| StoreError::Corrupt {
            id: plan.id.clone(),
            reason: e.to_string(),
        })?;
        self.conn
            .execute(
                "INSERT INTO plans (id, title, artifacts, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![plan.id, plan.title, artifacts, format_ts(plan.created_at)],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    StoreError::Duplicate(format!("plan {}", plan.id))
                } else {
                    StoreError::Database(e)
                }
            })?;
        Ok(())
    }

    /// Look up a plan by ID
    pub fn get_plan(&self, id: &str) -> StoreResult<Option<Plan>> {
        debug!(%id, "Store::get_plan: called");
        let row = self
            .conn
            .query_row(
                "SELECT id, title, artifacts, created_at FROM plans WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        row.map(plan_from_parts).transpose()
    }

    /// List every plan, oldest first
    pub fn list_plans(&self) -> StoreResult<Vec<Plan>> {
        debug!("Store::list_plans: called");
        let mut stmt = self
            .conn
            .prepare("SELECT id, title, artifacts, created_at FROM plans ORDER BY created_at ASC, rowid ASC")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(plan_from_parts).collect()
    }

    // === Runs ===

    /// Create a queued run for a plan
    pub fn create_run(&self, run_id: &str, plan_id: &str) -> StoreResult<Run> {
        debug!(%run_id, %plan_id, "Store::create_run: called");
        if !crate::is_valid_id(run_id) {
            return Err(StoreError::InvalidId(run_id.to_string()));
        }
        let run = Run::queued(run_id, plan_id);
        self.conn
            .execute(
                "INSERT INTO runs (id, plan_id, status, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![run.id, run.plan_id, run.status.as_str(), format_ts(run.created_at)],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    StoreError::Duplicate(format!("run {}", run_id))
                } else {
                    StoreError::Database(e)
                }
            })?;
        // Read back so the caller sees exactly what was persisted
        self.get_run(run_id)?
            .ok_or_else(|| StoreError::NotFound(format!("run {}", run_id)))
    }

    /// Look up a run by ID
    pub fn get_run(&self, run_id: &str) -> StoreResult<Option<Run>> {
        debug!(%run_id, "Store::get_run: called");
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
                params![run_id],
                RunRow::from_row,
            )
            .optional()?;
        row.map(RunRow::into_run).transpose()
    }

    /// List runs of a plan, newest first
    pub fn list_for_plan(&self, plan_id: &str) -> StoreResult<Vec<Run>> {
        debug!(%plan_id, "Store::list_for_plan: called");
        self.query_runs(
            &format!(
                "SELECT {} FROM runs WHERE plan_id = ?1 ORDER BY created_at DESC, rowid DESC",
                RUN_COLUMNS
            ),
            plan_id,
        )
    }

    /// List runs in a given status, oldest first
    pub fn list_by_status(&self, status: RunStatus) -> StoreResult<Vec<Run>> {
        debug!(%status, "Store::list_by_status: called");
        self.query_runs(
            &format!(
                "SELECT {} FROM runs WHERE status = ?1 ORDER BY created_at ASC, rowid ASC",
                RUN_COLUMNS
            ),
            status.as_str(),
        )
    }

    fn query_runs(&self, sql: &str, param: &str) -> StoreResult<Vec<Run>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params![param], RunRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RunRow::into_run).collect()
    }

    /// Move a queued run to running and record where its manifest and log live
    pub fn set_running(&self, run_id: &str, manifest_path: &str, log_path: &str) -> StoreResult<Transition> {
        self.transition(run_id, RunStatus::Running, Some((manifest_path, log_path)))
    }

    /// Move a run to a terminal status
    ///
    /// A no-op (`Rejected`) if the run is already terminal, so a late writer
    /// never downgrades `cancelled` to `done` or `failed`.
    pub fn set_completed(&self, run_id: &str, status: RunStatus) -> StoreResult<Transition> {
        if !status.is_terminal() {
            debug!(%run_id, %status, "Store::set_completed: non-terminal status requested");
            let run = self.require_run(run_id)?;
            return Ok(Transition::Rejected(run));
        }
        self.transition(run_id, status, None)
    }

    /// Cancel a queued or running run
    pub fn request_cancel(&self, run_id: &str) -> StoreResult<Transition> {
        self.transition(run_id, RunStatus::Cancelled, None)
    }

    /// Attach artifact paths without touching the status
    pub fn set_paths(&self, run_id: &str, manifest_path: &str, log_path: &str) -> StoreResult<Run> {
        debug!(%run_id, %manifest_path, %log_path, "Store::set_paths: called");
        let changed = self.conn.execute(
            "UPDATE runs SET manifest_path = ?1, log_path = ?2 WHERE id = ?3",
            params![manifest_path, log_path, run_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("run {}", run_id)));
        }
        self.require_run(run_id)
    }

    /// The single guarded status write
    ///
    /// Applies `to` only when the run's current status is one of the legal
    /// sources for it, as one conditional `UPDATE`. Returns the record after the
    /// attempt either way.
    pub fn transition(&self, run_id: &str, to: RunStatus, paths: Option<(&str, &str)>) -> StoreResult<Transition> {
        debug!(%run_id, %to, ?paths, "Store::transition: called");
        let sources = RunStatus::sources_of(to);
        if sources.is_empty() {
            debug!(%run_id, %to, "Store::transition: no status may move to target");
            return Ok(Transition::Rejected(self.require_run(run_id)?));
        }

        // Status names are fixed enum literals, never caller input
        let source_list = sources
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let now = format_ts(crate::now());

        let changed = if to == RunStatus::Running {
            let (manifest_path, log_path) = match paths {
                Some((m, l)) => (Some(m), Some(l)),
                None => (None, None),
            };
            self.conn.execute(
                &format!(
                    "UPDATE runs SET status = ?1, started_at = ?2, \
                     manifest_path = COALESCE(?3, manifest_path), log_path = COALESCE(?4, log_path) \
                     WHERE id = ?5 AND status IN ({})",
                    source_list
                ),
                params![to.as_str(), now, manifest_path, log_path, run_id],
            )?
        } else {
            self.conn.execute(
                &format!(
                    "UPDATE runs SET status = ?1, completed_at = ?2 WHERE id = ?3 AND status IN ({})",
                    source_list
                ),
                params![to.as_str(), now, run_id],
            )?
        };

        let run = self.require_run(run_id)?;
        if changed == 1 {
            debug!(%run_id, %to, "Store::transition: applied");
            Ok(Transition::Applied(run))
        } else {
            debug!(%run_id, %to, current = %run.status, "Store::transition: rejected");
            Ok(Transition::Rejected(run))
        }
    }

    fn require_run(&self, run_id: &str) -> StoreResult<Run> {
        self.get_run(run_id)?
            .ok_or_else(|| StoreError::NotFound(format!("run {}", run_id)))
    }
}

fn plan_from_parts((id, title, artifacts, created_at): (String, String, String, String)) -> StoreResult<Plan> {
    let artifacts: Vec<String> = serde_json::from_str(&artifacts).map_err(|e| StoreError::Corrupt {
        id: id.clone(),
        reason: e.to_string(),
    })?;
    let created_at = parse_ts(&created_at).map_err(|reason| StoreError::Corrupt { id: id.clone(), reason })?;
    Ok(Plan {
        id,
        title,
        artifacts,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_with_plan() -> Store {
        let store = Store::open_in_memory().unwrap();
        store.create_plan(&Plan::new("p1", "Plan one")).unwrap();
        store
    }

    #[test]
    fn test_plan_roundtrip_with_artifacts() {
        let store = Store::open_in_memory().unwrap();
        let plan = Plan::new("p1", "Add search").with_artifact("docs/plans/p1/prd.md");
        store.create_plan(&plan).unwrap();

        let got = store.get_plan("p1").unwrap().unwrap();
        assert_eq!(got.title, "Add search");
        assert_eq!(got.artifacts, vec!["docs/plans/p1/prd.md".to_string()]);
        assert!(store.get_plan("missing").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_plan_rejected() {
        let store = store_with_plan();
        let err = store.create_plan(&Plan::new("p1", "again")).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[test]
    fn test_invalid_plan_id_rejected() {
        let store = Store::open_in_memory().unwrap();
        let err = store.create_plan(&Plan::new("../x", "bad")).unwrap_err();
        assert!(matches!(err, StoreError::InvalidId(_)));
    }

    #[test]
    fn test_create_run_is_queued() {
        let store = store_with_plan();
        let run = store.create_run("r1", "p1").unwrap();
        assert_eq!(run.status, RunStatus::Queued);
        assert!(run.manifest_path.is_none());
        assert!(run.log_path.is_none());
        assert!(run.started_at.is_none());
    }

    #[test]
    fn test_full_lifecycle() {
        let store = store_with_plan();
        store.create_run("r1", "p1").unwrap();

        let t = store.set_running("r1", "plans/p1/runs/r1/manifest.json", "plans/p1/runs/r1/execution.log").unwrap();
        assert!(t.applied());
        let run = t.into_run();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.started_at.is_some());
        assert_eq!(run.manifest_path.as_deref(), Some("plans/p1/runs/r1/manifest.json"));

        let t = store.set_completed("r1", RunStatus::Done).unwrap();
        assert!(t.applied());
        assert_eq!(t.run().status, RunStatus::Done);
        assert!(t.run().completed_at.is_some());
    }

    #[test]
    fn test_completion_never_downgrades_cancelled() {
        let store = store_with_plan();
        store.create_run("r1", "p1").unwrap();
        store.set_running("r1", "m", "l").unwrap();
        assert!(store.request_cancel("r1").unwrap().applied());

        let t = store.set_completed("r1", RunStatus::Done).unwrap();
        assert!(!t.applied());
        assert_eq!(t.run().status, RunStatus::Cancelled);

        let t = store.set_completed("r1", RunStatus::Failed).unwrap();
        assert!(!t.applied());
        assert_eq!(t.run().status, RunStatus::Cancelled);
    }

    #[test]
    fn test_running_not_resurrected_after_cancel() {
        let store = store_with_plan();
        store.create_run("r1", "p1").unwrap();
        assert!(store.request_cancel("r1").unwrap().applied());

        let t = store.set_running("r1", "m", "l").unwrap();
        assert!(!t.applied());
        assert_eq!(t.run().status, RunStatus::Cancelled);
        assert!(t.run().manifest_path.is_none());
    }

    #[test]
    fn test_cancel_terminal_is_noop() {
        let store = store_with_plan();
        store.create_run("r1", "p1").unwrap();
        store.set_running("r1", "m", "l").unwrap();
        let done = store.set_completed("r1", RunStatus::Done).unwrap().into_run();

        let first = store.request_cancel("r1").unwrap();
        let second = store.request_cancel("r1").unwrap();
        assert!(!first.applied());
        assert_eq!(first.run(), &done);
        assert_eq!(second.run(), &done);
    }

    #[test]
    fn test_done_from_queued_rejected() {
        let store = store_with_plan();
        store.create_run("r1", "p1").unwrap();
        let t = store.set_completed("r1", RunStatus::Done).unwrap();
        assert!(!t.applied());
        assert_eq!(t.run().status, RunStatus::Queued);
    }

    #[test]
    fn test_set_completed_with_non_terminal_is_rejected() {
        let store = store_with_plan();
        store.create_run("r1", "p1").unwrap();
        let t = store.set_completed("r1", RunStatus::Running).unwrap();
        assert!(!t.applied());
        assert_eq!(t.run().status, RunStatus::Queued);
    }

    #[test]
    fn test_transition_missing_run() {
        let store = store_with_plan();
        let err = store.request_cancel("nope").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_set_paths_keeps_status() {
        let store = store_with_plan();
        store.create_run("r1", "p1").unwrap();
        store.request_cancel("r1").unwrap();
        let run = store.set_paths("r1", "m.json", "e.log").unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(run.log_path.as_deref(), Some("e.log"));
    }

    #[test]
    fn test_list_for_plan_newest_first() {
        let store = store_with_plan();
        store.create_plan(&Plan::new("p2", "Other")).unwrap();
        store.create_run("r1", "p1").unwrap();
        store.create_run("r2", "p1").unwrap();
        store.create_run("r3", "p2").unwrap();

        let runs = store.list_for_plan("p1").unwrap();
        let ids: Vec<_> = runs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r2", "r1"]);
    }

    #[test]
    fn test_list_by_status_oldest_first() {
        let store = store_with_plan();
        store.create_run("r1", "p1").unwrap();
        store.create_run("r2", "p1").unwrap();
        store.create_run("r3", "p1").unwrap();
        store.set_running("r2", "m", "l").unwrap();

        let queued: Vec<_> = store
            .list_by_status(RunStatus::Queued)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(queued, vec!["r1".to_string(), "r3".to_string()]);
    }

    #[test]
    fn test_file_store_persists_across_reopen() {
        let temp = tempdir().unwrap();
        let db = temp.path().join("nested").join("runs.db");
        {
            let store = Store::open(&db).unwrap();
            store.create_plan(&Plan::new("p1", "Plan")).unwrap();
            store.create_run("r1", "p1").unwrap();
            store.request_cancel("r1").unwrap();
        }
        let store = Store::open(&db).unwrap();
        let run = store.get_run("r1").unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
        assert!(run.completed_at.is_some());
    }
}
