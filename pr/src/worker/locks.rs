//! Per-plan mutual exclusion

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

type LockMap = HashMap<String, Arc<AsyncMutex<()>>>;

/// At most one run per plan executes at a time
///
/// Entries exist only while a worker holds or waits for a plan.
#[derive(Debug, Default)]
pub struct PlanLocks {
    locks: Mutex<LockMap>,
}

impl PlanLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, LockMap> {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait for exclusive access to `plan_id`; released when the guard drops
    pub async fn acquire(&self, plan_id: &str) -> PlanGuard<'_> {
        let lock = Arc::clone(self.map().entry(plan_id.to_string()).or_default());
        debug!(%plan_id, "PlanLocks::acquire: waiting");
        let guard = Arc::clone(&lock).lock_owned().await;
        PlanGuard {
            locks: self,
            plan_id: plan_id.to_string(),
            lock,
            guard: Some(guard),
        }
    }
}

/// Exclusive hold on one plan
#[derive(Debug)]
pub struct PlanGuard<'a> {
    locks: &'a PlanLocks,
    plan_id: String,
    lock: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PlanGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = self.locks.map();
        // The map and this guard are the only holders: nobody is waiting
        if Arc::strong_count(&self.lock) == 2 {
            map.remove(&self.plan_id);
            debug!(plan_id = %self.plan_id, "PlanGuard::drop: released last holder");
        }
    }
}
