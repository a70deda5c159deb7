//! Worker pool
//!
//! `count` workers share one [`RunQueue`]. A per-plan lock keeps runs of the
//! same plan from overlapping; runs of different plans proceed in parallel.

mod executor;
mod locks;
mod pipeline;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use executor::{Worker, WorkerContext};
pub use locks::{PlanGuard, PlanLocks};
pub use pipeline::{ConfigPipeline, PipelineSource, PlannedStep};

use crate::queue::RunQueue;

/// Spawn `count` workers draining `queue`
pub fn spawn_workers(
    count: usize,
    ctx: WorkerContext,
    queue: Arc<RunQueue>,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let count = count.max(1);
    info!(count, "Spawning workers");
    (0..count)
        .map(|id| {
            let worker = Worker::new(id, ctx.clone(), Arc::clone(&queue), shutdown.clone());
            tokio::spawn(worker.run())
        })
        .collect()
}
