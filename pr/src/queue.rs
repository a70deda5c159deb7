//! In-memory FIFO of runs awaiting execution

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tracing::debug;

use crate::error::{OrchestratorError, OrchestratorResult};

/// A run waiting for a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedRun {
    pub plan_id: String,
    pub run_id: String,
}

impl QueuedRun {
    pub fn new(plan_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.into(),
            run_id: run_id.into(),
        }
    }
}

/// Unbounded FIFO shared by every worker
///
/// Enqueue never blocks. Consumers take turns on the receiver, so each item
/// is handed to exactly one of them.
#[derive(Debug)]
pub struct RunQueue {
    tx: Mutex<Option<mpsc::UnboundedSender<QueuedRun>>>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<QueuedRun>>,
    len: AtomicUsize,
}

impl Default for RunQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RunQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: AsyncMutex::new(rx),
            len: AtomicUsize::new(0),
        }
    }

    /// Append a run; fails only once the queue is closed
    pub fn enqueue(&self, plan_id: &str, run_id: &str) -> OrchestratorResult<()> {
        debug!(%plan_id, %run_id, "RunQueue::enqueue: called");
        let guard = self.tx.lock().map_err(|_| OrchestratorError::ShuttingDown)?;
        let tx = guard.as_ref().ok_or(OrchestratorError::ShuttingDown)?;
        self.len.fetch_add(1, Ordering::SeqCst);
        if tx.send(QueuedRun::new(plan_id, run_id)).is_err() {
            self.len.fetch_sub(1, Ordering::SeqCst);
            return Err(OrchestratorError::ShuttingDown);
        }
        Ok(())
    }

    /// Wait for the next run; `None` once closed and drained
    pub async fn dequeue(&self) -> Option<QueuedRun> {
        let mut rx = self.rx.lock().await;
        let item = rx.recv().await;
        if let Some(ref queued) = item {
            self.len.fetch_sub(1, Ordering::SeqCst);
            debug!(plan_id = %queued.plan_id, run_id = %queued.run_id, "RunQueue::dequeue: handed out");
        }
        item
    }

    /// Runs waiting to be picked up
    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting runs; queued ones are still handed out
    pub fn close(&self) {
        debug!("RunQueue::close: called");
        if let Ok(mut guard) = self.tx.lock() {
            guard.take();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().map(|g| g.is_none()).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = RunQueue::new();
        for i in 0..5 {
            queue.enqueue("p1", &format!("r{}", i)).unwrap();
        }
        assert_eq!(queue.len(), 5);
        for i in 0..5 {
            assert_eq!(queue.dequeue().await, Some(QueuedRun::new("p1", format!("r{}", i))));
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_enqueue() {
        let queue = Arc::new(RunQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        queue.enqueue("p1", "r1").unwrap();
        let got = tokio::time::timeout(Duration::from_secs(1), consumer).await.unwrap().unwrap();
        assert_eq!(got, Some(QueuedRun::new("p1", "r1")));
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let queue = RunQueue::new();
        queue.enqueue("p1", "r1").unwrap();
        queue.close();
        assert!(queue.is_closed());
        assert!(matches!(queue.enqueue("p1", "r2"), Err(OrchestratorError::ShuttingDown)));

        assert_eq!(queue.dequeue().await, Some(QueuedRun::new("p1", "r1")));
        assert_eq!(queue.dequeue().await, None);
    }

    #[tokio::test]
    async fn test_each_item_goes_to_one_consumer() {
        let queue = Arc::new(RunQueue::new());
        for i in 0..20 {
            queue.enqueue("p1", &format!("r{}", i)).unwrap();
        }
        queue.close();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(item) = queue.dequeue().await {
                    got.push(item.run_id);
                }
                got
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 20);
    }
}
