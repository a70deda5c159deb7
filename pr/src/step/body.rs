//! Step bodies
//!
//! A body is the work a step performs. It receives a [`CancelProbe`] and is
//! expected to poll it and return early once it fires.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::cancel::CancelProbe;
use crate::error::StepError;

/// Work performed by one step attempt
#[async_trait]
pub trait StepBody: Send + Sync {
    /// Run one attempt
    ///
    /// Return `Err(StepError::Cancelled)` (or `Ok`) after observing the probe fire.
    async fn run(&self, probe: CancelProbe) -> Result<(), StepError>;
}

/// Body built from an async closure
pub struct FnStep<F> {
    f: F,
}

impl<F> FnStep<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> StepBody for FnStep<F>
where
    F: Fn(CancelProbe) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), StepError>> + Send + 'static,
{
    async fn run(&self, probe: CancelProbe) -> Result<(), StepError> {
        (self.f)(probe).await
    }
}

/// Body built from a blocking closure, run on the blocking pool
pub struct BlockingStep<F> {
    f: Arc<F>,
}

impl<F> BlockingStep<F> {
    pub fn new(f: F) -> Self {
        Self { f: Arc::new(f) }
    }
}

#[async_trait]
impl<F> StepBody for BlockingStep<F>
where
    F: Fn(&CancelProbe) -> Result<(), StepError> + Send + Sync + 'static,
{
    async fn run(&self, probe: CancelProbe) -> Result<(), StepError> {
        let f = Arc::clone(&self.f);
        match tokio::task::spawn_blocking(move || f(&probe)).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(StepError::from_panic(e.into_panic())),
            Err(e) => Err(StepError::failed(e.to_string())),
        }
    }
}

/// Body that stays busy for a fixed time, polling for cancellation
#[derive(Debug, Clone)]
pub struct BusyStep {
    duration: Duration,
    poll_interval: Duration,
}

impl BusyStep {
    pub fn new(duration: Duration, poll_interval: Duration) -> Self {
        Self {
            duration,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }
}

#[async_trait]
impl StepBody for BusyStep {
    async fn run(&self, probe: CancelProbe) -> Result<(), StepError> {
        let deadline = Instant::now() + self.duration;
        loop {
            if probe.should_cancel() {
                return Err(StepError::Cancelled);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            tokio::time::sleep(self.poll_interval.min(remaining)).await;
        }
    }
}
