//! Step runner

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cancel::CancelSignal;
use crate::error::StepError;
use crate::manifest::LogSink;

use super::body::StepBody;
use super::policy::StepPolicy;
use super::result::{StepResult, StepStatus};

enum Attempt {
    Finished(Result<(), StepError>),
    TimedOut,
}

/// Run one step to a final [`StepResult`]
///
/// Each attempt runs `body` on its own task bounded by `policy.timeout`. A
/// timed-out attempt has its token cancelled and is left to finish on its own.
/// Failures and timeouts are retried with exponential backoff; cancellation
/// never is.
pub async fn run_step(
    name: &str,
    body: Arc<dyn StepBody>,
    policy: &StepPolicy,
    log: &dyn LogSink,
    signal: &CancelSignal,
) -> StepResult {
    debug!(%name, ?policy, "run_step: called");
    let mut result = StepResult::started(name);
    let allowed = policy.attempts();

    for attempt in 1..=allowed {
        if signal.is_raised() {
            debug!(%name, attempt, "run_step: cancelled before attempt");
            result.attempts = attempt - 1;
            log.line(&format!("[{}] cancelled before attempt {}", name, attempt));
            return result.finish(StepStatus::Cancelled);
        }

        result.attempts = attempt;
        let token = CancellationToken::new();
        let outcome = run_attempt(Arc::clone(&body), signal, &token, policy).await;

        match outcome {
            Attempt::TimedOut => {
                token.cancel();
                result.timed_out = true;
                warn!(%name, attempt, timeout = ?policy.timeout, "Step attempt timed out");
                log.line(&format!(
                    "[{}] attempt {} timed out after {}s",
                    name,
                    attempt,
                    policy.timeout.as_secs_f64()
                ));
                if attempt == allowed {
                    return result.finish(StepStatus::Timeout);
                }
            }
            Attempt::Finished(Err(StepError::Cancelled)) => {
                debug!(%name, attempt, "run_step: body stopped on cancellation");
                log.line(&format!("[{}] attempt {} cancelled", name, attempt));
                return result.finish(StepStatus::Cancelled);
            }
            Attempt::Finished(Err(e)) => {
                warn!(%name, attempt, error = %e, "Step attempt failed");
                log.line(&format!("[{}] attempt {} error: {}", name, attempt, e));
                if attempt == allowed {
                    result.error = Some(e.to_string());
                    return result.finish(StepStatus::Error);
                }
            }
            Attempt::Finished(Ok(())) => {
                if signal.is_raised() {
                    debug!(%name, attempt, "run_step: body returned after cancellation");
                    log.line(&format!("[{}] attempt {} cancelled", name, attempt));
                    return result.finish(StepStatus::Cancelled);
                }
                info!(%name, attempt, "Step completed");
                log.line(&format!("[{}] attempt {} ok", name, attempt));
                return result.finish(StepStatus::Completed);
            }
        }

        // Skip the sleep when already cancelled; the loop head records it
        if !signal.is_raised() {
            let delay = policy.backoff_after(attempt);
            debug!(%name, attempt, ?delay, "run_step: backing off");
            tokio::time::sleep(delay).await;
        }
    }

    // Unreachable with attempts() >= 1
    result.error = Some("step runner exhausted without an outcome".to_string());
    result.finish(StepStatus::Error)
}

async fn run_attempt(
    body: Arc<dyn StepBody>,
    signal: &CancelSignal,
    token: &CancellationToken,
    policy: &StepPolicy,
) -> Attempt {
    let probe = signal.probe(token.clone());
    let handle = tokio::spawn(async move { body.run(probe).await });

    // Dropping the handle on timeout detaches the task
    match tokio::time::timeout(policy.timeout, handle).await {
        Err(_) => Attempt::TimedOut,
        Ok(Ok(result)) => Attempt::Finished(result),
        Ok(Err(e)) if e.is_panic() => Attempt::Finished(Err(StepError::from_panic(e.into_panic()))),
        Ok(Err(e)) => Attempt::Finished(Err(StepError::failed(e.to_string()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelProbe;
    use crate::manifest::MemoryLog;
    use crate::step::{BlockingStep, BusyStep, FnStep};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    fn policy(timeout_ms: u64, retries: u32, backoff_ms: u64) -> StepPolicy {
        StepPolicy::new(
            Duration::from_millis(timeout_ms),
            retries,
            Duration::from_millis(backoff_ms),
        )
    }

    /// Body that fails until its `succeed_on`-th call
    fn flaky(succeed_on: u32) -> (Arc<dyn StepBody>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let body = FnStep::new(move |_probe: CancelProbe| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < succeed_on {
                    Err(StepError::failed(format!("boom {}", n)))
                } else {
                    Ok(())
                }
            }
        });
        (Arc::new(body), calls)
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let log = MemoryLog::new();
        let (body, calls) = flaky(1);
        let result = run_step("prepare", body, &policy(1_000, 0, 10), &log, &CancelSignal::detached()).await;

        assert_eq!(result.status, StepStatus::Completed);
        assert_eq!(result.attempts, 1);
        assert!(!result.timed_out);
        assert!(result.ended_at.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(log.lines(), vec!["[prepare] attempt 1 ok".to_string()]);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let log = MemoryLog::new();
        let (body, _) = flaky(2);
        let result = run_step("retry-demo", body, &policy(1_000, 1, 10), &log, &CancelSignal::detached()).await;

        assert_eq!(result.status, StepStatus::Completed);
        assert_eq!(result.attempts, 2);
        assert!(result.error.is_none());
        let lines = log.lines();
        assert_eq!(lines.iter().filter(|l| l.contains("error:")).count(), 1);
        assert_eq!(lines.iter().filter(|l| l.ends_with(" ok")).count(), 1);
        assert!(lines[0].starts_with("[retry-demo] attempt 1 error: boom 1"));
        assert_eq!(lines[1], "[retry-demo] attempt 2 ok");
    }

    #[tokio::test]
    async fn test_succeeds_on_last_allowed_attempt() {
        let log = MemoryLog::new();
        let (body, calls) = flaky(4);
        let result = run_step("step", body, &policy(1_000, 3, 1), &log, &CancelSignal::detached()).await;
        assert_eq!(result.status, StepStatus::Completed);
        assert_eq!(result.attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_errors_exhaust_retries() {
        let log = MemoryLog::new();
        let (body, _) = flaky(u32::MAX);
        let result = run_step("step", body, &policy(1_000, 2, 1), &log, &CancelSignal::detached()).await;

        assert_eq!(result.status, StepStatus::Error);
        assert_eq!(result.attempts, 3);
        assert_eq!(result.error.as_deref(), Some("boom 3"));
        assert_eq!(log.lines().len(), 3);
    }

    #[tokio::test]
    async fn test_every_attempt_times_out() {
        let log = MemoryLog::new();
        let abandoned = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&abandoned);
        let body = FnStep::new(move |probe: CancelProbe| {
            let seen = Arc::clone(&seen);
            async move {
                loop {
                    if probe.attempt_abandoned() {
                        seen.store(true, Ordering::SeqCst);
                        return Ok::<(), StepError>(());
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
        });

        let result = run_step("slow", Arc::new(body), &policy(30, 1, 5), &log, &CancelSignal::detached()).await;

        assert_eq!(result.status, StepStatus::Timeout);
        assert_eq!(result.attempts, 2);
        assert!(result.timed_out);
        let lines = log.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "[slow] attempt 1 timed out after 0.03s");

        // Abandoned attempts see their token fire
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(abandoned.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let log = MemoryLog::new();
        let signal = CancelSignal::detached();
        signal.raise_local();
        let (body, calls) = flaky(1);

        let result = run_step("prepare", body, &policy(1_000, 2, 10), &log, &signal).await;
        assert_eq!(result.status, StepStatus::Cancelled);
        assert_eq!(result.attempts, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(log.lines(), vec!["[prepare] cancelled before attempt 1".to_string()]);
    }

    #[tokio::test]
    async fn test_cancel_mid_step_is_not_retried() {
        let log = MemoryLog::new();
        let signal = CancelSignal::detached();
        let body: Arc<dyn StepBody> = Arc::new(BusyStep::new(Duration::from_secs(10), Duration::from_millis(5)));

        let raiser = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            raiser.raise_local();
        });

        let result = run_step("generate", body, &policy(5_000, 3, 10), &log, &signal).await;
        assert_eq!(result.status, StepStatus::Cancelled);
        assert_eq!(result.attempts, 1);
        assert_eq!(log.lines(), vec!["[generate] attempt 1 cancelled".to_string()]);
    }

    #[tokio::test]
    async fn test_body_returning_ok_after_cancel_counts_as_cancelled() {
        let log = MemoryLog::new();
        let signal = CancelSignal::detached();
        let raiser = signal.clone();
        let body = FnStep::new(move |_probe: CancelProbe| {
            raiser.raise_local();
            async { Ok::<(), StepError>(()) }
        });

        let result = run_step("finalize", Arc::new(body), &policy(1_000, 0, 10), &log, &signal).await;
        assert_eq!(result.status, StepStatus::Cancelled);
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_stops_retries() {
        let log = MemoryLog::new();
        let signal = CancelSignal::detached();
        let raiser = signal.clone();
        let body = FnStep::new(move |_probe: CancelProbe| {
            raiser.raise_local();
            async { Err::<(), _>(StepError::failed("transient")) }
        });

        let result = run_step("step", Arc::new(body), &policy(1_000, 5, 10), &log, &signal).await;
        assert_eq!(result.status, StepStatus::Cancelled);
        assert_eq!(result.attempts, 1);
        assert_eq!(
            log.lines(),
            vec![
                "[step] attempt 1 error: transient".to_string(),
                "[step] cancelled before attempt 2".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_panicking_body_is_an_error() {
        let log = MemoryLog::new();
        let body = BlockingStep::new(|_probe: &CancelProbe| -> Result<(), StepError> { panic!("bad step") });
        let result = run_step("explode", Arc::new(body), &policy(1_000, 0, 10), &log, &CancelSignal::detached()).await;

        assert_eq!(result.status, StepStatus::Error);
        assert_eq!(result.error.as_deref(), Some("panicked: bad step"));
    }
}
