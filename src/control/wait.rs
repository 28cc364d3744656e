//! Sleep-poll waits with an abort check each tick.
//!
//! Hardware operations complete on their own schedule; the orchestrator
//! waits by re-checking a condition at a fixed tick. The abort flag is
//! consulted before every check, so a wait responds to an operator abort
//! within one tick. Most waits are unbounded (stepper motion can take
//! minutes); callers that do have a deadline pass a timeout.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use super::abort::{AbortFlag, AbortRequested};
use crate::points::PointError;

/// Why a wait ended without its condition becoming true.
#[derive(Debug, Error)]
pub enum WaitError {
    #[error(transparent)]
    Aborted(#[from] AbortRequested),

    #[error("timed out after {timeout:?} waiting for {what}")]
    TimedOut { what: String, timeout: Duration },

    #[error(transparent)]
    Point(#[from] PointError),
}

/// Polls `condition` every `tick` until it returns true.
///
/// The abort flag is checked before each poll, and the condition is checked
/// once before the first sleep, so an already-true condition never waits.
/// With `timeout = None` the wait is bounded only by the abort flag.
pub async fn wait_for<F, Fut>(
    abort: &AbortFlag,
    tick: Duration,
    timeout: Option<Duration>,
    what: &str,
    mut condition: F,
) -> Result<(), WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, PointError>>,
{
    let mut waited = Duration::ZERO;
    loop {
        abort.check()?;
        if condition().await? {
            return Ok(());
        }
        if let Some(limit) = timeout {
            if waited >= limit {
                return Err(WaitError::TimedOut {
                    what: what.to_string(),
                    timeout: limit,
                });
            }
        }
        tokio::time::sleep(tick).await;
        waited += tick;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    const TICK: Duration = Duration::from_millis(500);

    #[tokio::test(start_paused = true)]
    async fn returns_immediately_when_condition_already_true() {
        let abort = AbortFlag::new();
        let result = wait_for(&abort, TICK, None, "nothing", || async { Ok(true) }).await;
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_condition_becomes_true() {
        let abort = AbortFlag::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let result = wait_for(&abort, TICK, None, "third poll", move || {
            let count = calls_clone.fetch_add(1, Ordering::SeqCst);
            async move { Ok(count >= 2) }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_abort_wins_before_the_first_poll() {
        let abort = AbortFlag::new();
        abort.request();
        let result = wait_for(&abort, TICK, None, "anything", || async { Ok(true) }).await;
        assert!(matches!(result, Err(WaitError::Aborted(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn abort_is_observed_at_the_next_tick() {
        let abort = AbortFlag::new();
        let handle = abort.clone();
        let waiter = wait_for(&abort, TICK, None, "never", || async { Ok(false) });
        let aborter = async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            handle.request();
        };
        let (result, ()) = tokio::join!(waiter, aborter);
        assert!(matches!(result, Err(WaitError::Aborted(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_bounded() {
        let abort = AbortFlag::new();
        let result = wait_for(
            &abort,
            TICK,
            Some(Duration::from_secs(2)),
            "a condition that never holds",
            || async { Ok(false) },
        )
        .await;
        match result {
            Err(WaitError::TimedOut { what, timeout }) => {
                assert_eq!(what, "a condition that never holds");
                assert_eq!(timeout, Duration::from_secs(2));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn point_errors_propagate() {
        let abort = AbortFlag::new();
        let result = wait_for(&abort, TICK, None, "a broken point", || async {
            Err(PointError::Disconnected {
                name: "X".to_string(),
            })
        })
        .await;
        assert!(matches!(result, Err(WaitError::Point(_))));
    }
}
