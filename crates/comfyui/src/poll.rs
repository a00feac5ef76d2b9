//! Deadline-bounded completion polling.
//!
//! ComfyUI never pushes completion over HTTP, so the renderer asks the
//! history endpoint on a fixed interval. A failed poll is transient: it
//! is logged and retried. Only the overall deadline ends the wait.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::RenderError;

/// Default interval between history polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Default overall render deadline (one hour).
pub const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_secs(3600);

/// Whether a `/history/{id}` response marks `job_id` as finished.
///
/// The server returns `{}` for unknown or unfinished prompts and a
/// mapping keyed by the prompt id once it has run.
pub fn history_contains(history: &serde_json::Value, job_id: &str) -> bool {
    history
        .as_object()
        .is_some_and(|entries| entries.contains_key(job_id))
}

/// Call `poll` every `interval` until it reports `true` or `timeout`
/// elapses.
///
/// Each call is itself bounded by the time left before the deadline, so
/// a hung request cannot stretch the wait past `timeout`.
pub async fn wait_for_completion<F, Fut, E>(
    job_id: &str,
    timeout: Duration,
    interval: Duration,
    mut poll: F,
) -> Result<(), RenderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    E: Display,
{
    let deadline = Instant::now() + timeout;
    let mut attempt = 0u64;

    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        attempt += 1;

        match tokio::time::timeout(deadline - now, poll()).await {
            Ok(Ok(true)) => {
                tracing::debug!(job_id, attempt, "Job reported complete");
                return Ok(());
            }
            Ok(Ok(false)) => {}
            Ok(Err(e)) => {
                tracing::warn!(job_id, attempt, error = %e, "History poll failed, retrying");
            }
            Err(_) => break,
        }

        let now = Instant::now();
        if now >= deadline {
            break;
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }

    tracing::error!(job_id, timeout_secs = timeout.as_secs(), "Job did not complete in time");
    Err(RenderError::Timeout {
        job_id: job_id.to_string(),
        timeout,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn history_contains_requires_job_key() {
        assert!(history_contains(&json!({"abc": {"outputs": {}}}), "abc"));
        assert!(!history_contains(&json!({}), "abc"));
        assert!(!history_contains(&json!({"other": {}}), "abc"));
        assert!(!history_contains(&json!(["abc"]), "abc"));
    }

    #[tokio::test(start_paused = true)]
    async fn completes_once_poll_reports_done() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let result = wait_for_completion(
            "job",
            Duration::from_secs(60),
            Duration::from_secs(3),
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, String>(n >= 2) }
            },
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let result = wait_for_completion(
            "job",
            Duration::from_secs(60),
            Duration::from_secs(3),
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("connection reset".to_string())
                    } else {
                        Ok(true)
                    }
                }
            },
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_never_complete() {
        let result = wait_for_completion(
            "job-7",
            Duration::from_secs(10),
            Duration::from_secs(3),
            || async { Ok::<_, String>(false) },
        )
        .await;

        assert_matches!(result, Err(RenderError::Timeout { job_id, .. }) if job_id == "job-7");
    }

    #[tokio::test(start_paused = true)]
    async fn hung_poll_is_cut_off_at_deadline() {
        let started = Instant::now();
        let result = wait_for_completion(
            "job",
            Duration::from_secs(5),
            Duration::from_secs(1),
            || async {
                tokio::time::sleep(Duration::from_secs(600)).await;
                Ok::<_, String>(true)
            },
        )
        .await;

        assert_matches!(result, Err(RenderError::Timeout { .. }));
        assert!(started.elapsed() <= Duration::from_secs(6));
    }
}
