//! Fixed-interval retry with an overall time budget.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep, timeout};
use tracing::warn;

/// Interval between stack status reads while watching a create or delete.
pub const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Interval between application readiness probes.
pub const READINESS_POLL_INTERVAL: Duration = Duration::from_secs(20);

/// Successful result of [`retry_until`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RetryOutcome<T> {
    /// Value returned by the first successful attempt.
    pub value: T,
    /// Wall-clock time from the start of the loop to that success.
    pub elapsed: Duration,
}

/// Errors returned by [`retry_until`].
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum RetryError {
    /// The operation never succeeded within the budget.
    #[error("timeout exceeded after {}s", elapsed.as_secs())]
    Timeout {
        /// Time spent before giving up; never less than the budget.
        elapsed: Duration,
    },
}

/// Calls `operation` every `interval` until it succeeds or `budget` elapses.
///
/// The first attempt runs after one interval. Every failure is logged with a
/// local `HH:MM:SS` timestamp and treated as "not ready yet". Only one
/// attempt is in flight at a time; when the budget expires mid-attempt that
/// attempt is dropped.
///
/// # Errors
///
/// Returns [`RetryError::Timeout`] when no attempt succeeded in time.
pub async fn retry_until<F, Fut, T, E>(
    mut operation: F,
    budget: Duration,
    interval: Duration,
) -> Result<RetryOutcome<T>, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let started = Instant::now();
    let attempts = async {
        loop {
            sleep(interval).await;
            match operation().await {
                Ok(value) => {
                    return RetryOutcome {
                        value,
                        elapsed: started.elapsed(),
                    };
                }
                Err(err) => {
                    let stamp = chrono::Local::now().format("%H:%M:%S");
                    warn!("  {stamp} {err}");
                }
            }
        }
    };

    timeout(budget, attempts)
        .await
        .map_err(|_| RetryError::Timeout {
            elapsed: started.elapsed(),
        })
}
