//! Request pacing and retry with exponential backoff.
//!
//! Both wait through `tokio::select!` against the run's cancellation token,
//! so a stop signal never sits behind a sleep.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;

/// Upper bound on a server-requested `Retry-After` we are willing to honor.
const MAX_RETRY_AFTER_SECS: u64 = 60;

/// Enforces a minimum interval between consecutive requests of one adapter.
#[derive(Debug)]
pub(crate) struct Pacer {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl Pacer {
    pub(crate) fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    /// Wait until the next request may go out, then claim the slot.
    pub(crate) async fn wait(&self, cancel: &CancellationToken) -> Result<(), FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.min_interval;
            if ready_at > Instant::now() {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(FetchError::Cancelled),
                    () = tokio::time::sleep_until(ready_at) => {}
                }
            }
        }
        *last = Some(Instant::now());
        Ok(())
    }
}

/// Backoff before retry number `attempt + 1`: `base * 2^attempt` seconds,
/// scaled by a random factor in `[0.75, 1.25)`.
fn backoff_delay(backoff_base_secs: u64, attempt: u32) -> Duration {
    let base_ms = backoff_base_secs
        .saturating_mul(1000)
        .saturating_mul(1u64 << attempt.min(32));
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let jittered = (base_ms as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64;
    Duration::from_millis(jittered)
}

/// Executes `operation`, retrying retryable [`FetchError`]s up to
/// `max_retries` additional times.
///
/// A 429 carrying `Retry-After` waits at least that long (capped at
/// [`MAX_RETRY_AFTER_SECS`]). Non-retryable errors, timeouts and
/// cancellation return immediately.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    max_retries: u32,
    backoff_base_secs: u64,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 0u32;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !err.is_retryable() || err.is_timeout() || attempt >= max_retries {
            return Err(err);
        }

        let mut delay = backoff_delay(backoff_base_secs, attempt);
        if let FetchError::RateLimited {
            retry_after_secs: Some(secs),
            ..
        } = &err
        {
            delay = delay.max(Duration::from_secs((*secs).min(MAX_RETRY_AFTER_SECS)));
        }

        tracing::warn!(
            attempt,
            max_retries,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "transient fetch error, retrying after backoff"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(FetchError::Cancelled),
            () = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}
