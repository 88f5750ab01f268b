use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the `attempt`-th failure (1-based): base, 2×base,
    /// 4×base, ... capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1_u32 << shift)
            .min(self.max_delay)
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Cancellation was observed. Never wraps the operation's own error.
    #[error("operation aborted")]
    Aborted,

    /// The operation failed and was not retried further.
    #[error("operation failed after {attempts} attempt(s): {error}")]
    Failed { attempts: u32, error: E },
}

impl<E> RetryError<E> {
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Aborted => None,
            Self::Failed { error, .. } => Some(error),
        }
    }
}

/// Run `operation` until it succeeds, a non-retryable error comes back,
/// `policy.max_attempts` is reached, or `cancel` fires.
///
/// `operation` receives the 1-based attempt number. `on_retry` is called
/// with the failed attempt number and its error before the backoff wait;
/// it may cancel the token, in which case no further attempt runs.
pub async fn run_with_retry<T, E, Op, Fut, R, H>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: Op,
    is_retryable: R,
    on_retry: H,
) -> Result<T, RetryError<E>>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    H: FnMut(u32, &E),
{
    run_with_retry_and_sleep(
        policy,
        cancel,
        tokio::time::sleep,
        operation,
        is_retryable,
        on_retry,
    )
    .await
}

/// [`run_with_retry`] with a caller-supplied sleep.
pub async fn run_with_retry_and_sleep<T, E, Op, Fut, S, SFut, R, H>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    sleep: S,
    mut operation: Op,
    is_retryable: R,
    mut on_retry: H,
) -> Result<T, RetryError<E>>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    S: Fn(Duration) -> SFut,
    SFut: Future<Output = ()>,
    R: Fn(&E) -> bool,
    H: FnMut(u32, &E),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Aborted);
        }

        let error = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if cancel.is_cancelled() {
            return Err(RetryError::Aborted);
        }
        if !is_retryable(&error) || attempt >= max_attempts {
            return Err(RetryError::Failed {
                attempts: attempt,
                error,
            });
        }

        on_retry(attempt, &error);
        let delay = policy.delay_for(attempt);
        tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying after backoff");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Aborted),
            _ = sleep(delay) => {}
        }
        attempt += 1;
    }
}
