use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

/// Bounded retry policy: at most `max_attempts` tries, `delay` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    /// Fixed-interval policy. A zero attempt count is clamped to one.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Retry without sleeping between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::fixed(max_attempts, Duration::ZERO)
    }
}

#[derive(Error, Debug)]
#[error("gave up after {attempts} attempts: {last}")]
pub struct RetryError<E: Display> {
    pub attempts: u32,
    pub last: E,
}

/// Run `op` until it succeeds or the policy is exhausted.
///
/// Always returns a result; exhaustion surfaces the last error alongside the
/// attempt count instead of panicking or rejecting out-of-band.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, op: F) -> Result<T, RetryError<E>>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_if(policy, op, |_| true).await
}

/// Like [`retry`], but an error rejected by `should_retry` stops the loop
/// immediately, surfacing the attempts used so far.
pub async fn retry_if<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    mut op: F,
    mut should_retry: P,
) -> Result<T, RetryError<E>>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
{
    let mut last = None;

    for attempt in 1..=policy.max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                debug!("attempt {}/{} failed: {}", attempt, policy.max_attempts, e);
                if !should_retry(&e) {
                    return Err(RetryError { attempts: attempt, last: e });
                }
                last = Some(e);
            }
        }

        if attempt < policy.max_attempts && !policy.delay.is_zero() {
            tokio::time::sleep(policy.delay).await;
        }
    }

    Err(RetryError {
        attempts: policy.max_attempts,
        // max_attempts >= 1, so at least one attempt ran
        last: last.expect("retry ran zero attempts"),
    })
}
