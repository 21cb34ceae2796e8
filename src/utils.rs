use std::{fmt::Display, future::Future};

use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

use crate::{context::RequestContext, error::Interrupted, models::retry::RetryConfig};

/// Runs `operation` until it succeeds, fails with an error `is_retryable`
/// rejects, or `config.max_attempts` is reached. Attempts and backoff sleeps
/// are bound to `ctx`: once it is cancelled or past its deadline no further
/// attempt starts and the interruption is returned.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    config: &RetryConfig,
    ctx: &RequestContext,
    is_retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display + From<Interrupted>,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        let outcome = ctx.guard(operation()).await.map_err(E::from)?;

        match outcome {
            Ok(result) => {
                if attempt > 1 {
                    info!(attempt, max_attempts, "Retry succeeded");
                }
                return Ok(result);
            }
            Err(e) => {
                if !is_retryable(&e) {
                    debug!(attempt, error = %e, "Operation failed with non-retryable error");
                    return Err(e);
                }

                if attempt >= max_attempts {
                    warn!(
                        max_attempts,
                        error = %e,
                        "Retry failed after exhausting all attempts"
                    );
                    return Err(e);
                }

                let delay = backoff_delay(config, attempt - 1);

                debug!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retry attempt failed, backing off"
                );

                ctx.guard(sleep(delay)).await.map_err(E::from)?;
            }
        }
    }
}

/// Scheduled delay plus up to 10% of positive jitter, so no retry starts
/// earlier than `delay_for_attempt` prescribes.
fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let delay = config.delay_for_attempt(attempt);

    if !config.jitter {
        return delay;
    }

    let jitter: f64 = rand::random_range(0.0..=0.1);
    delay.mul_f64(1.0 + jitter)
}
