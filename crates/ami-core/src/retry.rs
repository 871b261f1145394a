//! Retry with exponential backoff
//!
//! Used by the connection to re-establish a dropped session. Only errors for
//! which [`AmiError::is_recoverable`] holds are retried; authentication
//! failures and other protocol errors end the loop immediately.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::config::ReconnectConfig;
use crate::error::AmiResult;

/// Delay before the attempt following one that waited `delay`
pub fn next_delay(delay: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (delay.as_millis() as f64 * config.backoff_multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay())
}

/// Apply up to ±10% jitter when enabled
pub fn jittered(delay: Duration, config: &ReconnectConfig) -> Duration {
    if !config.use_jitter {
        return delay;
    }
    let jitter = (rand::random::<f64>() - 0.5) * 0.2;
    let millis = delay.as_millis() as f64;
    Duration::from_millis((millis * (1.0 + jitter)) as u64)
}

/// Run `operation` until it succeeds, fails unrecoverably, or the attempt
/// budget is spent.
pub async fn retry_with_backoff<T, F, Fut>(
    operation_name: &str,
    config: &ReconnectConfig,
    mut operation: F,
) -> AmiResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AmiResult<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    let mut delay = config.initial_delay();

    loop {
        attempt += 1;
        debug!(operation = operation_name, attempt, max_attempts, "Attempting operation");

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "Operation succeeded after retries");
                }
                return Ok(result);
            }
            Err(e) if e.is_recoverable() && attempt < max_attempts => {
                warn!(
                    operation = operation_name,
                    attempt,
                    error = %e,
                    category = e.category(),
                    next_delay_ms = delay.as_millis() as u64,
                    "Recoverable error, will retry"
                );
                sleep(jittered(delay, config)).await;
                delay = next_delay(delay, config);
            }
            Err(e) => {
                if attempt >= max_attempts {
                    error!(operation = operation_name, attempts = attempt, error = %e, "Operation failed after all retry attempts");
                } else {
                    error!(operation = operation_name, error = %e, category = e.category(), "Non-recoverable error, not retrying");
                }
                return Err(e);
            }
        }
    }
}
