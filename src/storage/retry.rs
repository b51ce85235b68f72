//! Retry with capped exponential back-off for transient store contention.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use super::store::StorageError;

/// Delay before the first retry.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(150);

/// Delay doubles per attempt, up to this many attempts in total.
pub const MAX_ATTEMPTS: u32 = 8;

/// Run `op`, retrying on [`StorageError::Busy`] with exponential back-off
/// (150 ms initial, ×2 per attempt, 8 attempts). Any other outcome — success
/// or hard failure — returns immediately.
pub async fn with_backoff<T, F, Fut>(mut op: F) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let mut delay = INITIAL_BACKOFF;

    for attempt in 1..=MAX_ATTEMPTS {
        match op().await {
            Err(err) if err.is_busy() && attempt < MAX_ATTEMPTS => {
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Store busy, backing off");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            other => return other,
        }
    }
    Err(StorageError::Busy)
}
