use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::chain::ChainError;

/// Sleep for `duration` unless cancelled first. Returns `false` on cancellation.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;

        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Retry a chain read with a fixed delay until it succeeds
///
/// Chain errors are transient, so there is no attempt limit. Returns `None`
/// only when cancelled.
pub async fn retry_transient<T, F, Fut>(
    what: &str,
    delay: Duration,
    cancel: &CancellationToken,
    mut op: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ChainError>>,
{
    let mut attempt = 1u64;
    loop {
        if cancel.is_cancelled() {
            return None;
        }
        match op().await {
            Ok(value) => return Some(value),
            Err(e) => {
                warn!(attempt, error = %e, "{} failed, retrying in {:?}", what, delay);
                if !sleep_or_cancel(delay, cancel).await {
                    return None;
                }
                attempt += 1;
            }
        }
    }
}
