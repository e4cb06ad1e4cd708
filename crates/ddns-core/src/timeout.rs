//! Bounded, cancellable execution of outbound calls

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Per-call budget for REST backends
pub const REST_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-exchange budget for RFC2136 servers
pub const DNS_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(3);

/// Budget for a third-party address lookup
pub const DETECTION_TIMEOUT: Duration = Duration::from_secs(3);

/// Run `fut` until it completes, `limit` elapses, or `ctx` is cancelled
///
/// # Parameters
///
/// - `ctx`: Caller's cancellation token
/// - `limit`: Wall-clock budget for this call
/// - `operation`: Label used in the resulting error
///
/// # Returns
///
/// The future's own result, [`Error::Cancelled`] or [`Error::Timeout`].
pub async fn bounded<T, F>(
    ctx: &CancellationToken,
    limit: Duration,
    operation: &str,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(Error::cancelled(operation)),
        outcome = tokio::time::timeout(limit, fut) => match outcome {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(operation, limit)),
        },
    }
}

/// Sleep for `delay` unless `ctx` is cancelled first
pub async fn pause(ctx: &CancellationToken, delay: Duration) -> Result<()> {
    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(Error::cancelled("pause")),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
