//! Deadline racing for dispatched tasks

use std::future::Future;
use std::time::Duration;

use crate::error::PoolError;

/// Race `operation` against a deadline of `timeout_ms` milliseconds.
///
/// A timeout of zero means no limit: the operation is awaited directly and
/// no timer is created. Otherwise the first of {outcome, deadline} wins;
/// the timer is released on both paths, and on expiry the operation is
/// abandoned where it stands — terminating the resource behind it is the
/// caller's job, since the worker context cannot be interrupted
/// cooperatively.
pub async fn race_with_timeout<T>(
    operation: impl Future<Output = Result<T, PoolError>>,
    timeout_ms: u64,
) -> Result<T, PoolError> {
    if timeout_ms == 0 {
        return operation.await;
    }

    match tokio::time::timeout(Duration::from_millis(timeout_ms), operation).await {
        Ok(outcome) => outcome,
        Err(_elapsed) => Err(PoolError::Timeout),
    }
}
