//! Timeout + cancellation wrapper for collaborator calls

use crate::error::{AppError, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Run `fut` until it finishes, `timeout` elapses, or `cancel` fires.
///
/// `operation` names the call in the resulting `Timeout` error.
pub async fn bounded_call<T, F>(
    cancel: &CancellationToken,
    timeout: Duration,
    operation: &str,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        outcome = tokio::time::timeout(timeout, fut) => match outcome {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout {
                operation: operation.to_string(),
                after_ms: timeout.as_millis() as u64,
            }),
        },
    }
}
