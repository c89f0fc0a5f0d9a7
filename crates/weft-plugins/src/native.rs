//! Time-bounded calls across the host boundary

use std::future::Future;
use std::time::Duration;

use weft_kernel::host::{HostError, HostResult};
pub(crate) use weft_kernel::plugin::panic_message;

/// Await a host call, failing with [`HostError::Timeout`] after `limit`.
pub(crate) async fn bounded<T, F>(operation: &str, limit: Duration, call: F) -> HostResult<T>
where
    F: Future<Output = HostResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(HostError::Timeout {
            operation: operation.to_string(),
            millis: limit.as_millis() as u64,
        }),
    }
}
