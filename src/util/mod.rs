//! Small shared helpers.

use std::future::Future;
use std::time::Duration;

use crate::error::ConfabError;

/// Wrap a future with a timeout.
///
/// Every suspend point in the engine (handshake, tool invocation, retrieval,
/// model call) goes through this so that no wait is unbounded.
pub async fn with_timeout<T>(
    duration: Duration,
    future: impl Future<Output = Result<T, ConfabError>>,
) -> Result<T, ConfabError> {
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(ConfabError::Timeout(duration.as_millis() as u64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn elapsed_timeout_maps_to_timeout_error() {
        let result = with_timeout(Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(ConfabError::Timeout(50))));
    }

    #[tokio::test]
    async fn completed_future_passes_through() {
        let result = with_timeout(Duration::from_secs(1), async { Ok(7u32) }).await;
        assert_eq!(result.expect("future should complete"), 7);
    }
}
