//! Timeout enforcement.
//!
//! Every outbound call has a deadline. When it elapses the in-flight future is
//! dropped (aborting the request) and the failure surfaces as a retryable
//! `TIMEOUT`.

use std::future::Future;
use std::time::Duration;

use crate::pipeline::error::ApiError;

/// Run `call` with a deadline of `after`.
pub async fn with_timeout<T, Fut>(
    after: Duration,
    provider: &str,
    operation: &str,
    call: Fut,
) -> Result<T, ApiError>
where
    Fut: Future<Output = Result<T, ApiError>>,
{
    match tokio::time::timeout(after, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                provider = %provider,
                operation = %operation,
                timeout_ms = after.as_millis() as u64,
                "Outbound call timed out"
            );
            Err(ApiError::timeout(provider, operation, after))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::error::ErrorCode;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_produces_retryable_timeout() {
        let result: Result<(), ApiError> = with_timeout(Duration::from_secs(30), "crm", "list", async {
            tokio::time::sleep(Duration::from_secs(31)).await;
            Ok(())
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.code, ErrorCode::Timeout);
        assert!(err.retryable);
    }

    #[tokio::test]
    async fn test_fast_call_passes_through() {
        let result = with_timeout(Duration::from_secs(1), "crm", "list", async { Ok::<_, ApiError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
