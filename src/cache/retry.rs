//! Bounded retry combinator
//!
//! Re-runs a fallible async operation until it succeeds or `max_attempts`
//! runs have failed, returning the last error. No backoff between attempts.

use std::future::Future;
use tracing::{error, warn};

use crate::types::Result;

/// Run `operation` up to `max_attempts` times (at least once)
pub async fn with_retries<T, F, Fut>(max_attempts: u32, mut operation: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts => {
                warn!(
                    attempt = attempt,
                    max_attempts = max_attempts,
                    error = %e,
                    "Attempt failed, retrying"
                );
                attempt += 1;
            }
            Err(e) => {
                error!(attempts = attempt, error = %e, "All attempts failed");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GatewayError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_exhaustion_after_exact_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<()> = with_retries(3, |_| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(GatewayError::Cache("MGET timed out".into()))
            }
        })
        .await;

        assert_eq!(result, Err(GatewayError::Cache("MGET timed out".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let result = with_retries(3, |attempt| async move {
            if attempt < 3 {
                Err(GatewayError::Population(format!("attempt {}", attempt)))
            } else {
                Ok(attempt)
            }
        })
        .await;

        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn test_first_success_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = with_retries(3, |_| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("done")
            }
        })
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let _: Result<()> = with_retries(0, |_| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(GatewayError::Internal("boom".into()))
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
