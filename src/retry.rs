//! Bounded retry with exponential backoff for transient transport errors.
//!
//! Only network-facing steps use this (object download and metadata lookup,
//! index upsert). Decoding and chunking are local and deterministic, so a
//! failure there is final.
//!
//! An error is transient when its chain contains a [`reqwest::Error`] for a
//! connect, timeout, request or body failure, or an [`HttpStatusError`] with
//! status 429 or 5xx.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;

use crate::config::RetryConfig;
use crate::error::HttpStatusError;

/// Upper bound on the backoff exponent (base × 2^5).
const MAX_BACKOFF_SHIFT: u32 = 5;

/// Whether retrying `err` may succeed.
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(status) = cause.downcast_ref::<HttpStatusError>() {
            return status.is_transient();
        }
        if let Some(req) = cause.downcast_ref::<reqwest::Error>() {
            if let Some(status) = req.status() {
                return status.as_u16() == 429 || status.is_server_error();
            }
            return req.is_connect() || req.is_timeout() || req.is_request() || req.is_body();
        }
        false
    })
}

/// Delay before retry number `attempt` (1-based).
pub fn backoff(policy: &RetryConfig, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
    policy.base_delay() * (1u32 << shift)
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
///
/// `what` names the operation in log lines.
pub async fn retry_transient<T, F, Fut>(policy: &RetryConfig, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_attempts && is_transient(&err) => {
                let delay = backoff(policy, attempt);
                tracing::warn!(
                    operation = what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %format!("{:#}", err),
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay_ms: 1,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryConfig {
            max_attempts: 10,
            base_delay_ms: 100,
        };
        assert_eq!(backoff(&policy, 1), Duration::from_millis(100));
        assert_eq!(backoff(&policy, 2), Duration::from_millis(200));
        assert_eq!(backoff(&policy, 3), Duration::from_millis(400));
        assert_eq!(backoff(&policy, 9), Duration::from_millis(3200));
    }

    #[test]
    fn classification() {
        let transient = anyhow::Error::new(HttpStatusError::new("S3 GetObject", 503, "slow down"))
            .context("download failed");
        assert!(is_transient(&transient));

        let permanent = anyhow::Error::new(HttpStatusError::new("S3 GetObject", 403, "denied"));
        assert!(!is_transient(&permanent));

        assert!(!is_transient(&anyhow::anyhow!("bad pdf")));
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_transient(&fast_policy(3), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(HttpStatusError::new("Qdrant upsert", 502, "").into())
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_transient(&fast_policy(2), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(HttpStatusError::new("Qdrant upsert", 500, "").into()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_transient(&fast_policy(5), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::anyhow!("not found")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
