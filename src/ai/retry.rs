use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};

use super::{DigestText, Summarize};

pub const SUMMARY_ATTEMPTS: u32 = 3;

/// Seconds slept after failed attempt `i` (zero-based): 1, 4, 9, ...
pub fn backoff(attempt: u32) -> Duration {
    let n = u64::from(attempt) + 1;
    Duration::from_secs(n * n)
}

/// Call the summarizer up to [`SUMMARY_ATTEMPTS`] times, sleeping
/// quadratically between attempts. The last error is returned.
pub async fn summarize_with_retry(
    summarizer: &dyn Summarize,
    url: &str,
    cancel: &CancellationToken,
) -> Result<DigestText> {
    let mut last_error = AppError::EmptyResponse(url.to_string());
    for attempt in 0..SUMMARY_ATTEMPTS {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            result = summarizer.summarize(url) => result,
        };
        match result {
            Ok(digest) => return Ok(digest),
            Err(e) => {
                tracing::warn!(url, attempt = attempt + 1, "summarize failed: {}", e);
                last_error = e;
            }
        }
        if attempt + 1 < SUMMARY_ATTEMPTS {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                _ = tokio::time::sleep(backoff(attempt)) => {}
            }
        }
    }
    Err(last_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Summarize for Flaky {
        async fn summarize(&self, _url: &str) -> Result<DigestText> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(AppError::Network("connection reset".into()))
            } else {
                super::super::parse_reply("T\n-----\nB")
            }
        }
    }

    #[test]
    fn backoff_is_quadratic() {
        assert_eq!(backoff(0), Duration::from_secs(1));
        assert_eq!(backoff(1), Duration::from_secs(4));
        assert_eq!(backoff(2), Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_after_waiting() {
        let flaky = Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let started = tokio::time::Instant::now();
        let digest = summarize_with_retry(&flaky, "https://x/a", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(digest.title, "T");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn returns_last_error_after_three_attempts() {
        let flaky = Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
        };
        let err = summarize_with_retry(&flaky, "https://x/a", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Network(_)));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_stops_retrying() {
        let flaky = Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = summarize_with_retry(&flaky, "https://x/a", &cancel).await.unwrap_err();
        assert!(matches!(err, AppError::Cancelled));
    }
}
