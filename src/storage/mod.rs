mod r2;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use r2::R2Client;

/// Destination for published episodes and the podcast document.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// PUT `body` under `key`. Any transport failure or non-2xx status is
    /// an `Upload` error.
    async fn upload(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()>;

    /// The object's bytes, or `None` when the key does not exist.
    async fn download(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

/// Upload with up to `attempts` tries, sleeping `delay` between them.
pub async fn upload_with_retry(
    store: &dyn ObjectStore,
    key: &str,
    body: Vec<u8>,
    content_type: &str,
    attempts: u32,
    delay: Duration,
) -> Result<()> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match store.upload(key, body.clone(), content_type).await {
            Ok(()) => {
                tracing::debug!(key, attempt, "upload complete");
                return Ok(());
            }
            Err(e) if attempt < attempts => {
                tracing::warn!(key, attempt, "upload failed, retrying in {:?}: {}", delay, e);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ObjectStore for Flaky {
        async fn upload(&self, key: &str, _body: Vec<u8>, _content_type: &str) -> Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                Err(AppError::Upload(format!("{key}: 503")))
            } else {
                Ok(())
            }
        }

        async fn download(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let store = Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let started = tokio::time::Instant::now();
        upload_with_retry(&store, "rss.xml", vec![1], "application/rss+xml", 3, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_attempts() {
        let store = Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
        };
        let err = upload_with_retry(&store, "a.mp3", vec![1], "audio/mpeg", 2, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Upload(_)));
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_attempts_still_tries_once() {
        let store = Flaky {
            failures: 0,
            calls: AtomicU32::new(0),
        };
        upload_with_retry(&store, "a.mp3", vec![], "audio/mpeg", 0, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }
}
