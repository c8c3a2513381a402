use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::{AppError, Result};

/// Bounded concurrent runner. `submit` waits while `size` tasks are in
/// flight; `stop_and_wait` refuses further work and drains the rest.
#[derive(Clone)]
pub struct WorkerPool {
    name: &'static str,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn new(name: &'static str, size: usize, cancel: CancellationToken) -> Self {
        Self {
            name,
            permits: Arc::new(Semaphore::new(size.max(1))),
            tracker: TaskTracker::new(),
            cancel,
        }
    }

    pub async fn submit<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tracker.is_closed() || self.cancel.is_cancelled() {
            return Err(AppError::PoolClosed);
        }
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(AppError::PoolClosed),
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|_| AppError::PoolClosed)?
            }
        };
        if self.tracker.is_closed() {
            return Err(AppError::PoolClosed);
        }
        self.tracker.spawn(async move {
            task.await;
            drop(permit);
        });
        Ok(())
    }

    pub async fn stop_and_wait(&self) {
        self.tracker.close();
        tracing::trace!(pool = self.name, pending = self.tracker.len(), "draining pool");
        self.tracker.wait().await;
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn never_exceeds_capacity() {
        let pool = WorkerPool::new("test", 3, CancellationToken::new());
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let (running, peak, done) = (running.clone(), peak.clone(), done.clone());
            assert_ok!(
                pool.submit(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    done.fetch_add(1, Ordering::SeqCst);
                })
                .await
            );
        }
        pool.stop_and_wait().await;

        assert_eq!(done.load(Ordering::SeqCst), 10);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn refuses_after_stop() {
        let pool = WorkerPool::new("test", 1, CancellationToken::new());
        pool.stop_and_wait().await;
        let err = assert_err!(pool.submit(async {}).await);
        assert!(matches!(err, AppError::PoolClosed));
    }

    #[tokio::test]
    async fn refuses_after_cancellation() {
        let cancel = CancellationToken::new();
        let pool = WorkerPool::new("test", 1, cancel.clone());
        pool.submit(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
        })
        .await
        .unwrap();

        // The single permit is taken; cancelling releases the blocked submit.
        let waiting = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.submit(async {}).await })
        };
        cancel.cancel();
        assert!(matches!(waiting.await.unwrap(), Err(AppError::PoolClosed)));
        pool.stop_and_wait().await;
    }
}
