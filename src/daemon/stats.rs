use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Counters of the ingestion engine.
#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub start_time: DateTime<Utc>,
    pub total_fetches: u64,
    pub feeds_processed: u64,
    pub articles_fetched: u64,
    pub summaries_generated: u64,
    pub errors: u64,
    pub last_fetch_time: Option<DateTime<Utc>>,
    /// Seconds.
    pub average_process_time: f64,
}

impl Statistics {
    fn new(start_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            total_fetches: 0,
            feeds_processed: 0,
            articles_fetched: 0,
            summaries_generated: 0,
            errors: 0,
            last_fetch_time: None,
            average_process_time: 0.0,
        }
    }

    pub fn uptime(&self, now: DateTime<Utc>) -> Duration {
        (now - self.start_time).to_std().unwrap_or_default()
    }

    /// `errors / total_fetches`, zero before the first fetch.
    pub fn error_rate(&self) -> f64 {
        if self.total_fetches == 0 {
            0.0
        } else {
            self.errors as f64 / self.total_fetches as f64
        }
    }
}

/// Mean of the previous average and the latest sample. This is not a
/// running mean over all ticks; older ticks decay by half each time.
pub fn two_point_mean(previous: f64, latest: f64) -> f64 {
    if previous > 0.0 {
        (previous + latest) / 2.0
    } else {
        latest
    }
}

/// Shared handle to [`Statistics`]. Readers get a copy.
#[derive(Debug, Clone)]
pub struct StatsTracker {
    inner: Arc<RwLock<Statistics>>,
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Statistics::new(Utc::now()))),
        }
    }

    pub fn snapshot(&self) -> Statistics {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn update(&self, f: impl FnOnce(&mut Statistics)) {
        let mut stats = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut stats);
    }

    pub fn begin_fetch(&self) {
        self.update(|s| {
            s.total_fetches += 1;
            s.last_fetch_time = Some(Utc::now());
        });
    }

    pub fn record_feed(&self) {
        self.update(|s| s.feeds_processed += 1);
    }

    pub fn record_article(&self) {
        self.update(|s| s.articles_fetched += 1);
    }

    pub fn record_summary(&self) {
        self.update(|s| s.summaries_generated += 1);
    }

    pub fn record_error(&self) {
        self.update(|s| s.errors += 1);
    }

    pub fn finish_tick(&self, elapsed: Duration) {
        self.update(|s| {
            s.average_process_time = two_point_mean(s.average_process_time, elapsed.as_secs_f64());
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_is_two_point_mean() {
        assert_eq!(two_point_mean(0.0, 4.0), 4.0);
        assert_eq!(two_point_mean(4.0, 2.0), 3.0);
        // 4, 2, 2 gives 2.5, not the true mean 2.67.
        assert_eq!(two_point_mean(3.0, 2.0), 2.5);
    }

    #[test]
    fn counters_accumulate() {
        let stats = StatsTracker::new();
        stats.begin_fetch();
        stats.record_feed();
        stats.record_article();
        stats.record_summary();
        stats.record_error();
        stats.finish_tick(Duration::from_secs(2));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_fetches, 1);
        assert_eq!(snapshot.feeds_processed, 1);
        assert_eq!(snapshot.articles_fetched, 1);
        assert_eq!(snapshot.summaries_generated, 1);
        assert_eq!(snapshot.errors, 1);
        assert!(snapshot.last_fetch_time.is_some());
        assert_eq!(snapshot.average_process_time, 2.0);
        assert_eq!(snapshot.error_rate(), 1.0);
    }

    #[test]
    fn error_rate_is_zero_before_first_fetch() {
        assert_eq!(StatsTracker::new().snapshot().error_rate(), 0.0);
    }
}
