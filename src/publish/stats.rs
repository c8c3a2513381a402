use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct PublishStatistics {
    pub total_publishes: u64,
    pub successful_publishes: u64,
    pub failed_publishes: u64,
    pub last_publish_time: Option<DateTime<Utc>>,
    /// Seconds.
    pub last_publish_duration: f64,
    /// Empty after a fully successful run.
    pub last_error: String,
    pub audio_files_generated: u64,
    pub audio_files_uploaded: u64,
    pub total_upload_size: u64,
}

impl PublishStatistics {
    pub fn failure_rate(&self) -> f64 {
        if self.total_publishes == 0 {
            0.0
        } else {
            self.failed_publishes as f64 / self.total_publishes as f64
        }
    }
}

/// Counts gathered during one run, folded in when it ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounters {
    pub audio_generated: u64,
    pub audio_uploaded: u64,
    pub bytes_uploaded: u64,
    pub episodes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct PublishStatsTracker {
    inner: Arc<RwLock<PublishStatistics>>,
}

impl PublishStatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> PublishStatistics {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn update(&self, f: impl FnOnce(&mut PublishStatistics)) {
        let mut stats = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut stats);
    }

    pub fn record_success(&self, elapsed: Duration, counters: RunCounters) {
        self.update(|s| {
            s.total_publishes += 1;
            s.successful_publishes += 1;
            s.last_publish_time = Some(Utc::now());
            s.last_publish_duration = elapsed.as_secs_f64();
            s.last_error.clear();
            s.audio_files_generated += counters.audio_generated;
            s.audio_files_uploaded += counters.audio_uploaded;
            s.total_upload_size += counters.bytes_uploaded;
        });
    }

    /// The error stays visible until the next fully successful run.
    pub fn record_failure(&self, elapsed: Duration, counters: RunCounters, error: &str) {
        self.update(|s| {
            s.total_publishes += 1;
            s.failed_publishes += 1;
            s.last_publish_time = Some(Utc::now());
            s.last_publish_duration = elapsed.as_secs_f64();
            s.last_error = error.to_string();
            s.audio_files_generated += counters.audio_generated;
            s.audio_files_uploaded += counters.audio_uploaded;
            s.total_upload_size += counters.bytes_uploaded;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_is_cleared_by_next_success() {
        let stats = PublishStatsTracker::new();
        stats.record_failure(Duration::from_secs(1), RunCounters::default(), "upload failed");
        assert_eq!(stats.snapshot().last_error, "upload failed");
        assert_eq!(stats.snapshot().failure_rate(), 1.0);

        let counters = RunCounters {
            audio_generated: 2,
            audio_uploaded: 1,
            bytes_uploaded: 834,
            episodes: 1,
        };
        stats.record_success(Duration::from_secs(3), counters);
        let snapshot = stats.snapshot();
        assert!(snapshot.last_error.is_empty());
        assert_eq!(snapshot.total_publishes, 2);
        assert_eq!(snapshot.successful_publishes, 1);
        assert_eq!(snapshot.audio_files_generated, 2);
        assert_eq!(snapshot.total_upload_size, 834);
        assert_eq!(snapshot.last_publish_duration, 3.0);
    }
}
