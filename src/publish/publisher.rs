use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use crate::audio::{merge_mp3, synthesizer_from_config, AudioLibrary, SpeechSynthesizer};
use crate::config::{parse_duration, Config, PublishConfig};
use crate::db::Store;
use crate::error::{AppError, Result};
use crate::models::{safe_name, Feed};
use crate::pipeline::WorkerPool;
use crate::storage::{upload_with_retry, ObjectStore, R2Client};

use super::podcast::{Episode, PodcastDocument, PodcastMeta};
use super::schedule::PublishSchedule;
use super::stats::{PublishStatistics, PublishStatsTracker, RunCounters};

pub const FEED_KEY: &str = "rss.xml";

/// Tuning knobs from `[daemon.publish]`.
#[derive(Debug, Clone)]
pub struct PublishSettings {
    pub range_days: u32,
    pub auto_generate_missing_audio: bool,
    pub cleanup_temp_files: bool,
    /// Zero disables the limit.
    pub max_file_size_mb: u64,
    pub parallel_uploads: usize,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

impl PublishSettings {
    pub fn from_config(config: &PublishConfig) -> Result<Self> {
        Ok(Self {
            range_days: config.range_days.max(1),
            auto_generate_missing_audio: config.auto_generate_missing_audio,
            cleanup_temp_files: config.cleanup_temp_files,
            max_file_size_mb: config.max_file_size_mb,
            parallel_uploads: config.parallel_uploads.max(1),
            retry_attempts: config.retry_attempts,
            retry_delay: parse_duration(&config.retry_delay)?,
        })
    }

    fn size_limit(&self) -> Option<u64> {
        (self.max_file_size_mb > 0).then(|| self.max_file_size_mb * 1024 * 1024)
    }
}

/// A merged episode file waiting for upload.
struct Prepared {
    feed_title: String,
    key: String,
    path: PathBuf,
    size: u64,
    description: String,
}

/// Clears the running flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AppError::Daemon("a publish run is already in progress".into()))?;
        Ok(Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Merges each feed's daily digests into an episode, uploads it and keeps
/// the podcast document in the bucket current.
pub struct Publisher {
    store: Store,
    library: AudioLibrary,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    object_store: Arc<dyn ObjectStore>,
    meta: PodcastMeta,
    schedule: PublishSchedule,
    settings: PublishSettings,
    work_dir: PathBuf,
    stats: PublishStatsTracker,
    running: AtomicBool,
    last_slot: Mutex<Option<NaiveDate>>,
}

impl Publisher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        library: AudioLibrary,
        synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
        object_store: Arc<dyn ObjectStore>,
        meta: PodcastMeta,
        schedule: PublishSchedule,
        settings: PublishSettings,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            library,
            synthesizer,
            object_store,
            meta,
            schedule,
            settings,
            work_dir,
            stats: PublishStatsTracker::new(),
            running: AtomicBool::new(false),
            last_slot: Mutex::new(None),
        }
    }

    /// Build from config. Fails naming the first missing piece.
    pub fn from_config(config: &Config, store: Store) -> Result<Self> {
        let audio = config
            .audio_dir()
            .ok_or_else(|| AppError::Config("publishing needs an audio directory".into()))?;
        if !config.has_podcast() {
            return Err(AppError::Config(
                "publishing needs podcast.publish_url and podcast.channel_title".into(),
            ));
        }
        if !config.has_object_storage() {
            return Err(AppError::Config("publishing needs cloudflare credentials".into()));
        }

        let publish = &config.daemon.publish;
        Ok(Self::new(
            store,
            AudioLibrary::new(audio),
            Some(synthesizer_from_config(config)?),
            Arc::new(R2Client::from_config(&config.cloudflare)?),
            PodcastMeta::from_config(&config.podcast),
            PublishSchedule::from_config(publish)?,
            PublishSettings::from_config(publish)?,
            std::env::temp_dir().join("quicknews-publish"),
        ))
    }

    /// The daemon's publisher, or `None` when publishing is switched off or
    /// not fully configured.
    pub fn for_daemon(config: &Config, store: Store) -> Result<Option<Self>> {
        if !config.daemon.publish.enabled {
            return Ok(None);
        }
        match Self::from_config(config, store) {
            Ok(publisher) => Ok(Some(publisher)),
            Err(AppError::Config(reason)) => {
                tracing::warn!("publishing disabled: {}", reason);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn schedule(&self) -> PublishSchedule {
        self.schedule
    }

    pub fn statistics(&self) -> PublishStatistics {
        self.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// True once per due slot. A daily schedule can fire once per day and a
    /// weekly one once per week; never while a run is in progress.
    pub fn should_publish_now<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        if self.is_running() || !self.schedule.is_due(now) {
            return false;
        }
        let slot = now.date_naive();
        let mut last = self
            .last_slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *last == Some(slot) {
            return false;
        }
        *last = Some(slot);
        true
    }

    /// A scheduled run: `range_days` dates ending at the schedule's target.
    pub async fn perform_publish(
        &self,
        now: DateTime<Local>,
        cancel: &CancellationToken,
    ) -> Result<RunCounters> {
        let target = self.schedule.target_date(now.date_naive());
        let dates = (0..self.settings.range_days)
            .map(|i| target - chrono::Duration::days(i64::from(i)))
            .collect::<Vec<_>>();
        self.run(&dates, cancel).await
    }

    /// Publish exactly one date, regardless of schedule.
    pub async fn publish_date(&self, date: NaiveDate, cancel: &CancellationToken) -> Result<RunCounters> {
        self.run(&[date], cancel).await
    }

    async fn run(&self, dates: &[NaiveDate], cancel: &CancellationToken) -> Result<RunCounters> {
        let _guard = RunGuard::acquire(&self.running)?;
        let started = Instant::now();
        let mut counters = RunCounters::default();
        tracing::info!(dates = dates.len(), "publish run started");

        match self.publish_dates(dates, cancel, &mut counters).await {
            Ok(()) => {
                self.stats.record_success(started.elapsed(), counters);
                tracing::info!(
                    episodes = counters.episodes,
                    uploaded = counters.audio_uploaded,
                    bytes = counters.bytes_uploaded,
                    "publish run finished"
                );
                Ok(counters)
            }
            Err(e) => {
                self.stats.record_failure(started.elapsed(), counters, &e.to_string());
                tracing::error!("publish run failed: {}", e);
                Err(e)
            }
        }
    }

    async fn publish_dates(
        &self,
        dates: &[NaiveDate],
        cancel: &CancellationToken,
        counters: &mut RunCounters,
    ) -> Result<()> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        let mut document = self.load_document().await;
        let feeds: Vec<Feed> = self
            .store
            .feeds
            .list()
            .await?
            .into_iter()
            .filter(|feed| !feed.is_bookmark)
            .collect();

        for date in dates {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            for episode in self.publish_day(*date, &feeds, cancel, counters).await? {
                document.upsert(&episode);
                counters.episodes += 1;
            }
        }

        let xml = document.render(Utc::now())?;
        let path = self.work_dir.join(FEED_KEY);
        tokio::fs::write(&path, xml.as_bytes()).await?;
        let size = xml.len() as u64;
        upload_with_retry(
            self.object_store.as_ref(),
            FEED_KEY,
            xml.into_bytes(),
            "application/rss+xml",
            self.settings.retry_attempts,
            self.settings.retry_delay,
        )
        .await?;
        counters.bytes_uploaded += size;
        if self.settings.cleanup_temp_files {
            remove_quietly(&path).await;
        }
        Ok(())
    }

    /// The document already in the bucket, or a fresh one.
    async fn load_document(&self) -> PodcastDocument {
        match self.object_store.download(FEED_KEY).await {
            Ok(Some(xml)) => match PodcastDocument::parse(&xml, self.meta.clone()) {
                Ok(document) => {
                    tracing::debug!(items = document.items().len(), "continuing existing podcast feed");
                    return document;
                }
                Err(e) => tracing::warn!("existing podcast feed is unreadable, starting fresh: {}", e),
            },
            Ok(None) => tracing::debug!("no podcast feed yet, starting fresh"),
            Err(e) => tracing::warn!("could not load podcast feed, starting fresh: {}", e),
        }
        PodcastDocument::new(self.meta.clone())
    }

    /// Merge and upload one episode per feed for `date`. Episodes come back
    /// in feed order.
    async fn publish_day(
        &self,
        date: NaiveDate,
        feeds: &[Feed],
        cancel: &CancellationToken,
        counters: &mut RunCounters,
    ) -> Result<Vec<Episode>> {
        let mut prepared = Vec::new();
        for feed in feeds {
            if let Some(episode) = self.prepare(date, feed, counters).await? {
                prepared.push(episode);
            }
        }
        if prepared.is_empty() {
            tracing::info!(%date, "no audio to publish");
            return Ok(Vec::new());
        }

        let results = Arc::new(Mutex::new(vec![None; prepared.len()]));
        let pool = WorkerPool::new("publish-upload", self.settings.parallel_uploads, cancel.child_token());
        let mut submitted = Ok(());
        for (index, episode) in prepared.iter().enumerate() {
            let store = Arc::clone(&self.object_store);
            let results = Arc::clone(&results);
            let key = episode.key.clone();
            let path = episode.path.clone();
            let (attempts, delay) = (self.settings.retry_attempts, self.settings.retry_delay);
            let task = async move {
                let outcome = match tokio::fs::read(&path).await {
                    Ok(body) => upload_with_retry(store.as_ref(), &key, body, "audio/mpeg", attempts, delay)
                        .await
                        .map_err(|e| e.to_string()),
                    Err(e) => Err(format!("{}: {}", path.display(), e)),
                };
                results
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())[index] = Some(outcome);
            };
            if let Err(e) = pool.submit(task).await {
                submitted = Err(e);
                break;
            }
        }
        pool.stop_and_wait().await;

        if self.settings.cleanup_temp_files {
            for episode in &prepared {
                remove_quietly(&episode.path).await;
            }
        }
        submitted?;

        let results = std::mem::take(
            &mut *results
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        let mut episodes = Vec::with_capacity(prepared.len());
        for (episode, outcome) in prepared.into_iter().zip(results) {
            match outcome {
                Some(Ok(())) => {
                    counters.audio_uploaded += 1;
                    counters.bytes_uploaded += episode.size;
                    episodes.push(Episode {
                        title: format!("{} {} Podcast", date, episode.feed_title),
                        url: self.meta.object_url(&episode.key),
                        date,
                        length: episode.size,
                        description: episode.description,
                    });
                }
                Some(Err(reason)) => return Err(AppError::Upload(reason)),
                None => return Err(AppError::Cancelled),
            }
        }
        Ok(episodes)
    }

    /// Collect the feed's audio for `date` and merge it into one file.
    async fn prepare(
        &self,
        date: NaiveDate,
        feed: &Feed,
        counters: &mut RunCounters,
    ) -> Result<Option<Prepared>> {
        let synthesizer = if self.settings.auto_generate_missing_audio {
            self.synthesizer.as_deref()
        } else {
            None
        };

        let mut files = Vec::new();
        let mut titles = Vec::new();
        for article in self.store.articles.get_by_date(feed.id, date, &Local).await? {
            let Some(digest) = article.digest.as_ref() else {
                continue;
            };
            let had_audio = self.library.existing(feed, digest).is_some()
                || digest.audio_data.as_ref().is_some_and(|d| !d.is_empty());
            match self.library.ensure(&self.store, synthesizer, feed, digest).await? {
                Some(path) => {
                    if !had_audio {
                        counters.audio_generated += 1;
                    }
                    files.push(path);
                    titles.push(digest.title_str().to_string());
                }
                None => tracing::debug!(url = %digest.url, "no audio for digest, leaving it out"),
            }
        }
        if files.is_empty() {
            return Ok(None);
        }

        let key = format!("{}.mp3", safe_name(&format!("{}_{}", date, feed.title)));
        let path = self.work_dir.join(&key);
        merge_mp3(&path, &files).await?;
        let size = tokio::fs::metadata(&path).await?.len();

        if let Some(limit) = self.settings.size_limit() {
            if size > limit {
                let err = AppError::SizeLimitExceeded {
                    path: path.display().to_string(),
                    size,
                    limit,
                };
                tracing::warn!(feed = %feed.title, %date, "skipping episode: {}", err);
                remove_quietly(&path).await;
                return Ok(None);
            }
        }

        tracing::debug!(feed = %feed.title, %date, parts = files.len(), size, "episode merged");
        Ok(Some(Prepared {
            feed_title: feed.title.clone(),
            key,
            path,
            size,
            description: titles.join("\n"),
        }))
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::debug!(path = %path.display(), "could not remove temp file: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, Timelike};

    struct Nowhere;

    #[async_trait::async_trait]
    impl ObjectStore for Nowhere {
        async fn upload(&self, key: &str, _body: Vec<u8>, _content_type: &str) -> Result<()> {
            Err(AppError::Upload(key.to_string()))
        }

        async fn download(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
    }

    async fn publisher(schedule: PublishSchedule) -> (Publisher, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = PublishSettings::from_config(&PublishConfig::default()).unwrap();
        settings.retry_attempts = 1;
        settings.retry_delay = Duration::ZERO;
        let publisher = Publisher::new(
            Store::open_in_memory().await.unwrap(),
            AudioLibrary::new(dir.path().join("audio")),
            None,
            Arc::new(Nowhere),
            PodcastMeta::default(),
            schedule,
            settings,
            dir.path().join("work"),
        );
        (publisher, dir)
    }

    fn local(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2026, 10, 19, h, m, s)
            .single()
            .unwrap()
    }

    #[tokio::test]
    async fn daily_fires_once_per_slot() {
        let at = NaiveTime::from_hms_opt(6, 0, 0).unwrap();
        let (publisher, _dir) = publisher(PublishSchedule::Daily { at }).await;

        assert!(!publisher.should_publish_now(&local(5, 59, 30)));
        assert!(publisher.should_publish_now(&local(6, 0, 0)));
        assert!(!publisher.should_publish_now(&local(6, 0, 30)));
        assert!(!publisher.should_publish_now(&local(6, 0, 59)));

        let tomorrow = local(6, 0, 10) + chrono::Duration::days(1);
        assert_eq!(tomorrow.hour(), 6);
        assert!(publisher.should_publish_now(&tomorrow));
    }

    #[tokio::test]
    async fn manual_never_fires() {
        let (publisher, _dir) = publisher(PublishSchedule::Manual).await;
        assert!(!publisher.should_publish_now(&local(6, 0, 0)));
    }

    #[tokio::test]
    async fn not_due_while_running() {
        let at = NaiveTime::from_hms_opt(6, 0, 0).unwrap();
        let (publisher, _dir) = publisher(PublishSchedule::Daily { at }).await;
        let guard = RunGuard::acquire(&publisher.running).unwrap();
        assert!(RunGuard::acquire(&publisher.running).is_err());
        assert!(!publisher.should_publish_now(&local(6, 0, 0)));
        drop(guard);
        assert!(publisher.should_publish_now(&local(6, 0, 1)));
    }

    #[tokio::test]
    async fn failed_upload_is_recorded() {
        let (publisher, _dir) = publisher(PublishSchedule::Manual).await;
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let err = publisher
            .publish_date(date, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Upload(_)));

        let stats = publisher.statistics();
        assert_eq!(stats.total_publishes, 1);
        assert_eq!(stats.failed_publishes, 1);
        assert!(stats.last_error.contains("rss.xml"));
        assert!(!publisher.is_running());
    }

    #[test]
    fn size_limit_is_in_megabytes() {
        let mut config = PublishConfig::default();
        assert_eq!(PublishSettings::from_config(&config).unwrap().size_limit(), None);
        config.max_file_size_mb = 2;
        assert_eq!(
            PublishSettings::from_config(&config).unwrap().size_limit(),
            Some(2 * 1024 * 1024)
        );
    }
}
