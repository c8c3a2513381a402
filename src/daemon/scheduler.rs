use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::Local;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::db::Store;
use crate::error::{AppError, Result};
use crate::feed::FeedIngestor;
use crate::models::Feed;
use crate::pipeline::{QueueItem, WorkerPool};
use crate::publish::Publisher;

use super::stats::StatsTracker;

/// Items of one feed processed at a time.
pub const ITEMS_PER_FEED: usize = 3;

const PUBLISH_CHECK_PERIOD: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Leave the loop right away.
    Stop,
    /// Cancel in-flight work, wait for detached publish runs, then leave.
    Shutdown,
    Reload,
    DumpStats,
    ToggleDebug,
}

/// Flips debug logging and reports whether it is now on.
pub type LogToggle = Arc<dyn Fn() -> Result<bool> + Send + Sync>;

/// The periodic ingest loop. Each tick fetches every regular feed and
/// processes its items; publish runs are spawned off the loop.
pub struct Scheduler {
    store: Store,
    ingestor: Arc<FeedIngestor>,
    stats: StatsTracker,
    publisher: Option<Arc<Publisher>>,
    interval: Duration,
    max_workers: usize,
    state: Arc<RwLock<SchedulerState>>,
    sender: mpsc::Sender<Command>,
    commands: Mutex<mpsc::Receiver<Command>>,
    work: CancellationToken,
    publishes: TaskTracker,
    log_toggle: Option<LogToggle>,
}

impl Scheduler {
    pub fn new(
        store: Store,
        ingestor: Arc<FeedIngestor>,
        stats: StatsTracker,
        interval: Duration,
        max_workers: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(16);
        Self {
            store,
            ingestor,
            stats,
            publisher: None,
            interval,
            max_workers: max_workers.max(1),
            state: Arc::new(RwLock::new(SchedulerState::Idle)),
            sender,
            commands: Mutex::new(receiver),
            work: CancellationToken::new(),
            publishes: TaskTracker::new(),
            log_toggle: None,
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_log_toggle(mut self, toggle: LogToggle) -> Self {
        self.log_toggle = Some(toggle);
        self
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            sender: self.sender.clone(),
            state: Arc::clone(&self.state),
            work: self.work.clone(),
        }
    }

    pub fn stats(&self) -> &StatsTracker {
        &self.stats
    }

    pub fn publisher(&self) -> Option<&Arc<Publisher>> {
        self.publisher.as_ref()
    }

    pub fn state(&self) -> SchedulerState {
        read_state(&self.state)
    }

    fn set_state(&self, state: SchedulerState) {
        *self
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
        tracing::debug!(?state, "scheduler state changed");
    }

    /// Run until stopped. Cancelling `ctx` returns `Cancelled`; `Stop` and
    /// `Shutdown` commands return `Ok`.
    pub async fn run(&self, ctx: CancellationToken) -> Result<()> {
        let mut commands = self
            .commands
            .try_lock()
            .map_err(|_| AppError::Daemon("scheduler is already running".into()))?;

        self.set_state(SchedulerState::Running);
        tracing::info!(interval = ?self.interval, max_workers = self.max_workers, "scheduler started");

        let mut ingest = tokio::time::interval(self.interval);
        ingest.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut publish_check = tokio::time::interval(PUBLISH_CHECK_PERIOD);
        publish_check.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let result = loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    self.work.cancel();
                    break Err(AppError::Cancelled);
                }
                command = commands.recv() => match command {
                    Some(Command::Stop) | None => break Ok(()),
                    Some(Command::Shutdown) => {
                        self.drain().await;
                        break Ok(());
                    }
                    Some(Command::Reload) => tracing::info!("reload requested, nothing to reload"),
                    Some(Command::DumpStats) => self.log_stats(),
                    Some(Command::ToggleDebug) => self.toggle_debug(),
                },
                _ = ingest.tick() => {
                    tokio::select! {
                        biased;
                        _ = ctx.cancelled() => {
                            self.work.cancel();
                            break Err(AppError::Cancelled);
                        }
                        _ = self.tick() => {}
                    }
                }
                _ = publish_check.tick() => self.maybe_publish(),
            }
        };

        self.set_state(SchedulerState::Stopped);
        tracing::info!("scheduler stopped");
        result
    }

    async fn drain(&self) {
        self.set_state(SchedulerState::Draining);
        self.work.cancel();
        self.publishes.close();
        tracing::info!(publishes = self.publishes.len(), "draining");
        self.publishes.wait().await;
    }

    /// One ingest pass over every regular feed.
    pub async fn run_once(&self) {
        self.tick().await;
    }

    async fn tick(&self) {
        let started = Instant::now();
        self.stats.begin_fetch();

        let feeds: Vec<Feed> = match self.store.feeds.list().await {
            Ok(feeds) => feeds.into_iter().filter(|feed| !feed.is_bookmark).collect(),
            Err(e) => {
                tracing::error!("could not list feeds: {}", e);
                self.stats.record_error();
                self.stats.finish_tick(started.elapsed());
                return;
            }
        };
        tracing::info!(feeds = feeds.len(), "tick started");

        let cancel = self.work.child_token();
        let pool = WorkerPool::new("feeds", self.max_workers, cancel.clone());
        for feed in feeds {
            let ingestor = Arc::clone(&self.ingestor);
            let stats = self.stats.clone();
            let cancel = cancel.clone();
            if let Err(e) = pool.submit(ingest_feed(ingestor, stats, feed, cancel)).await {
                tracing::warn!("tick cut short: {}", e);
                break;
            }
        }
        pool.stop_and_wait().await;

        let elapsed = started.elapsed();
        self.stats.finish_tick(elapsed);
        tracing::info!(elapsed = ?elapsed, "tick finished");
        self.maybe_publish();
    }

    /// Spawn a publish run when the publisher says it is due.
    fn maybe_publish(&self) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        if self.publishes.is_closed() || !publisher.should_publish_now(&Local::now()) {
            return;
        }
        let publisher = Arc::clone(publisher);
        let cancel = self.work.child_token();
        self.publishes.spawn(async move {
            if let Err(e) = publisher.perform_publish(Local::now(), &cancel).await {
                tracing::warn!("scheduled publish failed: {}", e);
            }
        });
    }

    fn log_stats(&self) {
        let stats = self.stats.snapshot();
        tracing::info!(
            uptime = ?stats.uptime(chrono::Utc::now()),
            total_fetches = stats.total_fetches,
            feeds_processed = stats.feeds_processed,
            articles_fetched = stats.articles_fetched,
            summaries_generated = stats.summaries_generated,
            errors = stats.errors,
            average_process_time = stats.average_process_time,
            "statistics"
        );
        if let Some(publisher) = &self.publisher {
            let publish = publisher.statistics();
            tracing::info!(
                total = publish.total_publishes,
                successful = publish.successful_publishes,
                failed = publish.failed_publishes,
                last_error = %publish.last_error,
                "publish statistics"
            );
        }
    }

    fn toggle_debug(&self) {
        match &self.log_toggle {
            Some(toggle) => match toggle() {
                Ok(true) => tracing::info!("debug logging on"),
                Ok(false) => tracing::info!("debug logging off"),
                Err(e) => tracing::warn!("could not switch log level: {}", e),
            },
            None => tracing::info!("debug toggle requested, no log control installed"),
        }
    }
}

/// Fetch one feed and push its items through a small pool. Failures are
/// counted and logged; they never stop the tick.
async fn ingest_feed(
    ingestor: Arc<FeedIngestor>,
    stats: StatsTracker,
    feed: Feed,
    cancel: CancellationToken,
) {
    let jobs = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        jobs = ingestor.ingest(&feed) => jobs,
    };
    let jobs = match jobs {
        Ok(jobs) => jobs,
        Err(e) => {
            tracing::error!(feed = %feed.title, url = %feed.url, "feed failed: {}", e);
            stats.record_error();
            return;
        }
    };
    stats.record_feed();

    let pool = WorkerPool::new("items", ITEMS_PER_FEED, cancel.clone());
    for job in jobs {
        let stats = stats.clone();
        let cancel = cancel.clone();
        let submitted = pool
            .submit(async move {
                match job.process(&cancel).await {
                    Ok(()) => {}
                    Err(AppError::Cancelled) => {
                        tracing::debug!(item = %job.display_name(), "item cancelled");
                    }
                    Err(e) => {
                        tracing::error!(item = %job.display_name(), url = %job.url(), "item failed: {}", e);
                        stats.record_error();
                    }
                }
            })
            .await;
        if submitted.is_err() {
            tracing::debug!(feed = %feed.title, "item pool closed, skipping the rest");
            break;
        }
    }
    pool.stop_and_wait().await;
}

fn read_state(state: &RwLock<SchedulerState>) -> SchedulerState {
    *state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cloneable control side of a [`Scheduler`].
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<Command>,
    state: Arc<RwLock<SchedulerState>>,
    work: CancellationToken,
}

impl SchedulerHandle {
    pub async fn send(&self, command: Command) -> Result<()> {
        self.sender
            .send(command)
            .await
            .map_err(|_| AppError::Daemon("scheduler is gone".into()))
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(Command::Stop).await
    }

    /// Cancels in-flight work at once, then asks the loop to drain.
    pub async fn shutdown(&self) -> Result<()> {
        self.work.cancel();
        self.send(Command::Shutdown).await
    }

    pub async fn reload(&self) -> Result<()> {
        self.send(Command::Reload).await
    }

    pub async fn dump_stats(&self) -> Result<()> {
        self.send(Command::DumpStats).await
    }

    pub async fn toggle_debug(&self) -> Result<()> {
        self.send(Command::ToggleDebug).await
    }

    /// Resolves once a shutdown has been requested.
    pub async fn shutdown_requested(&self) {
        self.work.cancelled().await
    }

    pub fn state(&self) -> SchedulerState {
        read_state(&self.state)
    }

    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Running
    }
}
