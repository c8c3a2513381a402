//! The long-running service: scheduler, pid file, signals and the health
//! server.

mod health;
mod pid;
mod scheduler;
mod signals;
mod stats;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::ai::Summarizer;
use crate::config::Config;
use crate::db::Store;
use crate::error::{AppError, Result};
use crate::feed::{FeedFetcher, FeedIngestor};
use crate::pipeline::ArticleProcessor;
use crate::publish::Publisher;

pub use health::{
    evaluate, render_metrics, router, serve, CheckResult, CheckStatus, HealthChecker,
    HealthReport, HealthStatus, Observed,
};
pub use pid::{is_alive, PidFile};
pub use scheduler::{
    Command, LogToggle, Scheduler, SchedulerHandle, SchedulerState, ITEMS_PER_FEED,
};
pub use signals::dispatch as dispatch_signals;
pub use stats::{two_point_mean, Statistics, StatsTracker};

/// How long in-flight work may run after a shutdown request.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Wire a scheduler from config: real feed fetcher, Gemini summarizer and
/// whatever audio and sidecar output the config enables.
pub fn build_scheduler(config: &Config, store: Store, stats: StatsTracker) -> Result<Scheduler> {
    let api_key = config
        .gemini_key()
        .ok_or_else(|| AppError::Config("gemini_api_key is not set".into()))?;
    let summarizer = Arc::new(Summarizer::new(api_key.to_string(), config.prompt.summary.clone())?);
    let processor = Arc::new(ArticleProcessor::from_config(config, store.clone(), summarizer)?);
    let ingestor = FeedIngestor::new(Arc::new(FeedFetcher::new()?), store.clone(), processor)
        .with_stats(stats.clone());
    Ok(Scheduler::new(
        store,
        Arc::new(ingestor),
        stats,
        config.interval()?,
        config.daemon.max_workers,
    ))
}

/// `daemon start` overrides on top of `[daemon]`.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub interval: Duration,
    pub max_workers: usize,
    pub pid_file: PidFile,
    pub health_check_port: u16,
}

impl DaemonOptions {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            interval: config.interval()?,
            max_workers: config.daemon.max_workers,
            pid_file: PidFile::new(&config.daemon.pid_file),
            health_check_port: config.daemon.health_check_port,
        })
    }
}

pub struct Daemon {
    config: Config,
    options: DaemonOptions,
    log_toggle: Option<LogToggle>,
    cancel: CancellationToken,
}

impl Daemon {
    pub fn new(config: Config, options: DaemonOptions) -> Self {
        Self {
            config,
            options,
            log_toggle: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Also stop when `cancel` fires, the same way a termination signal does.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_log_toggle(mut self, toggle: LogToggle) -> Self {
        self.log_toggle = Some(toggle);
        self
    }

    /// Run in the foreground until a termination signal. The pid file is
    /// written first and removed on the way out.
    pub async fn run(self) -> Result<()> {
        let pid_file = self.options.pid_file.clone();
        pid_file.write()?;
        tracing::info!(pid = std::process::id(), path = %pid_file.path().display(), "daemon starting");

        let result = self.serve().await;

        if let Err(e) = pid_file.remove() {
            tracing::warn!("could not remove pid file: {}", e);
        }
        match &result {
            Ok(()) => tracing::info!("daemon stopped"),
            Err(e) => tracing::error!("daemon stopped with error: {}", e),
        }
        result
    }

    async fn serve(self) -> Result<()> {
        let store = Store::open(&self.config.db_path()).await?;
        let stats = StatsTracker::new();

        let mut config = self.config;
        config.daemon.max_workers = self.options.max_workers;
        let mut scheduler =
            build_scheduler(&config, store.clone(), stats.clone())?.with_interval(self.options.interval);

        let publisher = Publisher::for_daemon(&config, store.clone())?.map(Arc::new);
        if let Some(publisher) = &publisher {
            tracing::info!(schedule = ?publisher.schedule(), "publishing enabled");
            scheduler = scheduler.with_publisher(Arc::clone(publisher));
        }
        if let Some(toggle) = self.log_toggle {
            scheduler = scheduler.with_log_toggle(toggle);
        }

        let handle = scheduler.handle();
        let ctx = self.cancel;
        let background = TaskTracker::new();

        {
            let handle = handle.clone();
            let ctx = ctx.clone();
            background.spawn(async move {
                if let Err(e) = dispatch_signals(handle, ctx).await {
                    tracing::error!("signal handling failed: {}", e);
                }
            });
        }

        let port = self.options.health_check_port;
        if port != 0 {
            let checker = Arc::new(HealthChecker::new(store, stats, handle.clone(), publisher));
            let ctx = ctx.clone();
            background.spawn(async move {
                if let Err(e) = serve(checker, port, ctx).await {
                    tracing::error!("health server failed: {}", e);
                }
            });
        }

        let scheduler = Arc::new(scheduler);
        let mut run = {
            let scheduler = Arc::clone(&scheduler);
            let ctx = ctx.clone();
            tokio::spawn(async move { scheduler.run(ctx).await })
        };

        let joined = tokio::select! {
            joined = &mut run => Some(joined),
            _ = handle.shutdown_requested() => {
                match tokio::time::timeout(SHUTDOWN_GRACE, &mut run).await {
                    Ok(joined) => Some(joined),
                    Err(_) => {
                        tracing::warn!("work still running after {:?}, exiting anyway", SHUTDOWN_GRACE);
                        run.abort();
                        None
                    }
                }
            }
        };

        ctx.cancel();
        background.close();
        if tokio::time::timeout(Duration::from_secs(5), background.wait()).await.is_err() {
            tracing::warn!("background tasks did not stop in time");
        }

        match joined {
            None | Some(Ok(Ok(()))) | Some(Ok(Err(AppError::Cancelled))) => Ok(()),
            Some(Ok(Err(e))) => Err(e),
            Some(Err(e)) => Err(AppError::Daemon(format!("scheduler task failed: {e}"))),
        }
    }
}
