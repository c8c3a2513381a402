//! Health, readiness and metrics over HTTP.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::db::Store;
use crate::error::Result;
use crate::publish::{PublishStatistics, Publisher};

use super::scheduler::SchedulerHandle;
use super::stats::{Statistics, StatsTracker};

/// Seconds without a fetch before activity counts as stale.
const STALE_AFTER_SECS: i64 = 2 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn status_code(self) -> StatusCode {
        match self {
            Self::Healthy | Self::Degraded => StatusCode::OK,
            Self::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub status: CheckStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    /// Seconds.
    pub uptime: u64,
    pub version: &'static str,
    pub statistics: Statistics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_statistics: Option<PublishStatistics>,
    pub checks: BTreeMap<String, CheckResult>,
}

impl HealthReport {
    pub fn check(&self, name: &str) -> Option<CheckStatus> {
        self.checks.get(name).map(|c| c.status)
    }

    pub fn is_ready(&self) -> bool {
        self.check("daemon_ready") == Some(CheckStatus::Pass)
            && self.check("database") == Some(CheckStatus::Pass)
    }
}

/// Inputs gathered by [`HealthChecker::report`].
#[derive(Debug, Clone)]
pub struct Observed {
    pub running: bool,
    /// `Err` carries the database probe failure.
    pub database: std::result::Result<(), String>,
    pub statistics: Statistics,
    pub publish: Option<PublishStatistics>,
}

fn rate_status(rate: f64) -> CheckStatus {
    if rate < 0.1 {
        CheckStatus::Pass
    } else if rate < 0.5 {
        CheckStatus::Warn
    } else {
        CheckStatus::Fail
    }
}

/// Turn observations into a report. Any failing check makes the daemon
/// unhealthy, any warning makes it degraded.
pub fn evaluate(now: DateTime<Utc>, observed: Observed) -> HealthReport {
    let mut checks = BTreeMap::new();
    let mut add = |name: &str, status: CheckStatus, message: String| {
        checks.insert(
            name.to_string(),
            CheckResult {
                status,
                message,
                timestamp: now,
            },
        );
    };

    if observed.running {
        add("daemon_ready", CheckStatus::Pass, "scheduler is running".into());
    } else {
        add("daemon_ready", CheckStatus::Fail, "scheduler is not running".into());
    }

    match &observed.database {
        Ok(()) => add("database", CheckStatus::Pass, "database reachable".into()),
        Err(e) => add("database", CheckStatus::Fail, format!("database probe failed: {e}")),
    }

    let stats = &observed.statistics;
    match stats.last_fetch_time {
        Some(last) if stats.total_fetches > 0 && (now - last).num_seconds() > STALE_AFTER_SECS => add(
            "recent_activity",
            CheckStatus::Warn,
            format!("no fetch since {}", last.to_rfc3339()),
        ),
        Some(last) => add(
            "recent_activity",
            CheckStatus::Pass,
            format!("last fetch at {}", last.to_rfc3339()),
        ),
        None => add("recent_activity", CheckStatus::Pass, "no fetch yet".into()),
    }

    let rate = stats.error_rate();
    add(
        "error_rate",
        rate_status(rate),
        format!("{:.1}% of {} fetches failed", rate * 100.0, stats.total_fetches),
    );

    if let Some(publish) = &observed.publish {
        let rate = publish.failure_rate();
        let mut status = rate_status(rate);
        let mut message = format!("{:.1}% of {} publishes failed", rate * 100.0, publish.total_publishes);
        if !publish.last_error.is_empty() {
            status = status.max(CheckStatus::Warn);
            message = format!("{message}; last error: {}", publish.last_error);
        }
        add("publish_status", status, message);
    }

    let worst = checks.values().map(|c| c.status).max().unwrap_or(CheckStatus::Pass);
    let status = match worst {
        CheckStatus::Pass => HealthStatus::Healthy,
        CheckStatus::Warn => HealthStatus::Degraded,
        CheckStatus::Fail => HealthStatus::Unhealthy,
    };

    HealthReport {
        status,
        timestamp: now,
        uptime: observed.statistics.uptime(now).as_secs(),
        version: env!("CARGO_PKG_VERSION"),
        statistics: observed.statistics,
        publish_statistics: observed.publish,
        checks,
    }
}

/// Prometheus text exposition of the ingest counters.
pub fn render_metrics(stats: &Statistics, now: DateTime<Utc>) -> String {
    let metrics: [(&str, &str, &str, String); 7] = [
        ("uptime_seconds", "gauge", "Seconds since the daemon started.", stats.uptime(now).as_secs().to_string()),
        ("total_fetches_total", "counter", "Scheduler ticks run.", stats.total_fetches.to_string()),
        ("feeds_processed_total", "counter", "Feeds fetched successfully.", stats.feeds_processed.to_string()),
        ("articles_fetched_total", "counter", "Articles stored.", stats.articles_fetched.to_string()),
        ("summaries_generated_total", "counter", "Digests generated.", stats.summaries_generated.to_string()),
        ("errors_total", "counter", "Feed and item failures.", stats.errors.to_string()),
        ("average_process_time_seconds", "gauge", "Two-point mean of tick durations.", stats.average_process_time.to_string()),
    ];

    let mut out = String::new();
    for (name, kind, help, value) in metrics {
        let _ = writeln!(out, "# HELP quicknews_{name} {help}");
        let _ = writeln!(out, "# TYPE quicknews_{name} {kind}");
        let _ = writeln!(out, "quicknews_{name} {value}");
    }
    out
}

pub struct HealthChecker {
    store: Store,
    stats: StatsTracker,
    scheduler: SchedulerHandle,
    publisher: Option<Arc<Publisher>>,
}

impl HealthChecker {
    pub fn new(
        store: Store,
        stats: StatsTracker,
        scheduler: SchedulerHandle,
        publisher: Option<Arc<Publisher>>,
    ) -> Self {
        Self {
            store,
            stats,
            scheduler,
            publisher,
        }
    }

    pub async fn report(&self) -> HealthReport {
        let database = self
            .store
            .feeds
            .count()
            .await
            .map(|_| ())
            .map_err(|e| e.to_string());
        evaluate(
            Utc::now(),
            Observed {
                running: self.scheduler.is_running(),
                database,
                statistics: self.stats.snapshot(),
                publish: self.publisher.as_ref().map(|p| p.statistics()),
            },
        )
    }
}

#[derive(Serialize)]
struct StatsResponse {
    statistics: Statistics,
    #[serde(skip_serializing_if = "Option::is_none")]
    publish_statistics: Option<PublishStatistics>,
}

pub fn router(checker: Arc<HealthChecker>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/live", get(live))
        .route("/health/ready", get(ready))
        .route("/stats", get(stats))
        .route("/metrics", get(metrics))
        .with_state(checker)
}

async fn health(State(checker): State<Arc<HealthChecker>>) -> Response {
    let report = checker.report().await;
    (report.status.status_code(), Json(report)).into_response()
}

async fn live(State(checker): State<Arc<HealthChecker>>) -> (StatusCode, &'static str) {
    if checker.scheduler.is_running() {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT RUNNING")
    }
}

async fn ready(State(checker): State<Arc<HealthChecker>>) -> (StatusCode, &'static str) {
    if checker.report().await.is_ready() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn stats(State(checker): State<Arc<HealthChecker>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        statistics: checker.stats.snapshot(),
        publish_statistics: checker.publisher.as_ref().map(|p| p.statistics()),
    })
}

async fn metrics(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        render_metrics(&checker.stats.snapshot(), Utc::now()),
    )
}

/// Serve until `cancel` fires.
pub async fn serve(checker: Arc<HealthChecker>, port: u16, cancel: CancellationToken) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("health server listening on {}", addr);
    axum::serve(listener, router(checker))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    tracing::info!("health server stopped");
    Ok(())
}
