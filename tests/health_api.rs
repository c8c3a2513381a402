//! The health router, driven with `oneshot` requests.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use quicknews::daemon::{router, HealthChecker, Scheduler, StatsTracker};
use quicknews::db::Store;
use quicknews::pipeline::ArticleProcessor;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;

use common::{scheduler, wait_for, Canned};

struct Running {
    scheduler: Arc<Scheduler>,
    app: axum::Router,
    stats: StatsTracker,
    ctx: CancellationToken,
    run: JoinHandle<quicknews::error::Result<()>>,
}

impl Running {
    async fn stop(self) {
        self.ctx.cancel();
        let _ = self.run.await;
    }
}

/// A scheduler running its loop over an empty store, with the router on
/// top. Returns after the first tick.
async fn running() -> Running {
    let store = Store::open_in_memory().await.unwrap();
    let stats = StatsTracker::new();
    let processor = ArticleProcessor::new(store.clone(), Canned::new("T\n-----\nB\n"));
    let scheduler = Arc::new(scheduler(
        &store,
        processor,
        Vec::new(),
        stats.clone(),
        Duration::from_secs(3600),
    ));
    let handle = scheduler.handle();
    let checker = Arc::new(HealthChecker::new(store, stats.clone(), handle.clone(), None));

    let ctx = CancellationToken::new();
    let run = {
        let scheduler = Arc::clone(&scheduler);
        let ctx = ctx.clone();
        tokio::spawn(async move { scheduler.run(ctx).await })
    };
    wait_for(|| handle.is_running() && stats.snapshot().total_fetches == 1).await;

    Running {
        scheduler,
        app: router(checker),
        stats,
        ctx,
        run,
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn healthy_daemon_reports_ok() {
    let running = running().await;

    let response = running.app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let report: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(report["status"], "healthy");
    assert_eq!(report["checks"]["daemon_ready"]["status"], "pass");
    assert_eq!(report["checks"]["database"]["status"], "pass");
    assert_eq!(report["statistics"]["total_fetches"], 1);
    assert!(report["uptime"].is_u64());
    assert!(report.get("publish_statistics").is_none());

    let live = running.app.clone().oneshot(get("/health/live")).await.unwrap();
    assert_eq!(live.status(), StatusCode::OK);
    assert_eq!(body_text(live).await, "OK");

    let ready = running.app.clone().oneshot(get("/health/ready")).await.unwrap();
    assert_eq!(ready.status(), StatusCode::OK);

    running.stop().await;
}

#[tokio::test]
async fn high_error_rate_is_unavailable() {
    let running = running().await;
    running.stats.record_error();

    let response = running.app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let report: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(report["status"], "unhealthy");
    assert_eq!(report["checks"]["error_rate"]["status"], "fail");

    // Liveness only cares about the loop.
    let live = running.app.clone().oneshot(get("/health/live")).await.unwrap();
    assert_eq!(live.status(), StatusCode::OK);

    running.stop().await;
}

#[tokio::test]
async fn stopped_scheduler_is_not_live() {
    let running = running().await;
    let app = running.app.clone();
    let scheduler = Arc::clone(&running.scheduler);
    running.stop().await;
    assert!(!scheduler.handle().is_running());

    let live = app.clone().oneshot(get("/health/live")).await.unwrap();
    assert_eq!(live.status(), StatusCode::SERVICE_UNAVAILABLE);
    let ready = app.oneshot(get("/health/ready")).await.unwrap();
    assert_eq!(ready.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn metrics_and_stats_endpoints() {
    let running = running().await;

    let response = running.app.clone().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"));
    let text = body_text(response).await;
    assert!(text.contains("# TYPE quicknews_total_fetches_total counter"));
    assert!(text.contains("quicknews_total_fetches_total 1"));
    assert!(text.contains("quicknews_errors_total 0"));

    let response = running.app.clone().oneshot(get("/stats")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let stats: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(stats["statistics"]["feeds_processed"], 0);

    running.stop().await;
}
