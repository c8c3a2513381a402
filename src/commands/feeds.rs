use std::path::{Path, PathBuf};

use anyhow::anyhow;
use futures::stream::{self, StreamExt};

use crate::config::Config;
use crate::daemon::{build_scheduler, StatsTracker};
use crate::error::{AppError, Result};
use crate::feed::{export_opml as render_opml, parse_opml_file, FeedFetcher};

use super::open_store;

const DISCOVERY_CONCURRENCY: usize = 5;

/// Discover each url's feed and subscribe to it. Urls already subscribed are
/// reported and skipped; the command fails only when nothing could be added.
pub async fn add(config: &Config, urls: &[String]) -> Result<()> {
    let store = open_store(config).await?;
    let fetcher = FeedFetcher::new()?;

    let mut pending = Vec::new();
    for url in urls {
        if store.feeds.exists_by_url(url).await? {
            println!("Already subscribed: {url}");
        } else {
            pending.push(url.as_str());
        }
    }

    // Discovery runs a few at a time; results come back in input order.
    let discovered: Vec<_> = stream::iter(pending.iter().copied())
        .map(|url| {
            let fetcher = &fetcher;
            async move { (url, fetcher.discover_feed(url).await) }
        })
        .buffered(DISCOVERY_CONCURRENCY)
        .collect()
        .await;

    let mut failed = 0;
    for (url, result) in discovered {
        match result {
            Ok(feed) => {
                let title = feed.title.clone();
                let feed_url = feed.url.clone();
                if store.feeds.save_many(vec![feed], false).await? == 0 {
                    println!("Already subscribed: {feed_url}");
                } else {
                    println!("Added: {title} ({feed_url})");
                }
            }
            Err(e) => {
                tracing::warn!(%url, "feed discovery failed: {}", e);
                eprintln!("Failed to add {url}: {e}");
                failed += 1;
            }
        }
    }

    if failed > 0 && failed == urls.len() {
        return Err(AppError::Other(anyhow!("no feeds could be added")));
    }
    Ok(())
}

pub async fn import(config: &Config, path: &Path) -> Result<()> {
    let feeds = parse_opml_file(path)?;
    let total = feeds.len();
    let store = open_store(config).await?;
    let added = store.feeds.save_many(feeds, false).await?;
    println!(
        "Imported {added} feeds from {} ({} already present)",
        path.display(),
        total - added
    );
    Ok(())
}

/// Write every regular feed as OPML to `output`, or stdout when absent.
pub async fn export_opml(config: &Config, output: Option<PathBuf>) -> Result<()> {
    let store = open_store(config).await?;
    let feeds: Vec<_> = store
        .feeds
        .list()
        .await?
        .into_iter()
        .filter(|feed| !feed.is_bookmark)
        .collect();
    let document = render_opml(&feeds)?;

    match output {
        Some(path) => {
            tokio::fs::write(&path, document).await?;
            println!("Exported {} feeds to {}", feeds.len(), path.display());
        }
        None => println!("{document}"),
    }
    Ok(())
}

/// A single ingest pass, the same one the daemon runs on every tick.
pub async fn fetch(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let stats = StatsTracker::new();
    let scheduler = build_scheduler(config, store, stats.clone())?;
    scheduler.run_once().await;

    let stats = stats.snapshot();
    println!(
        "Fetched {} feeds: {} new articles, {} digests, {} errors",
        stats.feeds_processed, stats.articles_fetched, stats.summaries_generated, stats.errors
    );
    Ok(())
}
