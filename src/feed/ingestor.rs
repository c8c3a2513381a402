use std::sync::Arc;

use crate::daemon::StatsTracker;
use crate::db::Store;
use crate::error::Result;
use crate::models::Feed;
use crate::pipeline::{ArticleProcessor, ItemJob};

use super::FeedSource;

/// Fetches one feed, refreshes its metadata and turns each item into a job.
pub struct FeedIngestor {
    source: Arc<dyn FeedSource>,
    store: Store,
    processor: Arc<ArticleProcessor>,
    stats: Option<StatsTracker>,
}

impl FeedIngestor {
    pub fn new(source: Arc<dyn FeedSource>, store: Store, processor: Arc<ArticleProcessor>) -> Self {
        Self {
            source,
            store,
            processor,
            stats: None,
        }
    }

    /// Jobs created from here on count their results into `stats`.
    pub fn with_stats(mut self, stats: StatsTracker) -> Self {
        self.stats = Some(stats);
        self
    }

    /// One job per parsed item, in parser order.
    pub async fn ingest(&self, feed: &Feed) -> Result<Vec<ItemJob>> {
        let parsed = self.source.fetch(&feed.url).await?;
        let updated = Arc::new(self.store.feeds.update_from_parsed(feed, &parsed).await?);
        tracing::debug!(feed = %updated.title, items = parsed.items.len(), "feed fetched");

        Ok(parsed
            .items
            .into_iter()
            .map(|item| {
                ItemJob::new(
                    Arc::clone(&updated),
                    item,
                    Arc::clone(&self.processor),
                    self.stats.clone(),
                )
            })
            .collect())
    }
}
