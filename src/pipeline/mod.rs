mod org;
mod pool;
mod processor;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::daemon::StatsTracker;
use crate::error::Result;
use crate::models::{Feed, FeedItem};

pub use org::{org_path, render_org, write_org};
pub use pool::WorkerPool;
pub use processor::{ArticleProcessor, ItemOutcome};

/// A unit of work the scheduler or the reader can queue.
#[async_trait]
pub trait QueueItem: Send + Sync {
    fn display_name(&self) -> String;
    fn url(&self) -> &str;
    async fn process(&self, cancel: &CancellationToken) -> Result<()>;
}

/// One parsed feed item waiting to become an article and a digest.
pub struct ItemJob {
    feed: Arc<Feed>,
    item: FeedItem,
    processor: Arc<ArticleProcessor>,
    stats: Option<StatsTracker>,
}

impl ItemJob {
    pub fn new(
        feed: Arc<Feed>,
        item: FeedItem,
        processor: Arc<ArticleProcessor>,
        stats: Option<StatsTracker>,
    ) -> Self {
        Self {
            feed,
            item,
            processor,
            stats,
        }
    }

    pub fn feed(&self) -> &Feed {
        &self.feed
    }

    pub fn item(&self) -> &FeedItem {
        &self.item
    }
}

#[async_trait]
impl QueueItem for ItemJob {
    fn display_name(&self) -> String {
        format!("{} / {}", self.feed.title, self.item.title)
    }

    fn url(&self) -> &str {
        &self.item.link
    }

    async fn process(&self, cancel: &CancellationToken) -> Result<()> {
        let outcome = self.processor.process(&self.feed, &self.item, cancel).await?;
        if let Some(stats) = &self.stats {
            if outcome.article_created {
                stats.record_article();
            }
            if outcome.digest_created {
                stats.record_summary();
            }
        }
        Ok(())
    }
}
