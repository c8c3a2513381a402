use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::ai::Summarizer;
use crate::audio::AudioLibrary;
use crate::config::Config;
use crate::db::Store;
use crate::error::{AppError, Result};
use crate::models::{Article, Feed, NewArticle};
use crate::pipeline::{ArticleProcessor, ItemOutcome};
use crate::services::TitleScraper;

use super::open_store;

/// File each url under the bookmark feed. Known articles are moved along
/// with their digest; unknown pages are saved under their `<title>` and
/// summarized.
pub async fn bookmark(config: &Config, urls: &[String]) -> Result<()> {
    let store = open_store(config).await?;
    let bookmarks = store.feeds.ensure_bookmark().await?;
    let cancel = CancellationToken::new();
    let mut processor: Option<ArticleProcessor> = None;
    let mut scraper: Option<TitleScraper> = None;
    let library = config.audio_dir().map(AudioLibrary::new);

    for url in urls {
        let article = match store.articles.get_by_url(url).await? {
            Some(article) => {
                move_to_bookmarks(&store, library.as_ref(), &bookmarks, &article).await?;
                if let Some(digest) = &article.digest {
                    println!("Bookmarked: {}", digest.title_str());
                    continue;
                }
                article
            }
            None => {
                let scraper = match scraper.as_mut() {
                    Some(scraper) => scraper,
                    None => scraper.insert(TitleScraper::new()?),
                };
                save_page(&store, scraper, &bookmarks, url).await?
            }
        };

        let processor = match processor.as_mut() {
            Some(processor) => processor,
            None => processor.insert(summarizing_processor(config, store.clone())?),
        };
        let mut outcome = ItemOutcome::default();
        processor
            .summarize_article(&bookmarks, &article, &cancel, &mut outcome)
            .await?;
        println!("Bookmarked: {}", article.title);
    }
    Ok(())
}

/// Re-home a known article and its digest under the bookmark feed. The
/// digest's audio file moves with it so later lookups find it.
async fn move_to_bookmarks(
    store: &Store,
    library: Option<&AudioLibrary>,
    bookmarks: &Feed,
    article: &Article,
) -> Result<()> {
    if article.feed_id != bookmarks.id {
        store.articles.move_to_feed(article.id, bookmarks.id).await?;
    }
    let Some(digest) = &article.digest else {
        return Ok(());
    };
    if digest.feed_id == bookmarks.id {
        return Ok(());
    }
    if let (Some(library), Some(previous)) = (library, store.feeds.get(digest.feed_id).await?) {
        library.relocate(&previous, bookmarks, digest).await?;
    }
    store.digests.move_to_feed(digest.id, bookmarks.id).await
}

async fn save_page(store: &Store, scraper: &TitleScraper, feed: &Feed, url: &str) -> Result<Article> {
    let title = match scraper.fetch_title(url).await {
        Ok(title) => title,
        Err(e) => {
            tracing::warn!(%url, "could not read page title: {}", e);
            url.to_string()
        }
    };
    store
        .articles
        .save(NewArticle {
            feed_id: feed.id,
            url: url.to_string(),
            title,
            description: None,
            content: None,
            published_at: None,
        })
        .await
}

fn summarizing_processor(config: &Config, store: Store) -> Result<ArticleProcessor> {
    let api_key = config
        .gemini_key()
        .ok_or_else(|| AppError::Config("gemini_api_key is not set".into()))?;
    let summarizer = Arc::new(Summarizer::new(api_key.to_string(), config.prompt.summary.clone())?);
    ArticleProcessor::from_config(config, store, summarizer)
}
