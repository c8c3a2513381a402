use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::ai::{summarize_with_retry, Summarize};
use crate::audio::{synthesizer_from_config, AudioLibrary, AudioOutcome, SpeechSynthesizer};
use crate::config::Config;
use crate::db::Store;
use crate::error::{AppError, Result};
use crate::models::{Article, Feed, FeedItem, NewArticle, NewDigest};

use super::write_org;

/// What one `process` call created.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ItemOutcome {
    pub article_created: bool,
    pub digest_created: bool,
    pub audio_stored: bool,
}

/// Turns a feed item into an article, a digest and optionally audio and an
/// `.org` sidecar. Safe to run concurrently for the same url: the store's
/// unique constraints decide, and a lost race is a no-op.
pub struct ArticleProcessor {
    store: Store,
    summarizer: Arc<dyn Summarize>,
    audio: Option<(AudioLibrary, Arc<dyn SpeechSynthesizer>)>,
    org_dir: Option<PathBuf>,
}

impl ArticleProcessor {
    pub fn new(store: Store, summarizer: Arc<dyn Summarize>) -> Self {
        Self {
            store,
            summarizer,
            audio: None,
            org_dir: None,
        }
    }

    pub fn with_audio(mut self, library: AudioLibrary, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        self.audio = Some((library, synthesizer));
        self
    }

    pub fn with_org_export(mut self, dir: PathBuf) -> Self {
        self.org_dir = Some(dir);
        self
    }

    /// Audio is produced only with `save_audio_data` and an audio directory.
    pub fn from_config(config: &Config, store: Store, summarizer: Arc<dyn Summarize>) -> Result<Self> {
        let mut processor = Self::new(store, summarizer);
        match (config.save_audio_data, config.audio_dir()) {
            (true, Some(dir)) => {
                processor = processor.with_audio(AudioLibrary::new(dir), synthesizer_from_config(config)?);
            }
            (true, None) => tracing::warn!("save_audio_data is set but no audio directory is configured"),
            _ => {}
        }
        if let Some(dir) = config.export_org_dir() {
            processor = processor.with_org_export(dir);
        }
        Ok(processor)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub async fn process(
        &self,
        feed: &Feed,
        item: &FeedItem,
        cancel: &CancellationToken,
    ) -> Result<ItemOutcome> {
        let mut outcome = ItemOutcome::default();
        if item.link.trim().is_empty() {
            tracing::warn!(feed = %feed.title, title = %item.title, "item has no link, skipping");
            return Ok(outcome);
        }

        let article = match self.store.articles.get_by_url(&item.link).await? {
            Some(article) => article,
            None => match self.create_article(feed, item).await? {
                Some(article) => {
                    outcome.article_created = true;
                    article
                }
                None => return Ok(outcome),
            },
        };

        if article.digest.is_some() {
            return Ok(outcome);
        }
        self.summarize_article(feed, &article, cancel, &mut outcome).await?;
        Ok(outcome)
    }

    /// Save the article, or `None` when another worker saved it first.
    async fn create_article(&self, feed: &Feed, item: &FeedItem) -> Result<Option<Article>> {
        let new_article = NewArticle {
            feed_id: feed.id,
            url: item.link.clone(),
            title: item.title.clone(),
            description: item.description.clone(),
            content: item.content.clone(),
            published_at: item.published.or(item.updated),
        };
        match self.store.articles.save(new_article).await {
            Ok(article) => {
                tracing::debug!(url = %article.url, "article saved");
                Ok(Some(article))
            }
            Err(e) if e.is_duplicate() => {
                tracing::debug!(url = %item.link, "article saved concurrently");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Summarize an article that has no digest yet, then attach audio and
    /// the sidecar when configured.
    pub async fn summarize_article(
        &self,
        feed: &Feed,
        article: &Article,
        cancel: &CancellationToken,
        outcome: &mut ItemOutcome,
    ) -> Result<()> {
        let text = summarize_with_retry(self.summarizer.as_ref(), &article.url, cancel).await?;

        let digest = match self
            .store
            .digests
            .save(NewDigest {
                url: article.url.clone(),
                title: text.title,
                body: text.body,
                article_id: article.id,
                feed_id: feed.id,
            })
            .await
        {
            Ok(digest) => digest,
            Err(e) if e.is_duplicate() => {
                tracing::debug!(url = %article.url, "digest saved concurrently");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        outcome.digest_created = true;
        tracing::info!(feed = %feed.title, title = %digest.title_str(), "digest created");

        if let Some((library, synthesizer)) = &self.audio {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            let result = library
                .materialize(&self.store, synthesizer.as_ref(), feed, &digest)
                .await?;
            outcome.audio_stored = matches!(result, AudioOutcome::Stored(_));
        }

        if let Some(dir) = &self.org_dir {
            let path = write_org(dir, feed, article, &digest).await?;
            tracing::debug!(path = %path.display(), "org sidecar written");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{parse_reply, DigestText};
    use crate::models::NewFeed;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Canned {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Summarize for Canned {
        async fn summarize(&self, _url: &str) -> Result<DigestText> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            parse_reply("T\n-----\nB\n")
        }
    }

    struct Silent;

    #[async_trait]
    impl SpeechSynthesizer for Silent {
        fn name(&self) -> &'static str {
            "silent"
        }

        async fn synthesize(&self, _text: &str) -> Result<Vec<u8>> {
            Ok(vec![0xFF, 0xFB, 0x90, 0x00])
        }
    }

    async fn setup() -> (Store, Feed, Arc<Canned>) {
        let store = Store::open_in_memory().await.unwrap();
        store
            .feeds
            .save_many(vec![NewFeed::new("https://a.example/rss", "Tech News")], false)
            .await
            .unwrap();
        let feed = store.feeds.list().await.unwrap().remove(0);
        (store, feed, Arc::new(Canned { calls: AtomicU32::new(0) }))
    }

    fn item(link: &str) -> FeedItem {
        FeedItem {
            title: "I".into(),
            link: link.into(),
            ..FeedItem::default()
        }
    }

    #[tokio::test]
    async fn creates_article_and_digest_once() {
        let (store, feed, summarizer) = setup().await;
        let processor = ArticleProcessor::new(store.clone(), summarizer.clone());
        let cancel = CancellationToken::new();

        let first = processor.process(&feed, &item("https://x/a"), &cancel).await.unwrap();
        assert!(first.article_created && first.digest_created);

        let second = processor.process(&feed, &item("https://x/a"), &cancel).await.unwrap();
        assert_eq!(second, ItemOutcome::default());
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);

        let article = store.articles.get_by_url("https://x/a").await.unwrap().unwrap();
        assert_eq!(article.title, "I");
        let digest = article.digest.unwrap();
        assert_eq!((digest.title_str(), digest.body_str()), ("T", "B"));
        assert!(!digest.readed && !digest.listened);
    }

    #[tokio::test]
    async fn concurrent_runs_for_one_url_insert_once() {
        let (store, feed, summarizer) = setup().await;
        let processor = Arc::new(ArticleProcessor::new(store.clone(), summarizer));
        let feed = Arc::new(feed);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let processor = Arc::clone(&processor);
                let feed = Arc::clone(&feed);
                tokio::spawn(async move {
                    processor
                        .process(&feed, &item("https://x/race"), &CancellationToken::new())
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.articles.get_by_feed(feed.id).await.unwrap().len(), 1);
        assert_eq!(store.digests.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_link_is_skipped() {
        let (store, feed, summarizer) = setup().await;
        let processor = ArticleProcessor::new(store.clone(), summarizer);
        let outcome = processor
            .process(&feed, &item("  "), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, ItemOutcome::default());
        assert_eq!(store.counts().await.unwrap().articles, 0);
    }

    #[tokio::test]
    async fn writes_audio_and_org_sidecar() {
        let (store, feed, summarizer) = setup().await;
        let audio_dir = tempfile::tempdir().unwrap();
        let org_dir = tempfile::tempdir().unwrap();
        let processor = ArticleProcessor::new(store.clone(), summarizer)
            .with_audio(AudioLibrary::new(audio_dir.path()), Arc::new(Silent))
            .with_org_export(org_dir.path().to_path_buf());

        let outcome = processor
            .process(&feed, &item("https://x/a"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.audio_stored);

        let digest = store.digests.get_by_url("https://x/a").await.unwrap().unwrap();
        let name = digest.audio_file.unwrap();
        assert!(audio_dir.path().join("Tech_News").join(&name).is_file());

        let org_files: Vec<_> = std::fs::read_dir(org_dir.path().join("Tech_News"))
            .unwrap()
            .collect();
        assert_eq!(org_files.len(), 1);
    }
}
