use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::audio::{AudioLibrary, Speaker, SpeechSynthesizer};
use crate::daemon::{Scheduler, Statistics};
use crate::db::Store;
use crate::error::Result;
use crate::models::{Article, Feed};
use crate::tui::AppAction;

const SPINNER: [char; 4] = ['|', '/', '-', '\\'];
const DETAIL_WIDTH: usize = 80;

// Message for a finished background refresh
pub struct RefreshResult {
    pub result: std::result::Result<Statistics, String>,
}

// Message for a finished playback
pub struct PlayResult {
    pub digest_id: Uuid,
    pub result: std::result::Result<(), String>,
}

/// Optional services the reader can drive. Each is `None` when the config
/// does not allow it.
#[derive(Default)]
pub struct ReaderServices {
    pub scheduler: Option<Arc<Scheduler>>,
    pub library: Option<AudioLibrary>,
    pub synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
}

pub struct App {
    // Data
    pub feeds: Vec<Feed>,
    pub feed_index: usize,
    pub articles: Vec<Article>,

    // UI State
    pub selected_index: usize,
    pub show_help: bool,
    pub status: Option<String>,
    spinner_frame: usize,

    // Async state
    pub is_refreshing: bool,
    pub playing: Option<Uuid>,
    refresh_rx: mpsc::Receiver<RefreshResult>,
    refresh_tx: mpsc::Sender<RefreshResult>,
    play_rx: mpsc::Receiver<PlayResult>,
    play_tx: mpsc::Sender<PlayResult>,

    // Services
    store: Store,
    services: ReaderServices,
}

impl App {
    pub async fn new(store: Store, services: ReaderServices) -> Result<Self> {
        let (refresh_tx, refresh_rx) = mpsc::channel(1);
        let (play_tx, play_rx) = mpsc::channel(1);

        let mut app = Self {
            feeds: Vec::new(),
            feed_index: 0,
            articles: Vec::new(),
            selected_index: 0,
            show_help: false,
            status: None,
            spinner_frame: 0,
            is_refreshing: false,
            playing: None,
            refresh_rx,
            refresh_tx,
            play_rx,
            play_tx,
            store,
            services,
        };
        app.reload_feeds().await?;
        Ok(app)
    }

    pub fn current_feed(&self) -> Option<&Feed> {
        self.feeds.get(self.feed_index)
    }

    pub fn selected_article(&self) -> Option<&Article> {
        self.articles.get(self.selected_index)
    }

    pub fn unread_count(&self) -> usize {
        self.articles.iter().filter(|a| !is_read(a)).count()
    }

    pub fn spinner(&self) -> char {
        SPINNER[self.spinner_frame % SPINNER.len()]
    }

    pub fn tick_spinner(&mut self) {
        if self.is_refreshing || self.playing.is_some() {
            self.spinner_frame = self.spinner_frame.wrapping_add(1);
        }
    }

    pub async fn handle_action(&mut self, action: AppAction) -> Result<bool> {
        match action {
            AppAction::Quit => return Ok(true),

            AppAction::MoveUp => {
                if self.selected_index > 0 {
                    self.selected_index -= 1;
                }
            }

            AppAction::MoveDown => {
                let len = self.articles.len();
                if len > 0 && self.selected_index < len - 1 {
                    self.selected_index += 1;
                }
            }

            AppAction::NextFeed => {
                if !self.feeds.is_empty() {
                    self.feed_index = (self.feed_index + 1) % self.feeds.len();
                    self.reload_articles().await?;
                }
            }

            AppAction::OpenDigest => {
                self.mark_selected_read().await?;
            }

            AppAction::MarkRead => {
                self.mark_selected_read().await?;
            }

            AppAction::OpenInBrowser => {
                if let Some(article) = self.selected_article() {
                    let url = article.url.clone();
                    if let Err(e) = open::that(&url) {
                        tracing::warn!(%url, "could not open browser: {}", e);
                        self.status = Some(format!("Could not open {url}"));
                    }
                    self.mark_selected_read().await?;
                }
            }

            AppAction::Play => {
                self.play_selected();
            }

            AppAction::Refresh => {
                self.start_refresh();
            }

            AppAction::ShowHelp => {
                self.show_help = true;
            }

            AppAction::HideHelp => {
                self.show_help = false;
            }
        }

        Ok(false)
    }

    /// Mark the selected digest read. Reading never goes back to unread, and
    /// the row keeps its place until the feed is reloaded.
    async fn mark_selected_read(&mut self) -> Result<()> {
        let Some(digest) = self
            .articles
            .get_mut(self.selected_index)
            .and_then(|a| a.digest.as_mut())
        else {
            return Ok(());
        };
        if !digest.readed {
            self.store.digests.update_readed(digest.id).await?;
            digest.readed = true;
        }
        Ok(())
    }

    /// Start a background ingest pass unless one is already running.
    pub fn start_refresh(&mut self) {
        if self.is_refreshing {
            return;
        }
        let Some(scheduler) = &self.services.scheduler else {
            self.status = Some("Refresh unavailable: gemini_api_key is not set".into());
            return;
        };

        self.is_refreshing = true;
        let scheduler = Arc::clone(scheduler);
        let tx = self.refresh_tx.clone();
        tokio::spawn(async move {
            scheduler.run_once().await;
            let result = Ok(scheduler.stats().snapshot());
            let _ = tx.send(RefreshResult { result }).await;
        });
    }

    /// Poll for a completed refresh (non-blocking)
    pub async fn poll_refresh_result(&mut self) -> Result<()> {
        if let Ok(done) = self.refresh_rx.try_recv() {
            self.is_refreshing = false;
            match done.result {
                Ok(stats) => {
                    self.status = Some(format!(
                        "Refreshed: {} new articles, {} errors",
                        stats.articles_fetched, stats.errors
                    ));
                }
                Err(e) => {
                    tracing::error!("Refresh failed: {}", e);
                    self.status = Some(format!("Refresh failed: {e}"));
                }
            }
            self.reload_feeds().await?;
        }
        Ok(())
    }

    fn play_selected(&mut self) {
        if self.playing.is_some() {
            self.status = Some("Already playing".into());
            return;
        }
        let Some(library) = self.services.library.clone() else {
            self.status = Some("Playback needs audio_dir".into());
            return;
        };
        let (Some(feed), Some(article)) = (self.current_feed(), self.selected_article()) else {
            return;
        };
        let (feed, digest) = (feed.clone(), article.digest.clone());
        let Some(digest) = digest else {
            self.status = Some("No digest yet".into());
            return;
        };

        let store = self.store.clone();
        let synthesizer = self.services.synthesizer.clone();
        let tx = self.play_tx.clone();
        self.playing = Some(digest.id);
        self.status = Some(format!("Playing {}", digest.title_str()));

        tokio::spawn(async move {
            let played = async {
                let path = library
                    .ensure(&store, synthesizer.as_deref(), &feed, &digest)
                    .await?;
                let Some(path) = path else {
                    return Ok(false);
                };
                let mp3 = tokio::fs::read(path).await?;
                Speaker::global().play(mp3).await?;
                store.digests.update_listened(digest.id).await?;
                Ok::<_, crate::error::AppError>(true)
            }
            .await;
            let result = match played {
                Ok(true) => Ok(()),
                Ok(false) => Err("no audio available".to_string()),
                Err(e) => Err(e.to_string()),
            };
            let _ = tx
                .send(PlayResult {
                    digest_id: digest.id,
                    result,
                })
                .await;
        });
    }

    /// Poll for a finished playback (non-blocking)
    pub fn poll_play_result(&mut self) {
        if let Ok(done) = self.play_rx.try_recv() {
            if self.playing == Some(done.digest_id) {
                self.playing = None;
            }
            self.status = match done.result {
                Ok(()) => {
                    if let Some(digest) = self
                        .articles
                        .iter_mut()
                        .filter_map(|a| a.digest.as_mut())
                        .find(|d| d.id == done.digest_id)
                    {
                        digest.listened = true;
                    }
                    Some("Finished playing".into())
                }
                Err(e) => {
                    tracing::warn!("playback failed: {}", e);
                    Some(format!("Playback failed: {e}"))
                }
            };
        }
    }

    async fn reload_feeds(&mut self) -> Result<()> {
        let current = self.current_feed().map(|f| f.id);
        self.feeds = self.store.feeds.list().await?;
        self.feed_index = current
            .and_then(|id| self.feeds.iter().position(|f| f.id == id))
            .unwrap_or(0);
        self.reload_articles().await
    }

    async fn reload_articles(&mut self) -> Result<()> {
        self.articles = match self.current_feed() {
            Some(feed) => self.store.articles.get_by_feed(feed.id).await?,
            None => Vec::new(),
        };
        sort_unread_first(&mut self.articles);
        if self.selected_index >= self.articles.len() {
            self.selected_index = self.articles.len().saturating_sub(1);
        }
        Ok(())
    }
}

/// Articles without a digest count as unread.
pub fn is_read(article: &Article) -> bool {
    article.digest.as_ref().is_some_and(|d| d.readed)
}

/// Unread rows first. The sort is stable, so newest-first order holds
/// within each group.
pub fn sort_unread_first(articles: &mut [Article]) {
    articles.sort_by_key(is_read);
}

/// Text for the detail pane: the digest body, or the article description
/// as plain text when there is no digest body yet.
pub fn detail_text(article: &Article) -> String {
    if let Some(body) = article
        .digest
        .as_ref()
        .map(|d| d.body_str())
        .filter(|b| !b.trim().is_empty())
    {
        return body.to_string();
    }
    let Some(html) = article.description.as_deref().or(article.content.as_deref()) else {
        return "No summary yet.".to_string();
    };
    match html2text::from_read(html.as_bytes(), DETAIL_WIDTH) {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            tracing::debug!("Failed to convert HTML to text: {}", e);
            html.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewArticle, NewDigest, NewFeed};

    async fn seeded() -> (Store, Feed) {
        let store = Store::open_in_memory().await.unwrap();
        store
            .feeds
            .save_many(vec![NewFeed::new("https://example.com/feed", "Example")], false)
            .await
            .unwrap();
        let feed = store.feeds.list().await.unwrap().remove(0);

        for (i, readed) in [(1, true), (2, false), (3, true)] {
            let article = store
                .articles
                .save(NewArticle {
                    feed_id: feed.id,
                    url: format!("https://example.com/{i}"),
                    title: format!("Article {i}"),
                    description: Some(format!("<p>Description <b>{i}</b></p>")),
                    content: None,
                    published_at: None,
                })
                .await
                .unwrap();
            let digest = store
                .digests
                .save(NewDigest {
                    url: article.url.clone(),
                    title: format!("Digest {i}"),
                    body: format!("Body {i}"),
                    article_id: article.id,
                    feed_id: feed.id,
                })
                .await
                .unwrap();
            if readed {
                store.digests.update_readed(digest.id).await.unwrap();
            }
        }
        (store, feed)
    }

    #[tokio::test]
    async fn lists_unread_first() {
        let (store, _) = seeded().await;
        let app = App::new(store, ReaderServices::default()).await.unwrap();

        assert_eq!(app.articles.len(), 3);
        assert_eq!(app.articles[0].title, "Article 2");
        assert!(!is_read(&app.articles[0]));
        assert!(app.articles[1..].iter().all(is_read));
        assert_eq!(app.unread_count(), 1);
    }

    #[tokio::test]
    async fn mark_read_sticks_and_keeps_position() {
        let (store, _) = seeded().await;
        let mut app = App::new(store.clone(), ReaderServices::default()).await.unwrap();

        app.handle_action(AppAction::MarkRead).await.unwrap();
        assert_eq!(app.articles[0].title, "Article 2");
        assert_eq!(app.unread_count(), 0);

        // Marking again leaves it read.
        app.handle_action(AppAction::MarkRead).await.unwrap();
        let digest = store
            .digests
            .get_by_url("https://example.com/2")
            .await
            .unwrap()
            .unwrap();
        assert!(digest.readed);
    }

    #[tokio::test]
    async fn navigation_stays_in_bounds() {
        let (store, _) = seeded().await;
        let mut app = App::new(store, ReaderServices::default()).await.unwrap();

        app.handle_action(AppAction::MoveUp).await.unwrap();
        assert_eq!(app.selected_index, 0);
        for _ in 0..5 {
            app.handle_action(AppAction::MoveDown).await.unwrap();
        }
        assert_eq!(app.selected_index, 2);
    }

    #[tokio::test]
    async fn next_feed_cycles_through_bookmarks() {
        let (store, _) = seeded().await;
        store.feeds.ensure_bookmark().await.unwrap();
        let mut app = App::new(store, ReaderServices::default()).await.unwrap();
        assert_eq!(app.feeds.len(), 2);

        let first = app.current_feed().unwrap().id;
        app.handle_action(AppAction::NextFeed).await.unwrap();
        assert_ne!(app.current_feed().unwrap().id, first);
        app.handle_action(AppAction::NextFeed).await.unwrap();
        assert_eq!(app.current_feed().unwrap().id, first);
    }

    #[tokio::test]
    async fn refresh_without_scheduler_reports_status() {
        let (store, _) = seeded().await;
        let mut app = App::new(store, ReaderServices::default()).await.unwrap();
        app.handle_action(AppAction::Refresh).await.unwrap();
        assert!(!app.is_refreshing);
        assert!(app.status.as_deref().unwrap().contains("gemini_api_key"));
    }

    #[tokio::test]
    async fn detail_falls_back_to_description_text() {
        let (store, feed) = seeded().await;
        let article = store
            .articles
            .save(NewArticle {
                feed_id: feed.id,
                url: "https://example.com/new".into(),
                title: "New".into(),
                description: Some("<p>Hello <b>world</b></p>".into()),
                content: None,
                published_at: None,
            })
            .await
            .unwrap();

        let text = detail_text(&article);
        assert!(text.contains("Hello"));
        assert!(text.contains("world"));
        assert!(!text.contains("<p>"));
    }
}
