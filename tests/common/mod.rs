//! Stubs shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use quicknews::ai::{parse_reply, DigestText, Summarize};
use quicknews::audio::SpeechSynthesizer;
use quicknews::daemon::{Scheduler, StatsTracker};
use quicknews::db::Store;
use quicknews::error::{AppError, Result};
use quicknews::feed::{FeedIngestor, FeedSource};
use quicknews::models::{Feed, FeedItem, NewFeed, ParsedFeed};
use quicknews::pipeline::ArticleProcessor;
use quicknews::storage::ObjectStore;

/// Serves fixed items for every url.
pub struct StubSource {
    pub items: Vec<FeedItem>,
}

#[async_trait]
impl FeedSource for StubSource {
    async fn fetch(&self, _url: &str) -> Result<ParsedFeed> {
        Ok(ParsedFeed {
            title: Some("Stub Feed".into()),
            items: self.items.clone(),
            ..Default::default()
        })
    }
}

/// Answers every url with the same reply.
pub struct Canned {
    reply: String,
    pub calls: AtomicU32,
}

impl Canned {
    pub fn new(reply: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.into(),
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl Summarize for Canned {
    async fn summarize(&self, _url: &str) -> Result<DigestText> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        parse_reply(&self.reply)
    }
}

/// Returns one silent MP3 frame for any text.
pub struct SilentTts;

#[async_trait]
impl SpeechSynthesizer for SilentTts {
    fn name(&self) -> &'static str {
        "silent"
    }

    async fn synthesize(&self, _text: &str) -> Result<Vec<u8>> {
        Ok(mp3_frames(1))
    }
}

/// A fixed number of silent frames for any text.
pub struct FramesTts(pub usize);

#[async_trait]
impl SpeechSynthesizer for FramesTts {
    fn name(&self) -> &'static str {
        "frames"
    }

    async fn synthesize(&self, _text: &str) -> Result<Vec<u8>> {
        Ok(mp3_frames(self.0))
    }
}

/// In-memory bucket. The first `failures` uploads are refused.
#[derive(Default)]
pub struct MemoryBucket {
    pub objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
    pub failures: AtomicU32,
}

impl MemoryBucket {
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).map(|(body, _)| body.clone())
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects.lock().unwrap().get(key).map(|(_, ct)| ct.clone())
    }
}

#[async_trait]
impl ObjectStore for MemoryBucket {
    async fn upload(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        let refused = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused || key.is_empty() {
            return Err(AppError::Upload(format!("{key}: refused")));
        }
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (body, content_type.to_string()));
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.get(key))
    }
}

/// `count` MPEG-1 Layer III frames, 128 kbit/s at 44.1 kHz.
pub fn mp3_frames(count: usize) -> Vec<u8> {
    const FRAME_LEN: usize = 417;
    let mut out = Vec::with_capacity(FRAME_LEN * count);
    for _ in 0..count {
        let mut frame = vec![0u8; FRAME_LEN];
        frame[..4].copy_from_slice(&[0xFF, 0xFB, 0x90, 0x00]);
        out.extend_from_slice(&frame);
    }
    out
}

pub fn item(link: &str, title: &str) -> FeedItem {
    FeedItem {
        title: title.into(),
        link: link.into(),
        ..Default::default()
    }
}

pub async fn store_with_feed(title: &str) -> (Store, Feed) {
    let store = Store::open_in_memory().await.unwrap();
    store
        .feeds
        .save_many(vec![NewFeed::new("https://x/feed", title)], false)
        .await
        .unwrap();
    let feed = store.feeds.list().await.unwrap().remove(0);
    (store, feed)
}

pub fn scheduler(
    store: &Store,
    processor: ArticleProcessor,
    items: Vec<FeedItem>,
    stats: StatsTracker,
    interval: Duration,
) -> Scheduler {
    let ingestor = FeedIngestor::new(Arc::new(StubSource { items }), store.clone(), Arc::new(processor))
        .with_stats(stats.clone());
    Scheduler::new(store.clone(), Arc::new(ingestor), stats, interval, 2)
}

/// Poll `check` every 10 ms for up to two seconds.
pub async fn wait_for(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
