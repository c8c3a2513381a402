use std::time::Duration;

use async_trait::async_trait;
use feed_rs::parser;
use regex::Regex;
use reqwest::Client;

use crate::error::{AppError, Result};
use crate::models::{FeedItem, NewFeed, ParsedFeed};

/// Anything that can turn a feed url into a parsed feed.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<ParsedFeed>;
}

pub struct FeedFetcher {
    client: Client,
}

impl FeedFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("quicknews/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    async fn get_bytes(&self, url: &str) -> Result<(String, String, Vec<u8>)> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::Network(format!("{url}: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::Network(format!(
                "Failed to fetch {}: HTTP {}",
                url,
                response.status()
            )));
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let bytes = response.bytes().await?;
        Ok((final_url, content_type, bytes.to_vec()))
    }

    /// Resolve `url` to a subscribable feed. A feed document is used as is;
    /// an HTML page is searched for an advertised RSS or Atom link.
    pub async fn discover_feed(&self, url: &str) -> Result<NewFeed> {
        let (final_url, content_type, bytes) = self.get_bytes(url).await?;

        if let Ok(feed) = parse_feed(&bytes) {
            return Ok(new_feed_from(final_url, feed));
        }

        if content_type.contains("html") || bytes.starts_with(b"<!") || bytes.starts_with(b"<html") {
            let html = String::from_utf8_lossy(&bytes);
            if let Some(feed_url) = find_feed_link(&html, &final_url) {
                let (_, _, feed_bytes) = self.get_bytes(&feed_url).await?;
                let feed = parse_feed(&feed_bytes)?;
                return Ok(new_feed_from(feed_url, feed));
            }
        }

        Err(AppError::Parse(format!("Could not find RSS/Atom feed at {url}")))
    }
}

#[async_trait]
impl FeedSource for FeedFetcher {
    async fn fetch(&self, url: &str) -> Result<ParsedFeed> {
        let (_, _, bytes) = self.get_bytes(url).await?;
        let parsed = parse_feed(&bytes)?;
        tracing::debug!("Fetched {} items from {}", parsed.items.len(), url);
        Ok(parsed)
    }
}

fn new_feed_from(url: String, parsed: ParsedFeed) -> NewFeed {
    let mut feed = NewFeed::new(url, parsed.title.unwrap_or_else(|| "Untitled Feed".to_string()));
    feed.description = parsed.description;
    feed.link = parsed.link;
    feed
}

/// Parse RSS/Atom bytes into the crate's feed representation.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed> {
    let feed = parser::parse(bytes)?;

    let items = feed
        .entries
        .into_iter()
        .map(|entry| FeedItem {
            title: entry
                .title
                .map(|t| t.content)
                .unwrap_or_else(|| "Untitled".to_string()),
            link: entry
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default(),
            description: entry.summary.map(|s| s.content),
            content: entry.content.and_then(|c| c.body),
            published: entry.published,
            updated: entry.updated,
        })
        .collect();

    Ok(ParsedFeed {
        title: feed.title.map(|t| t.content).filter(|t| !t.trim().is_empty()),
        description: feed.description.map(|d| d.content),
        link: feed.links.first().map(|l| l.href.clone()),
        updated: feed.updated,
        items,
    })
}

/// First `<link>` tag advertising an RSS or Atom document, resolved
/// against the page url. Attribute order does not matter.
fn find_feed_link(html: &str, page_url: &str) -> Option<String> {
    let tag_re = Regex::new(r"(?i)<link\b[^>]*>").ok()?;
    let type_re = Regex::new(r#"(?i)\btype\s*=\s*["']application/(?:rss|atom)\+xml["']"#).ok()?;
    let href_re = Regex::new(r#"(?i)\bhref\s*=\s*["']([^"']+)["']"#).ok()?;

    let link = tag_re
        .find_iter(html)
        .map(|tag| tag.as_str())
        .filter(|tag| type_re.is_match(tag))
        .find_map(|tag| href_re.captures(tag))
        .and_then(|cap| cap.get(1))
        .map(|href| absolutize(href.as_str(), page_url));
    link
}

fn absolutize(href: &str, page_url: &str) -> String {
    url::Url::parse(page_url)
        .and_then(|base| base.join(href))
        .map(String::from)
        .unwrap_or_else(|_| href.to_string())
}
