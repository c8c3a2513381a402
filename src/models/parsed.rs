use chrono::{DateTime, Utc};

/// A remote feed after parsing, detached from the parser library's types.
#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    pub updated: Option<DateTime<Utc>>,
    pub items: Vec<FeedItem>,
}

#[derive(Debug, Clone, Default)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub description: Option<String>,
    pub content: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}
