use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Digest;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: Uuid,
    pub feed_id: Uuid,
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub content: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Eager-loaded by the read views that need it.
    pub digest: Option<Digest>,
}

#[derive(Debug, Clone)]
pub struct NewArticle {
    pub feed_id: Uuid,
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub content: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}
