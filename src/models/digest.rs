use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Digest {
    pub id: Uuid,
    pub url: String,
    pub title: Option<String>,
    pub body: Option<String>,
    pub readed: bool,
    pub listened: bool,
    /// File name relative to the feed's audio directory.
    pub audio_file: Option<String>,
    /// Inline MP3 bytes from older databases.
    #[serde(skip)]
    pub audio_data: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub article_id: Option<Uuid>,
    pub feed_id: Uuid,
}

impl Digest {
    pub fn title_str(&self) -> &str {
        self.title.as_deref().unwrap_or_default()
    }

    pub fn body_str(&self) -> &str {
        self.body.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct NewDigest {
    pub url: String,
    pub title: String,
    pub body: String,
    pub article_id: Uuid,
    pub feed_id: Uuid,
}
