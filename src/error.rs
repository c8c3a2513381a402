use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Store error: {0}")]
    Store(#[from] tokio_rusqlite::Error),

    #[error("URL already stored: {0}")]
    DuplicateUrl(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Empty response from {0}")]
    EmptyResponse(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Feed parse error: {0}")]
    FeedParse(#[from] feed_rs::parser::ParseFeedError),

    #[error("OPML error: {0}")]
    Opml(#[from] opml::Error),

    #[error("Podcast document error: {0}")]
    Podcast(#[from] rss::Error),

    #[error("Credentials missing for {0}")]
    CredentialsMissing(String),

    #[error("Text too long for speech synthesis: {len} bytes (limit {limit})")]
    TooLong { len: usize, limit: usize },

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("File {path} is {size} bytes, over the {limit} byte limit")]
    SizeLimitExceeded { path: String, size: u64, limit: u64 },

    #[error("Worker pool is closed")]
    PoolClosed,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Daemon error: {0}")]
    Daemon(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// True when the error is a unique-constraint race that callers fold into
    /// "already present".
    pub fn is_duplicate(&self) -> bool {
        matches!(self, AppError::DuplicateUrl(_))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
