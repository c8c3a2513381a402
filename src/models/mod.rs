mod article;
mod digest;
mod feed;
mod parsed;

pub use article::{Article, NewArticle};
pub use digest::{Digest, NewDigest};
pub use feed::{Feed, NewFeed};
pub use parsed::{FeedItem, ParsedFeed};

/// Replace spaces with underscores for file and object names.
pub fn safe_name(name: &str) -> String {
    name.replace(' ', "_")
}
