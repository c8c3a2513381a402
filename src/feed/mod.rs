mod fetcher;
mod ingestor;
mod opml;

pub use fetcher::{parse_feed, FeedFetcher, FeedSource};
pub use ingestor::FeedIngestor;
pub use opml::{export_opml, parse_opml, parse_opml_file};
