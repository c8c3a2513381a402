//! Podcast publishing: merged daily episodes plus the RSS document, pushed
//! to object storage on a schedule or on demand.

mod podcast;
mod publisher;
mod schedule;
mod stats;

pub use podcast::{rfc1123, Episode, PodcastDocument, PodcastMeta};
pub use publisher::{PublishSettings, Publisher, FEED_KEY};
pub use schedule::PublishSchedule;
pub use stats::{PublishStatistics, PublishStatsTracker, RunCounters};
