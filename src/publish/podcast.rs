//! The RSS 2.0 podcast channel with iTunes extensions.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rss::extension::itunes::{
    ITunesCategory, ITunesChannelExtension, ITunesItemExtension, ITunesOwner,
};
use rss::{Channel, Enclosure, Guid, Item};

use crate::config::PodcastConfig;
use crate::error::{AppError, Result};

const LANGUAGE: &str = "ja";
const CATEGORY: &str = "Technology";

/// Channel-level metadata.
#[derive(Debug, Clone, Default)]
pub struct PodcastMeta {
    pub title: String,
    pub link: String,
    pub description: String,
    pub author: String,
    pub owner_email: String,
    pub image_url: String,
    /// Public base url of the bucket; episode urls hang off it.
    pub publish_url: String,
}

impl PodcastMeta {
    pub fn from_config(config: &PodcastConfig) -> Self {
        let get = |v: &Option<String>| v.clone().unwrap_or_default().trim().to_string();
        Self {
            title: get(&config.channel_title),
            link: get(&config.channel_link),
            description: get(&config.channel_desc),
            author: get(&config.author),
            owner_email: get(&config.owner_email),
            image_url: get(&config.image_url),
            publish_url: get(&config.publish_url).trim_end_matches('/').to_string(),
        }
    }

    pub fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.publish_url, key)
    }

    fn itunes_channel(&self) -> ITunesChannelExtension {
        ITunesChannelExtension {
            author: opt(&self.author),
            subtitle: opt(&self.description),
            summary: opt(&self.description),
            owner: Some(ITunesOwner {
                name: opt(&self.author),
                email: opt(&self.owner_email),
            }),
            image: opt(&self.image_url),
            categories: vec![ITunesCategory {
                text: CATEGORY.to_string(),
                subcategory: None,
            }],
            explicit: Some("no".to_string()),
            ..ITunesChannelExtension::default()
        }
    }

    fn itunes_item(&self) -> ITunesItemExtension {
        ITunesItemExtension {
            author: opt(&self.author),
            subtitle: opt(&self.description),
            summary: opt(&self.description),
            image: opt(&self.image_url),
            explicit: Some("no".to_string()),
            ..ITunesItemExtension::default()
        }
    }
}

fn opt(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// One merged episode covering a feed on a date.
#[derive(Debug, Clone)]
pub struct Episode {
    pub title: String,
    pub url: String,
    pub date: NaiveDate,
    pub length: u64,
    pub description: String,
}

/// `Sun, 18 Oct 2026 00:00:00 GMT`
pub fn rfc1123(at: &DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub struct PodcastDocument {
    meta: PodcastMeta,
    channel: Channel,
}

impl PodcastDocument {
    pub fn new(meta: PodcastMeta) -> Self {
        let channel = Channel::default();
        let mut document = Self { meta, channel };
        document.apply_meta();
        document
    }

    /// Continue an existing document. Channel metadata is refreshed from
    /// `meta`; items are kept.
    pub fn parse(xml: &[u8], meta: PodcastMeta) -> Result<Self> {
        let channel = Channel::read_from(xml)?;
        let mut document = Self { meta, channel };
        document.apply_meta();
        Ok(document)
    }

    fn apply_meta(&mut self) {
        let channel = &mut self.channel;
        channel.title = self.meta.title.clone();
        channel.link = self.meta.link.clone();
        channel.description = self.meta.description.clone();
        channel.language = Some(LANGUAGE.to_string());
        channel.itunes_ext = Some(self.meta.itunes_channel());
    }

    pub fn items(&self) -> &[Item] {
        &self.channel.items
    }

    /// Add an episode, replacing any item with the same guid in place.
    pub fn upsert(&mut self, episode: &Episode) {
        let published = episode.date.and_time(NaiveTime::MIN).and_utc();
        let item = Item {
            title: Some(episode.title.clone()),
            link: Some(episode.url.clone()),
            guid: Some(Guid {
                value: episode.url.clone(),
                permalink: true,
            }),
            pub_date: Some(rfc1123(&published)),
            description: Some(episode.description.clone()),
            enclosure: Some(Enclosure {
                url: episode.url.clone(),
                length: episode.length.to_string(),
                mime_type: "audio/mpeg".to_string(),
            }),
            itunes_ext: Some(self.meta.itunes_item()),
            ..Item::default()
        };

        let existing = self
            .channel
            .items
            .iter()
            .position(|i| i.guid.as_ref().map(|g| g.value.as_str()) == Some(episode.url.as_str()));
        match existing {
            Some(index) => self.channel.items[index] = item,
            None => self.channel.items.push(item),
        }
    }

    pub fn render(&mut self, now: DateTime<Utc>) -> Result<String> {
        self.channel.pub_date = Some(rfc1123(&now));
        self.channel.last_build_date = Some(rfc1123(&now));
        let bytes = self.channel.write_to(Vec::new())?;
        String::from_utf8(bytes).map_err(|e| AppError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn meta() -> PodcastMeta {
        PodcastMeta {
            title: "Quick News".into(),
            link: "https://podcast.example.com".into(),
            description: "Daily digests".into(),
            author: "Editor".into(),
            owner_email: "editor@example.com".into(),
            image_url: "https://podcast.example.com/cover.png".into(),
            publish_url: "https://cdn.example.com".into(),
        }
    }

    fn episode(date: NaiveDate, length: u64) -> Episode {
        Episode {
            title: format!("{date} Tech News Podcast"),
            url: format!("https://cdn.example.com/{date}_Tech_News.mp3"),
            date,
            length,
            description: "New CPU".into(),
        }
    }

    #[test]
    fn rfc1123_formats_gmt() {
        let at = Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap();
        assert_eq!(rfc1123(&at), "Sun, 18 Oct 2026 00:00:00 GMT");
    }

    #[test]
    fn renders_channel_and_episode() {
        let mut doc = PodcastDocument::new(meta());
        let date = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        doc.upsert(&episode(date, 834));
        let xml = doc.render(Utc::now()).unwrap();

        assert!(xml.contains("<title>Quick News</title>"));
        assert!(xml.contains("<language>ja</language>"));
        assert!(xml.contains("<itunes:author>Editor</itunes:author>"));
        assert!(xml.contains("<itunes:explicit>no</itunes:explicit>"));
        assert!(xml.contains("2026-10-18 Tech News Podcast"));
        assert!(xml.contains("Sun, 18 Oct 2026 00:00:00 GMT"));
        assert!(xml.contains(r#"length="834""#));
        assert!(xml.contains(r#"type="audio/mpeg""#));
    }

    #[test]
    fn same_guid_replaces_item() {
        let mut doc = PodcastDocument::new(meta());
        let first = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        let second = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        doc.upsert(&episode(first, 1));
        doc.upsert(&episode(second, 2));
        doc.upsert(&episode(first, 3));

        assert_eq!(doc.items().len(), 2);
        let lengths: Vec<&str> = doc
            .items()
            .iter()
            .map(|i| i.enclosure.as_ref().unwrap().length.as_str())
            .collect();
        assert_eq!(lengths, vec!["3", "2"]);
    }

    #[test]
    fn parse_keeps_existing_items() {
        let mut doc = PodcastDocument::new(meta());
        doc.upsert(&episode(NaiveDate::from_ymd_opt(2026, 10, 17).unwrap(), 1));
        let xml = doc.render(Utc::now()).unwrap();

        let mut renamed = meta();
        renamed.title = "Quick News Weekly".into();
        let reloaded = PodcastDocument::parse(xml.as_bytes(), renamed).unwrap();
        assert_eq!(reloaded.items().len(), 1);
        assert_eq!(reloaded.channel.title, "Quick News Weekly");
    }
}
