use std::path::{Path, PathBuf};

use chrono::Local;

use crate::audio::file_stamp;
use crate::error::Result;
use crate::models::{safe_name, Article, Digest, Feed};

/// `{dir}/{feed}/{stamp}-{title}.org`
pub fn org_path(dir: &Path, feed: &Feed, digest: &Digest) -> PathBuf {
    dir.join(safe_name(&feed.title)).join(format!(
        "{}-{}.org",
        file_stamp(&digest.created_at),
        safe_name(digest.title_str())
    ))
}

pub fn render_org(feed: &Feed, article: &Article, digest: &Digest) -> String {
    let date = digest.created_at.with_timezone(&Local).format("%Y-%m-%d %a %H:%M");
    format!(
        "#+TITLE: {title}\n#+DATE: <{date}>\n\n* {title}\n:PROPERTIES:\n:FEED_URL: {feed_url}\n:ARTICLE_URL: {article_url}\n:END:\n\n{body}\n",
        title = digest.title_str(),
        feed_url = feed.url,
        article_url = article.url,
        body = digest.body_str(),
    )
}

pub async fn write_org(dir: &Path, feed: &Feed, article: &Article, digest: &Digest) -> Result<PathBuf> {
    let path = org_path(dir, feed, digest);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, render_org(feed, article, digest)).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn fixtures() -> (Feed, Article, Digest) {
        let at = Utc.with_ymd_and_hms(2026, 10, 18, 6, 0, 0).unwrap();
        let feed_id = Uuid::new_v4();
        let feed = Feed {
            id: feed_id,
            url: "https://news.example.com/rss".into(),
            title: "Tech News".into(),
            description: None,
            link: None,
            order: 1,
            is_bookmark: false,
            last_checked_at: None,
            created_at: at,
            updated_at: at,
        };
        let article = Article {
            id: Uuid::new_v4(),
            feed_id,
            url: "https://news.example.com/cpu".into(),
            title: "CPU".into(),
            description: None,
            content: None,
            published_at: None,
            created_at: at,
            digest: None,
        };
        let digest = Digest {
            id: Uuid::new_v4(),
            url: article.url.clone(),
            title: Some("New CPU".into()),
            body: Some("Faster.\nCheaper.".into()),
            readed: false,
            listened: false,
            audio_file: None,
            audio_data: None,
            created_at: at,
            article_id: Some(article.id),
            feed_id,
        };
        (feed, article, digest)
    }

    #[test]
    fn renders_properties_drawer() {
        let (feed, article, digest) = fixtures();
        let org = render_org(&feed, &article, &digest);
        assert!(org.starts_with("#+TITLE: New CPU\n#+DATE: <"));
        assert!(org.contains("\n* New CPU\n:PROPERTIES:\n:FEED_URL: https://news.example.com/rss\n:ARTICLE_URL: https://news.example.com/cpu\n:END:\n"));
        assert!(org.ends_with("Faster.\nCheaper.\n"));
    }

    #[tokio::test]
    async fn writes_under_safe_feed_directory() {
        let (feed, article, digest) = fixtures();
        let dir = tempfile::tempdir().unwrap();
        let path = write_org(dir.path(), &feed, &article, &digest).await.unwrap();
        assert!(path.starts_with(dir.path().join("Tech_News")));
        assert!(path.to_string_lossy().ends_with("-New_CPU.org"));
        assert!(std::fs::read_to_string(path).unwrap().contains(":ARTICLE_URL:"));
    }
}
