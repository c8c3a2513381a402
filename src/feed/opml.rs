use std::path::Path;

use opml::{Head, Outline, OPML};

use crate::error::Result;
use crate::models::{Feed, NewFeed};

/// Read every feed outline from an OPML file. Nested folders are flattened
/// and outlines without an `xmlUrl` are ignored.
pub fn parse_opml_file(path: &Path) -> Result<Vec<NewFeed>> {
    let content = std::fs::read_to_string(path)?;
    parse_opml(&content)
}

pub fn parse_opml(content: &str) -> Result<Vec<NewFeed>> {
    let document = OPML::from_str(content)?;
    let mut feeds = Vec::new();
    collect(&document.body.outlines, &mut feeds);
    Ok(feeds)
}

fn collect(outlines: &[Outline], feeds: &mut Vec<NewFeed>) {
    for outline in outlines {
        if let Some(url) = outline.xml_url.as_deref().filter(|u| !u.trim().is_empty()) {
            let title = outline
                .title
                .clone()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| outline.text.clone());
            let title = if title.trim().is_empty() { url.to_string() } else { title };
            let mut feed = NewFeed::new(url.trim(), title);
            feed.description = outline.description.clone();
            feed.link = outline.html_url.clone();
            feed.order = feeds.len() as i64 + 1;
            feeds.push(feed);
        }
        collect(&outline.outlines, feeds);
    }
}

/// Render subscriptions as OPML. The bookmark feed is left out.
pub fn export_opml(feeds: &[Feed]) -> Result<String> {
    let mut document = OPML {
        head: Some(Head {
            title: Some("quicknews subscriptions".to_string()),
            ..Head::default()
        }),
        ..OPML::default()
    };
    for feed in feeds.iter().filter(|f| !f.is_bookmark) {
        document.body.outlines.push(Outline {
            text: feed.title.clone(),
            title: Some(feed.title.clone()),
            r#type: Some("rss".to_string()),
            xml_url: Some(feed.url.clone()),
            html_url: feed.link.clone(),
            description: feed.description.clone(),
            ..Outline::default()
        });
    }
    Ok(document.to_string()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    const OPML_DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<opml version="2.0">
  <head><title>subs</title></head>
  <body>
    <outline text="Tech">
      <outline text="Tech News" type="rss" xmlUrl="https://news.example.com/rss" htmlUrl="https://news.example.com/"/>
      <outline text="Nested">
        <outline text="Deep" title="Deep Feed" type="rss" xmlUrl="https://deep.example.com/atom"/>
      </outline>
    </outline>
    <outline text="No url here"/>
  </body>
</opml>"#;

    #[test]
    fn flattens_nested_outlines() {
        let feeds = parse_opml(OPML_DOC).unwrap();
        let urls: Vec<&str> = feeds.iter().map(|f| f.url.as_str()).collect();
        assert_eq!(urls, vec!["https://news.example.com/rss", "https://deep.example.com/atom"]);
        assert_eq!(feeds[0].title, "Tech News");
        assert_eq!(feeds[0].link.as_deref(), Some("https://news.example.com/"));
        assert_eq!(feeds[1].title, "Deep Feed");
        assert_eq!(feeds[1].order, 2);
    }

    #[test]
    fn export_skips_bookmark_and_parses_back() {
        let now = Utc::now();
        let feed = |url: &str, title: &str, is_bookmark: bool| Feed {
            id: Uuid::new_v4(),
            url: url.into(),
            title: title.into(),
            description: None,
            link: None,
            order: 1,
            is_bookmark,
            last_checked_at: None,
            created_at: now,
            updated_at: now,
        };
        let xml = export_opml(&[
            feed("https://a.example/rss", "A", false),
            feed("quicknews:bookmarks", "Bookmarks", true),
        ])
        .unwrap();

        let feeds = parse_opml(&xml).unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].url, "https://a.example/rss");
        assert_eq!(feeds[0].title, "A");
    }
}
