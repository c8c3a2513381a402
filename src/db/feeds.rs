use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Feed, NewFeed, ParsedFeed};

use super::{datetime_at, format_datetime, opt_datetime_at, uuid_at};

pub const BOOKMARK_FEED_URL: &str = "quicknews:bookmarks";
pub const BOOKMARK_FEED_TITLE: &str = "Bookmarks";

const FEED_COLUMNS: &str = "id, url, title, description, link, sort_order, is_bookmark, last_checked_at, created_at, updated_at";

#[derive(Clone)]
pub struct FeedRepository {
    conn: Connection,
}

impl FeedRepository {
    pub(super) fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// All feeds, bookmark included, in ascending `order`.
    pub async fn list(&self) -> Result<Vec<Feed>> {
        let feeds = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {FEED_COLUMNS} FROM feeds ORDER BY sort_order ASC, created_at ASC"
                ))?;
                let feeds = stmt
                    .query_map([], feed_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(feeds)
            })
            .await?;
        Ok(feeds)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Feed>> {
        let feed = self
            .conn
            .call(move |conn| {
                let feed = conn
                    .query_row(
                        &format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?1"),
                        params![id.to_string()],
                        feed_from_row,
                    )
                    .optional()?;
                Ok(feed)
            })
            .await?;
        Ok(feed)
    }

    pub async fn exists_by_url(&self, url: &str) -> Result<bool> {
        let url = url.to_string();
        let exists = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM feeds WHERE url = ?1",
                    params![url],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await?;
        Ok(exists)
    }

    pub async fn count(&self) -> Result<i64> {
        let count = self
            .conn
            .call(|conn| {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM feeds", [], |row| row.get(0))?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }

    /// Bulk insert in one transaction; urls already present are skipped.
    /// Returns the number of feeds created.
    pub async fn save_many(&self, inputs: Vec<NewFeed>, is_bookmark: bool) -> Result<usize> {
        let created = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut created = 0;
                {
                    let mut stmt = tx.prepare(
                        r#"INSERT OR IGNORE INTO feeds
                           (id, url, title, description, link, sort_order, is_bookmark, created_at, updated_at)
                           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)"#,
                    )?;
                    let now = format_datetime(&Utc::now());
                    for feed in inputs {
                        if feed.url.trim().is_empty() {
                            continue;
                        }
                        let title = if feed.title.trim().is_empty() {
                            feed.url.clone()
                        } else {
                            feed.title
                        };
                        created += stmt.execute(params![
                            Uuid::new_v4().to_string(),
                            feed.url,
                            title,
                            feed.description,
                            feed.link,
                            feed.order,
                            is_bookmark,
                            now,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(created)
            })
            .await?;
        Ok(created)
    }

    /// Overwrite metadata from a fresh parse and stamp `updated_at`.
    pub async fn update_from_parsed(&self, feed: &Feed, parsed: &ParsedFeed) -> Result<Feed> {
        let now = Utc::now();
        let mut updated = feed.clone();
        if let Some(title) = parsed.title.as_ref().filter(|t| !t.trim().is_empty()) {
            updated.title = title.trim().to_string();
        }
        updated.description = parsed.description.clone();
        updated.link = parsed.link.clone();
        updated.updated_at = parsed
            .updated
            .or_else(|| parsed.items.first().and_then(|item| item.published))
            .unwrap_or(now);
        updated.last_checked_at = Some(now);

        let row = updated.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"UPDATE feeds SET title = ?1, description = ?2, link = ?3,
                           updated_at = ?4, last_checked_at = ?5
                       WHERE id = ?6"#,
                    params![
                        row.title,
                        row.description,
                        row.link,
                        format_datetime(&row.updated_at),
                        row.last_checked_at.as_ref().map(format_datetime),
                        row.id.to_string(),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(updated)
    }

    /// Delete a regular feed; articles and digests go with it. Returns false
    /// for unknown ids and for the bookmark feed.
    pub async fn delete_with_articles(&self, id: Uuid) -> Result<bool> {
        let deleted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let id = id.to_string();
                let is_regular: bool = tx
                    .query_row(
                        "SELECT is_bookmark = 0 FROM feeds WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?
                    .unwrap_or(false);
                if !is_regular {
                    return Ok(false);
                }
                tx.execute("DELETE FROM digests WHERE feed_id = ?1", params![id])?;
                tx.execute("DELETE FROM articles WHERE feed_id = ?1", params![id])?;
                tx.execute("DELETE FROM feeds WHERE id = ?1", params![id])?;
                tx.commit()?;
                Ok(true)
            })
            .await?;
        Ok(deleted)
    }

    pub async fn bookmark(&self) -> Result<Option<Feed>> {
        let feed = self
            .conn
            .call(|conn| {
                let feed = conn
                    .query_row(
                        &format!("SELECT {FEED_COLUMNS} FROM feeds WHERE is_bookmark = 1"),
                        [],
                        feed_from_row,
                    )
                    .optional()?;
                Ok(feed)
            })
            .await?;
        Ok(feed)
    }

    /// Fetch the bookmark feed, creating it on first use.
    pub async fn ensure_bookmark(&self) -> Result<Feed> {
        if let Some(feed) = self.bookmark().await? {
            return Ok(feed);
        }
        let mut feed = NewFeed::new(BOOKMARK_FEED_URL, BOOKMARK_FEED_TITLE);
        feed.order = 0;
        self.save_many(vec![feed], true).await?;
        self.bookmark()
            .await?
            .ok_or_else(|| crate::error::AppError::NotFound("bookmark feed".into()))
    }
}

fn feed_from_row(row: &Row) -> rusqlite::Result<Feed> {
    Ok(Feed {
        id: uuid_at(row, 0)?,
        url: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        link: row.get(4)?,
        order: row.get(5)?,
        is_bookmark: row.get::<_, i64>(6)? != 0,
        last_checked_at: opt_datetime_at(row, 7)?,
        created_at: datetime_at(row, 8)?,
        updated_at: datetime_at(row, 9)?,
    })
}
