use chrono::{NaiveDate, TimeZone, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Digest, NewDigest};

use super::{datetime_at, day_bounds, format_datetime, map_insert_error, opt_uuid_at, uuid_at};

pub(super) const DIGEST_COLUMNS: &str = "d.id, d.url, d.title, d.body, d.readed, d.listened, d.audio_file, d.audio_data, d.created_at, d.article_id, d.feed_id";

#[derive(Clone)]
pub struct DigestRepository {
    conn: Connection,
}

impl DigestRepository {
    pub(super) fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub async fn get_by_url(&self, url: &str) -> Result<Option<Digest>> {
        let url = url.to_string();
        self.query_one("WHERE d.url = ?1", url).await
    }

    pub async fn get_by_article(&self, article_id: Uuid) -> Result<Option<Digest>> {
        self.query_one("WHERE d.article_id = ?1", article_id.to_string())
            .await
    }

    /// Every digest, newest first.
    pub async fn get_all(&self) -> Result<Vec<Digest>> {
        let digests = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {DIGEST_COLUMNS} FROM digests d ORDER BY d.created_at DESC"
                ))?;
                let digests = stmt
                    .query_map([], |row| digest_from_row(row, 0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(digests)
            })
            .await?;
        Ok(digests)
    }

    /// Digests not yet listened to, oldest first; optionally only those
    /// created on `date` in `tz`.
    pub async fn get_unlistened<Tz: TimeZone>(
        &self,
        date: Option<NaiveDate>,
        tz: &Tz,
    ) -> Result<Vec<Digest>> {
        let bounds = date.map(|d| day_bounds(d, tz));
        let digests = self
            .conn
            .call(move |conn| {
                let digests = match bounds {
                    Some((start, end)) => {
                        let mut stmt = conn.prepare(&format!(
                            "SELECT {DIGEST_COLUMNS} FROM digests d
                             WHERE d.listened = 0 AND d.created_at >= ?1 AND d.created_at < ?2
                             ORDER BY d.created_at ASC"
                        ))?;
                        let rows = stmt
                            .query_map(params![start, end], |row| digest_from_row(row, 0))?
                            .collect::<std::result::Result<Vec<_>, _>>()?;
                        rows
                    }
                    None => {
                        let mut stmt = conn.prepare(&format!(
                            "SELECT {DIGEST_COLUMNS} FROM digests d
                             WHERE d.listened = 0
                             ORDER BY d.created_at ASC"
                        ))?;
                        let rows = stmt
                            .query_map([], |row| digest_from_row(row, 0))?
                            .collect::<std::result::Result<Vec<_>, _>>()?;
                        rows
                    }
                };
                Ok(digests)
            })
            .await?;
        Ok(digests)
    }

    /// Digests with no audio file recorded, oldest first.
    pub async fn get_missing_audio(&self) -> Result<Vec<Digest>> {
        let digests = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {DIGEST_COLUMNS} FROM digests d
                     WHERE d.audio_file IS NULL OR d.audio_file = ''
                     ORDER BY d.created_at ASC"
                ))?;
                let digests = stmt
                    .query_map([], |row| digest_from_row(row, 0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(digests)
            })
            .await?;
        Ok(digests)
    }

    /// Insert a new unread, unlistened digest. Fails with `DuplicateUrl`
    /// when a digest for the url already exists.
    pub async fn save(&self, digest: NewDigest) -> Result<Digest> {
        let url = digest.url.clone();
        let stored = Digest {
            id: Uuid::new_v4(),
            url: digest.url,
            title: Some(digest.title),
            body: Some(digest.body),
            readed: false,
            listened: false,
            audio_file: None,
            audio_data: None,
            created_at: Utc::now(),
            article_id: Some(digest.article_id),
            feed_id: digest.feed_id,
        };
        let row = stored.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO digests (id, url, title, body, readed, listened, created_at, article_id, feed_id)
                       VALUES (?1, ?2, ?3, ?4, 0, 0, ?5, ?6, ?7)"#,
                    params![
                        row.id.to_string(),
                        row.url,
                        row.title,
                        row.body,
                        format_datetime(&row.created_at),
                        row.article_id.map(|id| id.to_string()),
                        row.feed_id.to_string(),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| map_insert_error(e, &url))?;
        Ok(stored)
    }

    pub async fn update_audio_file(&self, id: Uuid, name: &str) -> Result<()> {
        self.set_value(
            "UPDATE digests SET audio_file = ?1 WHERE id = ?2",
            name.to_string(),
            id,
        )
        .await
    }

    /// Flags only ever move from false to true.
    pub async fn update_readed(&self, id: Uuid) -> Result<()> {
        self.execute_for_id("UPDATE digests SET readed = 1 WHERE id = ?1", id)
            .await
    }

    pub async fn update_listened(&self, id: Uuid) -> Result<()> {
        self.execute_for_id("UPDATE digests SET listened = 1 WHERE id = ?1", id)
            .await
    }

    pub async fn move_to_feed(&self, id: Uuid, feed_id: Uuid) -> Result<()> {
        self.set_value(
            "UPDATE digests SET feed_id = ?1 WHERE id = ?2",
            feed_id.to_string(),
            id,
        )
        .await
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        self.execute_for_id("DELETE FROM digests WHERE id = ?1", id)
            .await
    }

    async fn execute_for_id(&self, sql: &'static str, id: Uuid) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(sql, params![id.to_string()])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn set_value(&self, sql: &'static str, value: String, id: Uuid) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(sql, params![value, id.to_string()])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn query_one(&self, filter: &'static str, arg: String) -> Result<Option<Digest>> {
        let digest = self
            .conn
            .call(move |conn| {
                let digest = conn
                    .query_row(
                        &format!("SELECT {DIGEST_COLUMNS} FROM digests d {filter}"),
                        params![arg],
                        |row| digest_from_row(row, 0),
                    )
                    .optional()?;
                Ok(digest)
            })
            .await?;
        Ok(digest)
    }
}

/// Read a digest whose columns start at `offset`.
pub(super) fn digest_from_row(row: &Row, offset: usize) -> rusqlite::Result<Digest> {
    Ok(Digest {
        id: uuid_at(row, offset)?,
        url: row.get(offset + 1)?,
        title: row.get(offset + 2)?,
        body: row.get(offset + 3)?,
        readed: row.get::<_, i64>(offset + 4)? != 0,
        listened: row.get::<_, i64>(offset + 5)? != 0,
        audio_file: row.get(offset + 6)?,
        audio_data: row.get(offset + 7)?,
        created_at: datetime_at(row, offset + 8)?,
        article_id: opt_uuid_at(row, offset + 9)?,
        feed_id: uuid_at(row, offset + 10)?,
    })
}
