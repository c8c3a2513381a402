use chrono::{NaiveDate, TimeZone, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Article, NewArticle};

use super::digests::{digest_from_row, DIGEST_COLUMNS};
use super::{datetime_at, day_bounds, format_datetime, map_insert_error, opt_datetime_at, uuid_at};

const ARTICLE_COLUMNS: &str =
    "a.id, a.feed_id, a.url, a.title, a.description, a.content, a.published_at, a.created_at";

// Offset of the joined digest columns in a row built from `select_with_digest`.
const DIGEST_OFFSET: usize = 8;

fn select_with_digest(filter: &str) -> String {
    format!(
        "SELECT {ARTICLE_COLUMNS}, {DIGEST_COLUMNS}
         FROM articles a
         LEFT JOIN digests d ON d.article_id = a.id
         {filter}"
    )
}

#[derive(Clone)]
pub struct ArticleRepository {
    conn: Connection,
}

impl ArticleRepository {
    pub(super) fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Article with its digest, or `None` when the url is unknown.
    pub async fn get_by_url(&self, url: &str) -> Result<Option<Article>> {
        let url = url.to_string();
        let article = self
            .conn
            .call(move |conn| {
                let article = conn
                    .query_row(
                        &select_with_digest("WHERE a.url = ?1"),
                        params![url],
                        article_from_row,
                    )
                    .optional()?;
                Ok(article)
            })
            .await?;
        Ok(article)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<Article>> {
        let article = self
            .conn
            .call(move |conn| {
                let article = conn
                    .query_row(
                        &select_with_digest("WHERE a.id = ?1"),
                        params![id.to_string()],
                        article_from_row,
                    )
                    .optional()?;
                Ok(article)
            })
            .await?;
        Ok(article)
    }

    pub async fn get_by_feed(&self, feed_id: Uuid) -> Result<Vec<Article>> {
        self.query_feed(
            feed_id,
            "WHERE a.feed_id = ?1
             ORDER BY COALESCE(a.published_at, a.created_at) DESC",
        )
        .await
    }

    /// Articles whose digest has not been read yet.
    pub async fn get_unread(&self, feed_id: Uuid) -> Result<Vec<Article>> {
        self.query_feed(
            feed_id,
            "WHERE a.feed_id = ?1 AND d.id IS NOT NULL AND d.readed = 0
             ORDER BY COALESCE(a.published_at, a.created_at) DESC",
        )
        .await
    }

    /// Articles published on `date` as seen in `tz`. Articles without a
    /// publication time fall back to their creation time.
    pub async fn get_by_date<Tz: TimeZone>(
        &self,
        feed_id: Uuid,
        date: NaiveDate,
        tz: &Tz,
    ) -> Result<Vec<Article>> {
        let (start, end) = day_bounds(date, tz);
        let articles = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&select_with_digest(
                    "WHERE a.feed_id = ?1
                       AND COALESCE(a.published_at, a.created_at) >= ?2
                       AND COALESCE(a.published_at, a.created_at) < ?3
                     ORDER BY COALESCE(a.published_at, a.created_at) ASC",
                ))?;
                let articles = stmt
                    .query_map(params![feed_id.to_string(), start, end], article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    /// Insert a new article. Fails with `DuplicateUrl` when the url exists.
    pub async fn save(&self, article: NewArticle) -> Result<Article> {
        let url = article.url.clone();
        let stored = Article {
            id: Uuid::new_v4(),
            feed_id: article.feed_id,
            url: article.url,
            title: article.title,
            description: article.description,
            content: article.content,
            published_at: article.published_at,
            created_at: Utc::now(),
            digest: None,
        };
        let row = stored.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO articles (id, feed_id, url, title, description, content, published_at, created_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
                    params![
                        row.id.to_string(),
                        row.feed_id.to_string(),
                        row.url,
                        row.title,
                        row.description,
                        row.content,
                        row.published_at.as_ref().map(format_datetime),
                        format_datetime(&row.created_at),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| map_insert_error(e, &url))?;
        Ok(stored)
    }

    /// Re-home an article onto another feed.
    pub async fn move_to_feed(&self, id: Uuid, feed_id: Uuid) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE articles SET feed_id = ?1 WHERE id = ?2",
                    params![feed_id.to_string(), id.to_string()],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn query_feed(&self, feed_id: Uuid, filter: &'static str) -> Result<Vec<Article>> {
        let articles = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&select_with_digest(filter))?;
                let articles = stmt
                    .query_map(params![feed_id.to_string()], article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }
}

fn article_from_row(row: &Row) -> rusqlite::Result<Article> {
    let has_digest = row.get::<_, Option<String>>(DIGEST_OFFSET)?.is_some();
    Ok(Article {
        id: uuid_at(row, 0)?,
        feed_id: uuid_at(row, 1)?,
        url: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        content: row.get(5)?,
        published_at: opt_datetime_at(row, 6)?,
        created_at: datetime_at(row, 7)?,
        digest: if has_digest {
            Some(digest_from_row(row, DIGEST_OFFSET)?)
        } else {
            None
        },
    })
}
