mod articles;
mod digests;
mod feeds;
mod schema;

use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, TimeZone, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use serde::Serialize;
use tokio_rusqlite::Connection;
use uuid::Uuid;

use crate::error::{AppError, Result};

pub use articles::ArticleRepository;
pub use digests::DigestRepository;
pub use feeds::FeedRepository;

use schema::SCHEMA;

/// Repository surface over one SQLite connection.
///
/// `tokio_rusqlite` runs every call on a single background thread, which makes
/// that thread the process-wide serialization point for both reads and writes.
#[derive(Clone)]
pub struct Store {
    pub feeds: FeedRepository,
    pub articles: ArticleRepository,
    pub digests: DigestRepository,
    conn: Connection,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StoreCounts {
    pub feeds: i64,
    pub articles: i64,
    pub digests: i64,
}

impl Store {
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self {
            feeds: FeedRepository::new(conn.clone()),
            articles: ArticleRepository::new(conn.clone()),
            digests: DigestRepository::new(conn.clone()),
            conn,
        })
    }

    /// Cheap read used as the database health probe.
    pub async fn counts(&self) -> Result<StoreCounts> {
        let counts = self
            .conn
            .call(|conn| {
                let count = |table: &str| -> rusqlite::Result<i64> {
                    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                };
                Ok(StoreCounts {
                    feeds: count("feeds")?,
                    articles: count("articles")?,
                    digests: count("digests")?,
                })
            })
            .await?;
        Ok(counts)
    }
}

/// Translate a unique-constraint failure into `DuplicateUrl`.
pub(crate) fn map_insert_error(err: tokio_rusqlite::Error, url: &str) -> AppError {
    if let tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(failure, _)) = &err {
        if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE {
            return AppError::DuplicateUrl(url.to_string());
        }
    }
    AppError::Store(err)
}

pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56Z")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

/// `[date 00:00, date+1 00:00)` in `tz`, as stored timestamp strings.
pub fn day_bounds<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> (String, String) {
    let start = local_midnight(date, tz);
    let end = local_midnight(date.succ_opt().unwrap_or(date), tz);
    (format_datetime(&start), format_datetime(&end))
}

fn local_midnight<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> DateTime<Utc> {
    let naive = date.and_time(NaiveTime::MIN);
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| naive.and_utc())
}

pub(crate) fn uuid_at(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn opt_uuid_at(row: &Row, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => Uuid::parse_str(&raw)
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        None => Ok(None),
    }
}

pub(crate) fn datetime_at(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    Ok(row
        .get::<_, String>(idx)
        .ok()
        .and_then(|s| parse_datetime(&s))
        .unwrap_or_else(Utc::now))
}

pub(crate) fn opt_datetime_at(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    Ok(row
        .get::<_, Option<String>>(idx)?
        .and_then(|s| parse_datetime(&s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    #[test]
    fn day_bounds_follow_the_given_offset() {
        let tokyo = FixedOffset::east_opt(9 * 3600).unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let (start, end) = day_bounds(date, &tokyo);
        assert_eq!(start, "2026-10-17T15:00:00Z");
        assert_eq!(end, "2026-10-18T15:00:00Z");

        let (start, end) = day_bounds(date, &Utc);
        assert_eq!(start, "2026-10-18T00:00:00Z");
        assert_eq!(end, "2026-10-19T00:00:00Z");
    }

    #[test]
    fn parses_both_timestamp_forms() {
        assert!(parse_datetime("2026-01-11T12:34:56Z").is_some());
        assert!(parse_datetime("2026-01-11 12:34:56").is_some());
        assert!(parse_datetime("yesterday").is_none());
    }

    #[tokio::test]
    async fn counts_empty_store() {
        let store = Store::open_in_memory().await.unwrap();
        let counts = store.counts().await.unwrap();
        assert_eq!((counts.feeds, counts.articles, counts.digests), (0, 0, 0));
    }
}
