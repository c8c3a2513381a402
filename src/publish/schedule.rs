use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Weekday};

use crate::config::{parse_clock, parse_weekday, PublishConfig};
use crate::error::{AppError, Result};

/// When the daemon publishes on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishSchedule {
    Daily { at: NaiveTime },
    /// Publishes the week ending seven days before the run date.
    Weekly { at: NaiveTime, weekday: Weekday },
    Manual,
}

impl PublishSchedule {
    pub fn from_config(config: &PublishConfig) -> Result<Self> {
        let at = parse_clock(&config.time)?;
        match config.schedule.as_str() {
            "daily" => Ok(Self::Daily { at }),
            "weekly" => Ok(Self::Weekly {
                at,
                weekday: parse_weekday(&config.weekday)?,
            }),
            "manual" => Ok(Self::Manual),
            other => Err(AppError::Config(format!("unknown publish schedule {other:?}"))),
        }
    }

    /// True inside the one-minute window starting at the configured time.
    pub fn is_due<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        match self {
            Self::Daily { at } => in_window(now.time(), *at),
            Self::Weekly { at, weekday } => now.weekday() == *weekday && in_window(now.time(), *at),
            Self::Manual => false,
        }
    }

    /// Date whose episodes a run started on `today` covers first.
    pub fn target_date(&self, today: NaiveDate) -> NaiveDate {
        match self {
            Self::Weekly { .. } => today - Duration::days(7),
            Self::Daily { .. } | Self::Manual => today,
        }
    }
}

fn in_window(now: NaiveTime, at: NaiveTime) -> bool {
    let since = now.signed_duration_since(at);
    since >= Duration::zero() && since < Duration::minutes(1)
}
