use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};

use crate::db::Store;
use crate::error::{AppError, Result};
use crate::models::{safe_name, Digest, Feed};

use super::SpeechSynthesizer;

/// Longest title + body (in bytes) sent to a synthesizer.
pub const MAX_SPEECH_BYTES: usize = 4500;

pub fn speech_text(title: &str, body: &str) -> String {
    format!("この記事のタイトルは {title} です。 \n要約\n\n{body}")
}

pub fn within_budget(title: &str, body: &str) -> bool {
    title.len() + body.len() <= MAX_SPEECH_BYTES
}

/// `yyyymmddHHMMSS` of a timestamp in local time.
pub fn file_stamp(at: &DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y%m%d%H%M%S").to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioOutcome {
    /// Written under this file name.
    Stored(String),
    TooLong,
    NoCredentials,
}

/// Per-digest MP3 files laid out as `{root}/{feed}/{stamp}-{title}.mp3`.
#[derive(Debug, Clone)]
pub struct AudioLibrary {
    root: PathBuf,
}

impl AudioLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn feed_dir(&self, feed_title: &str) -> PathBuf {
        self.root.join(safe_name(feed_title))
    }

    pub fn file_name(digest: &Digest) -> String {
        format!(
            "{}-{}.mp3",
            file_stamp(&digest.created_at),
            safe_name(digest.title_str())
        )
    }

    /// Path of the digest's recorded audio file, when it exists on disk.
    pub fn existing(&self, feed: &Feed, digest: &Digest) -> Option<PathBuf> {
        let name = digest.audio_file.as_deref().filter(|n| !n.is_empty())?;
        let path = self.feed_dir(&feed.title).join(name);
        path.is_file().then_some(path)
    }

    /// Move the digest's audio file from `from`'s directory to `to`'s. True
    /// when a file was moved.
    pub async fn relocate(&self, from: &Feed, to: &Feed, digest: &Digest) -> Result<bool> {
        let Some(source) = self.existing(from, digest) else {
            return Ok(false);
        };
        let dir = self.feed_dir(&to.title);
        if dir == self.feed_dir(&from.title) {
            return Ok(false);
        }
        tokio::fs::create_dir_all(&dir).await?;
        let target = dir.join(digest.audio_file.as_deref().unwrap_or_default());
        tokio::fs::rename(&source, &target).await?;
        tracing::debug!(from = %source.display(), to = %target.display(), "audio file moved");
        Ok(true)
    }

    /// Write `mp3` for the digest and return the file name.
    pub async fn write(&self, feed: &Feed, digest: &Digest, mp3: &[u8]) -> Result<String> {
        let dir = self.feed_dir(&feed.title);
        tokio::fs::create_dir_all(&dir).await?;
        let name = Self::file_name(digest);
        tokio::fs::write(dir.join(&name), mp3).await?;
        Ok(name)
    }

    /// Synthesize the digest and record the file on it. Oversized text and
    /// missing credentials are reported as outcomes, not errors.
    pub async fn materialize(
        &self,
        store: &Store,
        synthesizer: &dyn SpeechSynthesizer,
        feed: &Feed,
        digest: &Digest,
    ) -> Result<AudioOutcome> {
        let (title, body) = (digest.title_str(), digest.body_str());
        if !within_budget(title, body) {
            tracing::warn!(
                url = %digest.url,
                len = title.len() + body.len(),
                limit = MAX_SPEECH_BYTES,
                "digest too long for speech, skipping audio"
            );
            return Ok(AudioOutcome::TooLong);
        }

        let mp3 = match synthesizer.synthesize(&speech_text(title, body)).await {
            Ok(mp3) => mp3,
            Err(AppError::CredentialsMissing(provider)) => {
                tracing::debug!(%provider, "no speech credentials, skipping audio");
                return Ok(AudioOutcome::NoCredentials);
            }
            Err(e) => return Err(e),
        };

        let name = self.write(feed, digest, &mp3).await?;
        store.digests.update_audio_file(digest.id, &name).await?;
        tracing::debug!(file = %name, "audio stored");
        Ok(AudioOutcome::Stored(name))
    }

    /// Move inline `audio_data` from older databases out to a file.
    pub async fn restore_inline(
        &self,
        store: &Store,
        feed: &Feed,
        digest: &Digest,
    ) -> Result<Option<PathBuf>> {
        let Some(data) = digest.audio_data.as_deref().filter(|d| !d.is_empty()) else {
            return Ok(None);
        };
        let name = self.write(feed, digest, data).await?;
        store.digests.update_audio_file(digest.id, &name).await?;
        Ok(Some(self.feed_dir(&feed.title).join(name)))
    }

    /// A playable file for the digest: the recorded file, restored inline
    /// data, or freshly synthesized audio when a synthesizer is given.
    pub async fn ensure(
        &self,
        store: &Store,
        synthesizer: Option<&dyn SpeechSynthesizer>,
        feed: &Feed,
        digest: &Digest,
    ) -> Result<Option<PathBuf>> {
        if let Some(path) = self.existing(feed, digest) {
            return Ok(Some(path));
        }
        if let Some(path) = self.restore_inline(store, feed, digest).await? {
            return Ok(Some(path));
        }
        let Some(synthesizer) = synthesizer else {
            return Ok(None);
        };
        match self.materialize(store, synthesizer, feed, digest).await? {
            AudioOutcome::Stored(name) => Ok(Some(self.feed_dir(&feed.title).join(name))),
            AudioOutcome::TooLong | AudioOutcome::NoCredentials => Ok(None),
        }
    }
}
