use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db: String,

    /// Directory holding per-digest MP3 files.
    pub audio: Option<String>,

    #[serde(default)]
    pub save_audio_data: bool,

    #[serde(default)]
    pub use_gemini_tts: bool,

    #[serde(default = "default_speaking_rate")]
    pub speaking_rate: f64,

    #[serde(default)]
    pub require_confirm: bool,

    /// Directory for `.org` sidecar documents.
    pub export_org: Option<String>,

    pub gemini_api_key: Option<String>,
    pub google_application_credentials: Option<String>,

    #[serde(default)]
    pub prompt: PromptConfig,

    #[serde(default)]
    pub voicevox: VoiceVoxConfig,

    #[serde(default)]
    pub cloudflare: CloudflareConfig,

    #[serde(default)]
    pub podcast: PodcastConfig,

    #[serde(default)]
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Summarization prompt; `%s` is replaced with the article URL.
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceVoxConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_voicevox_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub speaker: usize,
    #[serde(default)]
    pub style: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloudflareConfig {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub bucket_name: Option<String>,
    pub endpoint_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PodcastConfig {
    pub channel_title: Option<String>,
    pub channel_link: Option<String>,
    pub channel_desc: Option<String>,
    pub author: Option<String>,
    pub owner_email: Option<String>,
    pub image_url: Option<String>,
    pub publish_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_interval")]
    pub interval: String,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_pid_file")]
    pub pid_file: String,
    #[serde(default = "default_health_port")]
    pub health_check_port: u16,
    #[serde(default)]
    pub publish: PublishConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_schedule")]
    pub schedule: String,
    #[serde(default = "default_publish_time")]
    pub time: String,
    #[serde(default = "default_weekday")]
    pub weekday: String,
    #[serde(default = "default_range_days")]
    pub range_days: u32,
    #[serde(default = "default_true")]
    pub auto_generate_missing_audio: bool,
    #[serde(default = "default_true")]
    pub cleanup_temp_files: bool,
    #[serde(default)]
    pub max_file_size_mb: u64,
    #[serde(default = "default_parallel_uploads")]
    pub parallel_uploads: usize,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay: String,
}

fn default_db_path() -> String {
    "~/quicknews.db".to_string()
}

fn default_speaking_rate() -> f64 {
    1.3
}

fn default_voicevox_endpoint() -> String {
    "http://localhost:50021".to_string()
}

fn default_interval() -> String {
    "30m".to_string()
}

fn default_max_workers() -> usize {
    5
}

fn default_pid_file() -> String {
    "~/quicknews.pid".to_string()
}

fn default_health_port() -> u16 {
    8080
}

fn default_schedule() -> String {
    "daily".to_string()
}

fn default_publish_time() -> String {
    "06:00".to_string()
}

fn default_weekday() -> String {
    "monday".to_string()
}

fn default_range_days() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_parallel_uploads() -> usize {
    3
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> String {
    "5s".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db: default_db_path(),
            audio: None,
            save_audio_data: false,
            use_gemini_tts: false,
            speaking_rate: default_speaking_rate(),
            require_confirm: false,
            export_org: None,
            gemini_api_key: None,
            google_application_credentials: None,
            prompt: PromptConfig::default(),
            voicevox: VoiceVoxConfig::default(),
            cloudflare: CloudflareConfig::default(),
            podcast: PodcastConfig::default(),
            daemon: DaemonConfig::default(),
        }
    }
}

impl Default for VoiceVoxConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_voicevox_endpoint(),
            speaker: 0,
            style: 0,
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            max_workers: default_max_workers(),
            pid_file: default_pid_file(),
            health_check_port: default_health_port(),
            publish: PublishConfig::default(),
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            schedule: default_schedule(),
            time: default_publish_time(),
            weekday: default_weekday(),
            range_days: default_range_days(),
            auto_generate_missing_audio: true,
            cleanup_temp_files: true,
            max_file_size_mb: 0,
            parallel_uploads: default_parallel_uploads(),
            retry_attempts: default_retry_attempts(),
            retry_delay: default_retry_delay(),
        }
    }
}

// Environment variables honoured when overrides are switched on.
const ENV_OVERRIDES: &[&str] = &[
    "QUICKNEWS_DB",
    "QUICKNEWS_AUDIO",
    "GEMINI_API_KEY",
    "GOOGLE_APPLICATION_CREDENTIALS",
    "CLOUDFLARE_ACCESS_KEY_ID",
    "CLOUDFLARE_SECRET_ACCESS_KEY",
    "CLOUDFLARE_BUCKET_NAME",
    "CLOUDFLARE_ENDPOINT_URL",
    "PODCAST_PUBLISH_URL",
];

impl Config {
    /// Load from `path` (or the default location), creating a default file
    /// when none exists yet.
    pub fn load(path: Option<&Path>, env_override: bool) -> Result<Self> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::config_path);

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<Config>(&content)?
        } else {
            let config = Config::default();
            config.save(&config_path)?;
            config
        };

        if env_override {
            config.apply_env(|name| std::env::var(name).ok());
        }

        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("quicknews")
            .join("config.toml")
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for name in ENV_OVERRIDES {
            let Some(value) = lookup(name).filter(|v| !v.is_empty()) else {
                continue;
            };
            match *name {
                "QUICKNEWS_DB" => self.db = value,
                "QUICKNEWS_AUDIO" => self.audio = Some(value),
                "GEMINI_API_KEY" => self.gemini_api_key = Some(value),
                "GOOGLE_APPLICATION_CREDENTIALS" => {
                    self.google_application_credentials = Some(value)
                }
                "CLOUDFLARE_ACCESS_KEY_ID" => self.cloudflare.access_key_id = Some(value),
                "CLOUDFLARE_SECRET_ACCESS_KEY" => {
                    self.cloudflare.secret_access_key = Some(value)
                }
                "CLOUDFLARE_BUCKET_NAME" => self.cloudflare.bucket_name = Some(value),
                "CLOUDFLARE_ENDPOINT_URL" => self.cloudflare.endpoint_url = Some(value),
                "PODCAST_PUBLISH_URL" => self.podcast.publish_url = Some(value),
                _ => {}
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.speaking_rate <= 0.0 {
            return Err(AppError::Config(format!(
                "speaking_rate must be positive, got {}",
                self.speaking_rate
            )));
        }
        let interval = self.interval()?;
        if interval < Duration::from_secs(60) {
            return Err(AppError::Config(format!(
                "daemon.interval must be at least 1m, got {}",
                self.daemon.interval
            )));
        }
        if self.daemon.max_workers == 0 {
            return Err(AppError::Config("daemon.max_workers must be at least 1".into()));
        }
        let publish = &self.daemon.publish;
        parse_clock(&publish.time)?;
        parse_weekday(&publish.weekday)?;
        match publish.schedule.as_str() {
            "daily" | "weekly" | "manual" => {}
            other => {
                return Err(AppError::Config(format!(
                    "daemon.publish.schedule must be daily, weekly or manual, got {other:?}"
                )))
            }
        }
        if publish.range_days == 0 {
            return Err(AppError::Config("daemon.publish.range_days must be at least 1".into()));
        }
        parse_duration(&publish.retry_delay)?;
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        expand_home(&self.db)
    }

    pub fn audio_dir(&self) -> Option<PathBuf> {
        non_empty(&self.audio).map(expand_home)
    }

    pub fn export_org_dir(&self) -> Option<PathBuf> {
        non_empty(&self.export_org).map(expand_home)
    }

    pub fn pid_file(&self) -> PathBuf {
        expand_home(&self.daemon.pid_file)
    }

    pub fn interval(&self) -> Result<Duration> {
        parse_duration(&self.daemon.interval)
    }

    pub fn retry_delay(&self) -> Result<Duration> {
        parse_duration(&self.daemon.publish.retry_delay)
    }

    pub fn gemini_key(&self) -> Option<&str> {
        non_empty(&self.gemini_api_key)
    }

    /// True when every object-storage credential is present.
    pub fn has_object_storage(&self) -> bool {
        let cf = &self.cloudflare;
        [&cf.access_key_id, &cf.secret_access_key, &cf.bucket_name, &cf.endpoint_url]
            .iter()
            .all(|v| non_empty(v).is_some())
    }

    pub fn has_podcast(&self) -> bool {
        non_empty(&self.podcast.publish_url).is_some()
            && non_empty(&self.podcast.channel_title).is_some()
    }

    /// Flatten into dotted keys for `quicknews config`.
    pub fn flatten(&self, show_secrets: bool) -> Result<BTreeMap<String, String>> {
        let value = serde_json::to_value(self)?;
        let mut out = BTreeMap::new();
        flatten_value("", &value, &mut out);
        if !show_secrets {
            for (key, value) in out.iter_mut() {
                if is_secret_key(key) {
                    *value = mask_secret(value);
                }
            }
        }
        Ok(out)
    }
}

fn flatten_value(prefix: &str, value: &serde_json::Value, out: &mut BTreeMap<String, String>) {
    match value {
        serde_json::Value::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten_value(&key, v, out);
            }
        }
        serde_json::Value::Null => {
            out.insert(prefix.to_string(), String::new());
        }
        serde_json::Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}

pub fn is_secret_key(key: &str) -> bool {
    let key = key.to_lowercase();
    key.contains("key") || key.contains("secret") || key.contains("credential")
}

/// `abcdefgh` -> `abc...gh`; short or empty values collapse to `***`.
pub fn mask_secret(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    let chars: Vec<char> = value.chars().collect();
    if chars.len() < 6 {
        return "***".to_string();
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}...{tail}")
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Parse compact durations such as `90s`, `10m`, `1h30m`.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(AppError::Config("empty duration".into()));
    }
    let mut total = 0u64;
    let mut digits = String::new();
    for c in input.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let unit = match c {
            'h' => 3600,
            'm' => 60,
            's' => 1,
            _ => return Err(AppError::Config(format!("invalid duration {input:?}"))),
        };
        let n: u64 = digits
            .parse()
            .map_err(|_| AppError::Config(format!("invalid duration {input:?}")))?;
        total = n
            .checked_mul(unit)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(|| AppError::Config(format!("duration {input:?} is too large")))?;
        digits.clear();
    }
    if !digits.is_empty() {
        return Err(AppError::Config(format!(
            "duration {input:?} is missing a unit (h, m or s)"
        )));
    }
    Ok(Duration::from_secs(total))
}

pub fn parse_clock(input: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(input.trim(), "%H:%M")
        .map_err(|e| AppError::Config(format!("invalid publish time {input:?}: {e}")))
}

pub fn parse_weekday(input: &str) -> Result<Weekday> {
    input
        .trim()
        .parse::<Weekday>()
        .map_err(|_| AppError::Config(format!("invalid weekday {input:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compact_durations() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(matches!(
            parse_duration("9999999999999999999h"),
            Err(AppError::Config(_))
        ));
        assert!(matches!(
            parse_duration("18446744073709551615s1s"),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn rejects_short_interval() {
        let mut config = Config::default();
        config.daemon.interval = "30s".into();
        assert!(config.validate().is_err());
        config.daemon.interval = "1m".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_publish_time() {
        let mut config = Config::default();
        config.daemon.publish.time = "25:99".into();
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn parses_minimal_toml() {
        let config: Config = toml::from_str(
            r#"
            db = "/tmp/q.db"
            save_audio_data = true

            [daemon.publish]
            enabled = true
            schedule = "weekly"
            weekday = "friday"
            "#,
        )
        .unwrap();
        assert_eq!(config.db, "/tmp/q.db");
        assert!(config.save_audio_data);
        assert_eq!(config.speaking_rate, 1.3);
        assert_eq!(config.daemon.publish.parallel_uploads, 3);
        assert_eq!(parse_weekday(&config.daemon.publish.weekday).unwrap(), Weekday::Fri);
        config.validate().unwrap();
    }

    #[test]
    fn env_override_replaces_file_values() {
        let mut config = Config::default();
        config.apply_env(|name| match name {
            "GEMINI_API_KEY" => Some("from-env".into()),
            "QUICKNEWS_DB" => Some("/data/q.db".into()),
            _ => None,
        });
        assert_eq!(config.gemini_key(), Some("from-env"));
        assert_eq!(config.db_path(), PathBuf::from("/data/q.db"));
    }

    #[test]
    fn masks_secret_keys_only() {
        let mut config = Config::default();
        config.gemini_api_key = Some("abcdefghij".into());
        config.cloudflare.secret_access_key = Some("xyz".into());
        config.cloudflare.bucket_name = Some("podcasts".into());

        let flat = config.flatten(false).unwrap();
        assert_eq!(flat["gemini_api_key"], "abc...ij");
        assert_eq!(flat["cloudflare.secret_access_key"], "***");
        assert_eq!(flat["cloudflare.bucket_name"], "podcasts");

        let shown = config.flatten(true).unwrap();
        assert_eq!(shown["gemini_api_key"], "abcdefghij");
    }

    #[test]
    fn object_storage_requires_all_fields() {
        let mut config = Config::default();
        config.cloudflare.access_key_id = Some("a".into());
        config.cloudflare.secret_access_key = Some("b".into());
        config.cloudflare.bucket_name = Some("c".into());
        assert!(!config.has_object_storage());
        config.cloudflare.endpoint_url = Some("https://r2.example".into());
        assert!(config.has_object_storage());
    }
}
