use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::OnceCell;

use crate::error::{AppError, Result};

use super::{wav_to_mp3, SpeechSynthesizer};

#[derive(Debug, Deserialize)]
struct Speaker {
    name: String,
    #[serde(default)]
    styles: Vec<Style>,
}

#[derive(Debug, Deserialize)]
struct Style {
    name: String,
    id: i64,
}

/// Client for a local VOICEVOX engine.
pub struct VoiceVox {
    client: Client,
    endpoint: String,
    speaker: usize,
    style: usize,
    speaking_rate: f64,
    style_id: OnceCell<i64>,
}

impl VoiceVox {
    pub fn new(endpoint: &str, speaker: usize, style: usize, speaking_rate: f64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            speaker,
            style,
            speaking_rate,
            style_id: OnceCell::new(),
        })
    }

    async fn style_id(&self) -> Result<i64> {
        self.style_id
            .get_or_try_init(|| async {
                let speakers: Vec<Speaker> = self
                    .client
                    .get(format!("{}/speakers", self.endpoint))
                    .send()
                    .await
                    .map_err(|e| AppError::Network(format!("VOICEVOX unreachable: {e}")))?
                    .error_for_status()?
                    .json()
                    .await?;
                select_style(&speakers, self.speaker, self.style)
            })
            .await
            .copied()
    }
}

#[async_trait]
impl SpeechSynthesizer for VoiceVox {
    fn name(&self) -> &'static str {
        "voicevox"
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let id = self.style_id().await?;
        let id_param = id.to_string();

        let mut query: serde_json::Value = self
            .client
            .post(format!("{}/audio_query", self.endpoint))
            .query(&[("text", text), ("speaker", id_param.as_str())])
            .send()
            .await
            .map_err(|e| AppError::Network(e.to_string()))?
            .error_for_status()?
            .json()
            .await?;
        query["speedScale"] = serde_json::json!(self.speaking_rate);

        let wav = self
            .client
            .post(format!("{}/synthesis", self.endpoint))
            .query(&[("speaker", id_param.as_str())])
            .json(&query)
            .send()
            .await
            .map_err(|e| AppError::Network(e.to_string()))?
            .error_for_status()?
            .bytes()
            .await?;

        wav_to_mp3(wav.to_vec()).await
    }
}

fn select_style(speakers: &[Speaker], speaker: usize, style: usize) -> Result<i64> {
    let chosen = speakers.get(speaker).ok_or_else(|| {
        AppError::Config(format!(
            "voicevox.speaker {speaker} out of range ({} speakers)",
            speakers.len()
        ))
    })?;
    let style_entry = chosen.styles.get(style).ok_or_else(|| {
        AppError::Config(format!(
            "voicevox.style {style} out of range for {} ({} styles)",
            chosen.name,
            chosen.styles.len()
        ))
    })?;
    tracing::debug!(speaker = %chosen.name, style = %style_entry.name, id = style_entry.id, "voicevox style");
    Ok(style_entry.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speakers() -> Vec<Speaker> {
        serde_json::from_str(
            r#"[
                {"name": "四国めたん", "styles": [{"name": "ノーマル", "id": 2}, {"name": "あまあま", "id": 0}]},
                {"name": "ずんだもん", "styles": [{"name": "ノーマル", "id": 3}]}
            ]"#,
        )
        .unwrap()
    }

    #[test]
    fn selects_style_by_index() {
        let speakers = speakers();
        assert_eq!(select_style(&speakers, 0, 1).unwrap(), 0);
        assert_eq!(select_style(&speakers, 1, 0).unwrap(), 3);
    }

    #[test]
    fn out_of_range_is_config_error() {
        let speakers = speakers();
        assert!(matches!(select_style(&speakers, 2, 0), Err(AppError::Config(_))));
        assert!(matches!(select_style(&speakers, 1, 1), Err(AppError::Config(_))));
    }
}
