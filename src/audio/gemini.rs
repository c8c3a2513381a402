use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

use super::{pcm_to_mp3, SpeechSynthesizer};

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const TTS_MODEL: &str = "gemini-2.5-flash-preview-tts";
const VOICE_NAME: &str = "Kore";
const DEFAULT_SAMPLE_RATE: u32 = 24_000;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TtsRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
    speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoice,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoice {
    voice_name: &'static str,
}

#[derive(Debug, Deserialize)]
struct TtsResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: String,
    data: String,
}

/// Gemini speech generation. The API returns s16le mono PCM, which is
/// re-encoded to MP3 by ffmpeg with the speaking rate applied.
pub struct GeminiTts {
    client: Client,
    api_key: Option<String>,
    speaking_rate: f64,
}

impl GeminiTts {
    pub fn new(api_key: Option<String>, speaking_rate: f64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(180))
            .user_agent(concat!("quicknews/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_key,
            speaking_rate,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for GeminiTts {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::CredentialsMissing("Gemini TTS".into()))?;

        let request = TtsRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text }],
            }],
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO"],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoice {
                            voice_name: VOICE_NAME,
                        },
                    },
                },
            },
        };

        let response = self
            .client
            .post(format!("{}/{}:generateContent", GEMINI_API_URL, TTS_MODEL))
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Network(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Audio(format!("Gemini TTS error {status}: {text}")));
        }

        let body: TtsResponse = response
            .json()
            .await
            .map_err(|e| AppError::Parse(e.to_string()))?;
        let inline = body
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .find_map(|p| p.inline_data)
            .ok_or_else(|| AppError::EmptyResponse("Gemini TTS".into()))?;

        let pcm = base64::engine::general_purpose::STANDARD
            .decode(&inline.data)
            .map_err(|e| AppError::Parse(format!("inline audio is not base64: {e}")))?;
        let rate = sample_rate_from_mime(&inline.mime_type).unwrap_or(DEFAULT_SAMPLE_RATE);
        tracing::debug!(bytes = pcm.len(), rate, "gemini pcm received");
        pcm_to_mp3(pcm, rate, self.speaking_rate).await
    }
}

/// `audio/L16;codec=pcm;rate=24000` -> 24000
fn sample_rate_from_mime(mime: &str) -> Option<u32> {
    mime.split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_rate_from_mime_type() {
        assert_eq!(sample_rate_from_mime("audio/L16;codec=pcm;rate=24000"), Some(24000));
        assert_eq!(sample_rate_from_mime("audio/L16; rate=16000"), Some(16000));
        assert_eq!(sample_rate_from_mime("audio/L16"), None);
    }

    #[tokio::test]
    async fn missing_key_is_credentials_error() {
        let tts = GeminiTts::new(None, 1.3).unwrap();
        assert!(matches!(
            tts.synthesize("text").await,
            Err(AppError::CredentialsMissing(_))
        ));
    }

    #[test]
    fn request_asks_for_audio() {
        let request = TtsRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: "hi" }],
            }],
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO"],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoice { voice_name: VOICE_NAME },
                    },
                },
            },
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            value["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Kore"
        );
    }
}
