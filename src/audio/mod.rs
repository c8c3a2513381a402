mod ffmpeg;
mod gemini;
mod google;
mod library;
mod mp3;
mod speaker;
mod voicevox;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::Result;

pub use ffmpeg::{pcm_to_mp3, tempo_filter, wav_to_mp3};
pub use gemini::GeminiTts;
pub use google::GoogleTts;
pub use library::{
    file_stamp, speech_text, within_budget, AudioLibrary, AudioOutcome, MAX_SPEECH_BYTES,
};
pub use mp3::{audio_frames, merge_files, merge_mp3};
pub use speaker::Speaker;
pub use voicevox::VoiceVox;

/// A text-to-speech provider producing MP3 bytes.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fails with `CredentialsMissing` when the provider is not configured.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;

    /// Play MP3 bytes on the shared speaker, blocking until done.
    async fn play(&self, mp3: &[u8]) -> Result<()> {
        Speaker::global().play(mp3.to_vec()).await
    }
}

/// Pick the provider: Gemini when `use_gemini_tts`, else VoiceVox when
/// enabled, else Google Cloud TTS.
pub fn synthesizer_from_config(config: &Config) -> Result<Arc<dyn SpeechSynthesizer>> {
    let synthesizer: Arc<dyn SpeechSynthesizer> = if config.use_gemini_tts {
        Arc::new(GeminiTts::new(
            config.gemini_key().map(str::to_string),
            config.speaking_rate,
        )?)
    } else if config.voicevox.enabled {
        Arc::new(VoiceVox::new(
            &config.voicevox.endpoint,
            config.voicevox.speaker,
            config.voicevox.style,
            config.speaking_rate,
        )?)
    } else {
        let credentials = config
            .google_application_credentials
            .clone()
            .filter(|c| !c.trim().is_empty())
            .or_else(|| std::env::var("GOOGLE_APPLICATION_CREDENTIALS").ok());
        Arc::new(GoogleTts::new(credentials, config.speaking_rate)?)
    };
    tracing::debug!(provider = synthesizer.name(), "speech synthesizer selected");
    Ok(synthesizer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_follows_config_flags() {
        let mut config = Config::default();
        config.google_application_credentials = Some("{}".into());
        assert_eq!(synthesizer_from_config(&config).unwrap().name(), "google");

        config.voicevox.enabled = true;
        assert_eq!(synthesizer_from_config(&config).unwrap().name(), "voicevox");

        config.use_gemini_tts = true;
        assert_eq!(synthesizer_from_config(&config).unwrap().name(), "gemini");
    }
}
