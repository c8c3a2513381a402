//! Google Cloud Text-to-Speech using a service-account key.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::expand_home;
use crate::error::{AppError, Result};

use super::SpeechSynthesizer;

const SYNTHESIZE_URL: &str = "https://texttospeech.googleapis.com/v1/text:synthesize";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const VOICE_NAME: &str = "ja-JP-Neural2-B";
const LANGUAGE_CODE: &str = "ja-JP";
const TOKEN_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ServiceAccount {
    client_email: String,
    private_key: String,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeRequest<'a> {
    input: TextInput<'a>,
    voice: Voice<'a>,
    audio_config: AudioConfig,
}

#[derive(Debug, Serialize)]
struct TextInput<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Voice<'a> {
    language_code: &'a str,
    name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AudioConfig {
    audio_encoding: &'static str,
    speaking_rate: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    audio_content: String,
}

pub struct GoogleTts {
    client: Client,
    credentials: Option<String>,
    speaking_rate: f64,
    token: Mutex<Option<(String, Instant)>>,
}

impl GoogleTts {
    /// `credentials` is a path to a service-account key file or the key JSON
    /// itself. It is read on first use.
    pub fn new(credentials: Option<String>, speaking_rate: f64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("quicknews/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            credentials,
            speaking_rate,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some((token, expires)) = cached.as_ref() {
            if Instant::now() < *expires {
                return Ok(token.clone());
            }
        }

        let account = load_service_account(self.credentials.as_deref())?;
        let token_uri = account.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
        let assertion = sign_assertion(&account, chrono::Utc::now().timestamp())?;
        let body = format!(
            "grant_type={}&assertion={}",
            urlencoding::encode("urn:ietf:params:oauth:grant-type:jwt-bearer"),
            urlencoding::encode(&assertion)
        );

        let response = self
            .client
            .post(token_uri)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| AppError::Network(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Network(format!("token exchange failed {status}: {text}")));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::Parse(e.to_string()))?;

        // Refresh a minute early.
        let ttl = token.expires_in.unwrap_or(3600).saturating_sub(60);
        *cached = Some((
            token.access_token.clone(),
            Instant::now() + Duration::from_secs(ttl),
        ));
        Ok(token.access_token)
    }
}

#[async_trait]
impl SpeechSynthesizer for GoogleTts {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let token = self.access_token().await?;
        let request = SynthesizeRequest {
            input: TextInput { text },
            voice: Voice {
                language_code: LANGUAGE_CODE,
                name: VOICE_NAME,
            },
            audio_config: AudioConfig {
                audio_encoding: "MP3",
                speaking_rate: self.speaking_rate,
            },
        };

        let response = self
            .client
            .post(SYNTHESIZE_URL)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Network(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Audio(format!("Text-to-Speech error {status}: {text}")));
        }

        let body: SynthesizeResponse = response
            .json()
            .await
            .map_err(|e| AppError::Parse(e.to_string()))?;
        base64::engine::general_purpose::STANDARD
            .decode(body.audio_content)
            .map_err(|e| AppError::Parse(format!("audioContent is not base64: {e}")))
    }
}

/// Parse a service account from inline JSON or a key file path.
pub(crate) fn load_service_account(source: Option<&str>) -> Result<ServiceAccount> {
    let missing = || AppError::CredentialsMissing("Google Text-to-Speech".into());
    let source = source.map(str::trim).filter(|s| !s.is_empty()).ok_or_else(missing)?;

    let json = if source.starts_with('{') {
        source.to_string()
    } else {
        let path = expand_home(source);
        if !Path::new(&path).exists() {
            return Err(missing());
        }
        std::fs::read_to_string(path)?
    };
    let account: ServiceAccount = serde_json::from_str(&json)?;
    if account.client_email.is_empty() || account.private_key.is_empty() {
        return Err(missing());
    }
    Ok(account)
}

fn sign_assertion(account: &ServiceAccount, now: i64) -> Result<String> {
    let claims = Claims {
        iss: &account.client_email,
        scope: SCOPE,
        aud: account.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI),
        iat: now,
        exp: now + TOKEN_LIFETIME_SECS,
    };
    let key = EncodingKey::from_rsa_pem(account.private_key.as_bytes())
        .map_err(|e| AppError::Config(format!("invalid service account key: {e}")))?;
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
        .map_err(|e| AppError::Config(format!("failed to sign token request: {e}")))
}
