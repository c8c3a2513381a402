use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const GEMINI_MODEL: &str = "gemini-2.5-flash";
const SEPARATOR: &str = "-----";

/// Phrases the model likes to prepend to the title line.
const TITLE_NOISE: &[&str] = &["**記事のタイトル**", "了解しました。", "了解いたしました。", "#", "*", "\n", "\r"];

const DEFAULT_PROMPT: &str = r#"次のURLの記事をWeb検索で読み、内容を日本語で要約してください。
URL: %s

出力形式:
1行目に記事のタイトルだけを書いてください。
2行目に区切り線として ----- だけを書いてください。
3行目以降に記事の内容を、複数の段落で分かりやすく説明してください。
前置きや挨拶は書かないでください。"#;

/// Title and body produced for one article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestText {
    pub title: String,
    pub body: String,
}

#[async_trait]
pub trait Summarize: Send + Sync {
    async fn summarize(&self, url: &str) -> Result<DigestText>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    tools: Vec<Tool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
struct Tool {
    google_search: GoogleSearch,
}

#[derive(Debug, Serialize)]
struct GoogleSearch {}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

pub struct Summarizer {
    client: Client,
    api_key: String,
    prompt: String,
}

impl Summarizer {
    pub fn new(api_key: String, prompt: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .user_agent(concat!("quicknews/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_key,
            prompt: prompt
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_PROMPT.to_string()),
        })
    }

    pub fn model_version(&self) -> &'static str {
        GEMINI_MODEL
    }

    async fn generate(&self, url: &str) -> Result<String> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: Some(self.prompt.replace("%s", url)),
                }],
            }],
            tools: vec![Tool {
                google_search: GoogleSearch {},
            }],
        };

        let response = self
            .client
            .post(format!("{}/{}:generateContent", GEMINI_API_URL, GEMINI_MODEL))
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Network(format!("Gemini API error {}: {}", status, error_text)));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AppError::Parse(e.to_string()))?;

        let text = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<String>()
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(AppError::EmptyResponse(url.to_string()));
        }
        Ok(text)
    }
}

#[async_trait]
impl Summarize for Summarizer {
    async fn summarize(&self, url: &str) -> Result<DigestText> {
        let reply = self.generate(url).await?;
        parse_reply(&reply)
    }
}

/// Split a model reply of the form `title\n-----\nbody` into its halves.
pub fn parse_reply(reply: &str) -> Result<DigestText> {
    let halves: Vec<&str> = reply.trim().split(SEPARATOR).collect();
    if halves.len() != 2 {
        return Err(AppError::Parse(format!(
            "expected one {:?} separator, found {}",
            SEPARATOR,
            halves.len().saturating_sub(1)
        )));
    }

    let mut title = halves[0].to_string();
    for noise in TITLE_NOISE {
        title = title.replace(noise, "");
    }
    let title = title.trim().to_string();
    let body = halves[1].replace("\n\n", "\n").trim().to_string();

    if title.is_empty() || body.is_empty() {
        return Err(AppError::Parse("empty title or body in reply".into()));
    }
    Ok(DigestText { title, body })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_title_and_body() {
        let digest = parse_reply("T\n-----\nB\n").unwrap();
        assert_eq!(digest.title, "T");
        assert_eq!(digest.body, "B");
    }

    #[test]
    fn strips_title_noise() {
        let reply = "了解しました。\n## **記事のタイトル** 新しいCPUの発表\n-----\n本文";
        let digest = parse_reply(reply).unwrap();
        assert_eq!(digest.title, "新しいCPUの発表");
    }

    #[test]
    fn collapses_double_newlines_in_body() {
        let digest = parse_reply("Title\n-----\n\nfirst\n\nsecond\n").unwrap();
        assert_eq!(digest.body, "first\nsecond");
    }

    #[test]
    fn rejects_missing_or_repeated_separator() {
        assert!(matches!(parse_reply("no separator"), Err(AppError::Parse(_))));
        assert!(matches!(parse_reply("a\n-----\nb\n-----\nc"), Err(AppError::Parse(_))));
    }

    #[test]
    fn rejects_empty_halves() {
        assert!(parse_reply("-----\nbody").is_err());
        assert!(parse_reply("**\n-----\nbody").is_err());
        assert!(parse_reply("title\n-----\n   ").is_err());
    }

    #[test]
    fn custom_prompt_substitutes_url() {
        let summarizer =
            Summarizer::new("key".into(), Some("summarize %s please".into())).unwrap();
        assert_eq!(summarizer.prompt.replace("%s", "https://x/a"), "summarize https://x/a please");
        assert_eq!(summarizer.model_version(), "gemini-2.5-flash");
    }
}
