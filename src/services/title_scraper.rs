use std::time::Duration;

use regex::Regex;
use reqwest::header::{HeaderValue, USER_AGENT};
use reqwest::Client;

use crate::error::{AppError, Result};

const USER_AGENT_STRING: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Looks up the `<title>` of a web page for bookmarks.
pub struct TitleScraper {
    client: Client,
}

impl TitleScraper {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }

    /// The page title, or the url itself when the page has none.
    pub async fn fetch_title(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, HeaderValue::from_static(USER_AGENT_STRING))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::Network(format!("{url}: {}", response.status())));
        }
        let html = response.text().await?;
        Ok(extract_title(&html).unwrap_or_else(|| {
            tracing::debug!(url, "page has no title");
            url.to_string()
        }))
    }
}

/// Text of the first `<title>` element with whitespace collapsed.
pub fn extract_title(html: &str) -> Option<String> {
    let title_re = Regex::new(r"(?is)<title[^>]*>(.*?)</title>").ok()?;
    let raw = title_re.captures(html)?.get(1)?.as_str();
    let title = decode_entities(&raw.split_whitespace().collect::<Vec<_>>().join(" "));
    (!title.is_empty()).then_some(title)
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#039;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_title_across_lines() {
        let html = "<html><head>\n<TITLE lang=\"ja\">\n  新しい CPU &amp; GPU\n  発表 </TITLE></head></html>";
        assert_eq!(extract_title(html).as_deref(), Some("新しい CPU & GPU 発表"));
    }

    #[test]
    fn missing_or_empty_title() {
        assert_eq!(extract_title("<html><body>no title</body></html>"), None);
        assert_eq!(extract_title("<title>  </title>"), None);
    }
}
