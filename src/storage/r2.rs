//! Cloudflare R2 (S3-compatible) uploads signed with AWS Signature V4.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::{Digest, Sha256};
use url::Url;

use crate::config::CloudflareConfig;
use crate::error::{AppError, Result};

use super::ObjectStore;

type HmacSha256 = Hmac<Sha256>;

const REGION: &str = "auto";
const SERVICE: &str = "s3";
const SIGNED_HEADERS: &str = "host;x-amz-content-sha256;x-amz-date";

pub struct R2Client {
    client: Client,
    endpoint: Url,
    bucket: String,
    access_key_id: String,
    secret_access_key: String,
}

impl R2Client {
    pub fn new(
        endpoint: &str,
        bucket: &str,
        access_key_id: &str,
        secret_access_key: &str,
    ) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| AppError::Config(format!("invalid cloudflare.endpoint_url: {e}")))?;
        if endpoint.host_str().is_none() {
            return Err(AppError::Config("cloudflare.endpoint_url has no host".into()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .user_agent(concat!("quicknews/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            bucket: bucket.to_string(),
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
        })
    }

    pub fn from_config(config: &CloudflareConfig) -> Result<Self> {
        let field = |value: &Option<String>, name: &str| {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| AppError::Config(format!("cloudflare.{name} is not set")))
        };
        Self::new(
            &field(&config.endpoint_url, "endpoint_url")?,
            &field(&config.bucket_name, "bucket_name")?,
            &field(&config.access_key_id, "access_key_id")?,
            &field(&config.secret_access_key, "secret_access_key")?,
        )
    }

    fn host(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    /// Path-style object path, each segment percent-encoded.
    fn object_path(&self, key: &str) -> String {
        let base = self.endpoint.path().trim_end_matches('/');
        let key = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!("{base}/{}/{key}", urlencoding::encode(&self.bucket))
    }

    /// Signed headers: `(x-amz-date, x-amz-content-sha256, authorization)`.
    fn sign(
        &self,
        method: &str,
        path: &str,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<(String, String, String)> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let payload_hash = hex::encode(Sha256::digest(body));

        let canonical = canonical_request(method, path, &self.host(), &payload_hash, &amz_date);
        let scope = format!("{date}/{REGION}/{SERVICE}/aws4_request");
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            hex::encode(Sha256::digest(canonical.as_bytes()))
        );
        let key = signing_key(&self.secret_access_key, &date, REGION, SERVICE)?;
        let signature = hex::encode(hmac(&key, string_to_sign.as_bytes())?);

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}",
            self.access_key_id
        );
        Ok((amz_date, payload_hash, authorization))
    }
}

#[async_trait]
impl ObjectStore for R2Client {
    async fn upload(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        let path = self.object_path(key);
        let (amz_date, payload_hash, authorization) = self.sign("PUT", &path, &body, Utc::now())?;

        let mut url = self.endpoint.clone();
        url.set_path(&path);
        let size = body.len();

        let response = self
            .client
            .put(url)
            .header("host", self.host())
            .header("x-amz-date", amz_date)
            .header("x-amz-content-sha256", payload_hash)
            .header("authorization", authorization)
            .header("content-type", content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| AppError::Upload(format!("{key}: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Upload(format!("{key}: {status} {text}")));
        }
        tracing::info!(key, size, bucket = %self.bucket, "uploaded object");
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.object_path(key);
        let (amz_date, payload_hash, authorization) = self.sign("GET", &path, b"", Utc::now())?;

        let mut url = self.endpoint.clone();
        url.set_path(&path);
        let response = self
            .client
            .get(url)
            .header("host", self.host())
            .header("x-amz-date", amz_date)
            .header("x-amz-content-sha256", payload_hash)
            .header("authorization", authorization)
            .send()
            .await
            .map_err(|e| AppError::Network(format!("{key}: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AppError::Network(format!("{key}: {}", response.status())));
        }
        Ok(Some(response.bytes().await?.to_vec()))
    }
}

fn canonical_request(method: &str, path: &str, host: &str, payload_hash: &str, amz_date: &str) -> String {
    format!(
        "{method}\n{path}\n\nhost:{host}\nx-amz-content-sha256:{payload_hash}\nx-amz-date:{amz_date}\n\n{SIGNED_HEADERS}\n{payload_hash}"
    )
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| AppError::Upload(format!("signing key rejected: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Result<Vec<u8>> {
    let k_date = hmac(format!("AWS4{secret}").as_bytes(), date.as_bytes())?;
    let k_region = hmac(&k_date, region.as_bytes())?;
    let k_service = hmac(&k_region, service.as_bytes())?;
    hmac(&k_service, b"aws4_request")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn client() -> R2Client {
        R2Client::new(
            "https://account.r2.cloudflarestorage.com",
            "podcast",
            "AKIDEXAMPLE",
            "secret",
        )
        .unwrap()
    }

    #[test]
    fn signing_key_matches_aws_reference() {
        let key = signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        )
        .unwrap();
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn object_path_is_path_style_and_encoded() {
        let client = client();
        assert_eq!(
            client.object_path("2026-10-18_Tech_News.mp3"),
            "/podcast/2026-10-18_Tech_News.mp3"
        );
        assert_eq!(client.object_path("a b/ニュース.mp3"), "/podcast/a%20b/%E3%83%8B%E3%83%A5%E3%83%BC%E3%82%B9.mp3");
    }

    #[test]
    fn authorization_header_shape() {
        let client = client();
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 6, 0, 30).unwrap();
        let (amz_date, payload_hash, auth) =
            client.sign("PUT", "/podcast/rss.xml", b"", now).unwrap();
        assert_eq!(amz_date, "20261018T060030Z");
        // SHA-256 of the empty string.
        assert_eq!(
            payload_hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert!(auth.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20261018/auto/s3/aws4_request, SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature="
        ));
        let signature = auth.rsplit('=').next().unwrap();
        assert_eq!(signature.len(), 64);

        // Deterministic for the same inputs.
        let (_, _, again) = client.sign("PUT", "/podcast/rss.xml", b"", now).unwrap();
        assert_eq!(auth, again);
    }

    #[test]
    fn from_config_requires_every_field() {
        let mut config = CloudflareConfig {
            access_key_id: Some("a".into()),
            secret_access_key: Some("s".into()),
            bucket_name: Some("b".into()),
            endpoint_url: None,
        };
        assert!(matches!(R2Client::from_config(&config), Err(AppError::Config(_))));
        config.endpoint_url = Some("https://example.com".into());
        assert!(R2Client::from_config(&config).is_ok());
    }
}
