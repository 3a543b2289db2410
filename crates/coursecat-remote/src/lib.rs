//! HTTP fetch of remote course APIs.

use std::time::Duration;

use anyhow::Context;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info_span, Instrument};

pub const CRATE_NAME: &str = "coursecat-remote";

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http status {status} for {url}")]
    RequestFailed { status: u16, url: String },
    #[error("response from {url} is not valid JSON: {source}")]
    MalformedResponse {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl FetchError {
    /// HTTP status carried by a `RequestFailed`, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RequestFailed { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub final_url: String,
    pub body: Vec<u8>,
}

/// Single-attempt GET client. Failures are reported, never retried.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    pub async fn fetch_bytes(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", url);
        async move {
            let resp = self
                .client
                .get(url)
                .header(reqwest::header::ACCEPT, "application/json")
                .send()
                .await?;
            let status = resp.status();
            let final_url = resp.url().to_string();

            if !status.is_success() {
                tracing::warn!(status = status.as_u16(), "remote course API returned an error status");
                return Err(FetchError::RequestFailed {
                    status: status.as_u16(),
                    url: final_url,
                });
            }

            let body = resp.bytes().await?.to_vec();
            tracing::debug!(bytes = body.len(), "fetched remote course API");
            Ok(FetchedResponse { final_url, body })
        }
        .instrument(span)
        .await
    }

    /// GET `url` and parse the body as JSON.
    pub async fn fetch_json(&self, url: &str) -> Result<JsonValue, FetchError> {
        let fetched = self.fetch_bytes(url).await?;
        parse_json_body(&fetched.final_url, &fetched.body)
    }
}

pub fn parse_json_body(url: &str, body: &[u8]) -> Result<JsonValue, FetchError> {
    serde_json::from_slice(body).map_err(|source| FetchError::MalformedResponse {
        url: url.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_body_is_reported_with_url() {
        let err = parse_json_body("https://x.test/api/courses", b"<html>oops</html>").unwrap_err();
        assert!(matches!(err, FetchError::MalformedResponse { .. }));
        assert!(err.to_string().contains("https://x.test/api/courses"));
        assert_eq!(err.status(), None);
    }

    #[test]
    fn valid_body_parses() {
        let value = parse_json_body("u", br#"{"data": []}"#).unwrap();
        assert!(value.get("data").is_some());
    }

    #[test]
    fn request_failed_exposes_status() {
        let err = FetchError::RequestFailed {
            status: 503,
            url: "https://x.test".into(),
        };
        assert_eq!(err.status(), Some(503));
        assert_eq!(err.to_string(), "http status 503 for https://x.test");
    }

    #[test]
    fn client_builds_with_user_agent() {
        let fetcher = HttpFetcher::new(HttpClientConfig {
            user_agent: Some("coursecat-test/0.1".into()),
            ..HttpClientConfig::default()
        });
        assert!(fetcher.is_ok());
    }
}
