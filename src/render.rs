use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use spider_client::shapes::request::{ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};
use tracing::warn;

use crate::config::Settings;
use crate::error::StageError;

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;

/// Renders a URL to its final HTML. The site is an Angular application, so
/// plain GETs return an empty shell; rendering happens behind this trait and
/// tests substitute canned pages.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<String, StageError>;
}

/// Resolves a gateway URL through its redirect chain and optionally
/// downloads the final document.
#[async_trait]
pub trait FullTextResolver: Send + Sync {
    async fn resolve(&self, gateway_url: &str) -> Result<String, StageError>;

    /// Byte size and SHA-256 of the document at `url`.
    async fn download(&self, url: &str) -> Result<(i64, String), StageError>;
}

/// spider.cloud-backed renderer, with bounded retry on rate limits and
/// server errors.
pub struct SpiderRenderer {
    spider: Spider,
}

impl SpiderRenderer {
    pub fn new(settings: &Settings) -> Result<Self> {
        let api_key = settings
            .spider_api_key
            .clone()
            .context("STF_SPIDER_API_KEY is not set")?;
        let spider = Spider::new(Some(api_key))
            .map_err(|e| anyhow::anyhow!("Failed to create spider client: {e}"))?;
        Ok(SpiderRenderer { spider })
    }

    async fn render_once(&self, url: &str) -> Result<String, StageError> {
        let params = RequestParams {
            return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Raw)),
            ..Default::default()
        };

        let response = self
            .spider
            .scrape_url(url, Some(params), "application/json")
            .await
            .map_err(|e| StageError::Render(e.to_string()))?;

        // The API sometimes returns the JSON body as a string.
        let parsed: serde_json::Value = match response.as_str() {
            Some(s) => serde_json::from_str(s).unwrap_or(response.clone()),
            None => response,
        };

        parsed
            .as_array()
            .and_then(|arr| arr.first())
            .and_then(|obj| obj.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| StageError::Render(format!("no content in response for {url}")))
    }
}

fn transient(message: &str) -> bool {
    message.contains("429")
        || message.contains("rate")
        || message.contains("500")
        || message.contains("502")
        || message.contains("503")
}

#[async_trait]
impl PageRenderer for SpiderRenderer {
    async fn render(&self, url: &str) -> Result<String, StageError> {
        for attempt in 0..MAX_RETRIES {
            match self.render_once(url).await {
                Ok(html) => return Ok(html),
                Err(StageError::Render(msg)) if transient(&msg) => {
                    let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
                    warn!(
                        url,
                        attempt = attempt + 1,
                        backoff_s = backoff.as_secs_f64(),
                        "transient render failure, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
        self.render_once(url).await
    }
}

/// Plain-HTTP collaborator for the collect stage: the gateway servlet
/// redirects to the hosted document, and redirect following is all that is
/// needed to land on the final URL.
pub struct ArtifactFetcher {
    client: reqwest::Client,
}

impl ArtifactFetcher {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .context("Failed to build http client")?;
        Ok(ArtifactFetcher { client })
    }
}

#[async_trait]
impl FullTextResolver for ArtifactFetcher {
    async fn resolve(&self, gateway_url: &str) -> Result<String, StageError> {
        let response = self.client.get(gateway_url).send().await?.error_for_status()?;
        Ok(response.url().to_string())
    }

    async fn download(&self, url: &str) -> Result<(i64, String), StageError> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        let digest = Sha256::digest(&bytes);
        let sha256 = digest.iter().map(|b| format!("{b:02x}")).collect();
        Ok((bytes.len() as i64, sha256))
    }
}
