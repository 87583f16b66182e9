use crate::traits::Capture;
use crate::types::{FeedError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

/// Headless-browser screenshots through a Browserless `/screenshot` endpoint.
pub struct BrowserlessCapture {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    quality: u8,
}

impl BrowserlessCapture {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
            quality: 20,
        })
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    fn failure(url: &str, message: impl Into<String>) -> FeedError {
        FeedError::CaptureFailure {
            url: url.to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Capture for BrowserlessCapture {
    async fn capture(&self, url: &str) -> Result<Vec<u8>> {
        let mut endpoint = format!("{}/screenshot", self.base_url);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }

        let body = serde_json::json!({
            "url": url,
            "options": { "type": "jpeg", "quality": self.quality },
        });

        let resp = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::failure(url, e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(Self::failure(url, format!("status {}: {}", status.as_u16(), message)));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Self::failure(url, e.to_string()))?;
        if bytes.is_empty() {
            return Err(Self::failure(url, "empty screenshot"));
        }

        debug!("Captured {} ({} bytes)", url, bytes.len());
        Ok(bytes.to_vec())
    }
}

/// Caps how many captures run at once, independent of the creator pool.
pub struct CapturePool {
    inner: Arc<dyn Capture>,
    permits: Arc<Semaphore>,
}

impl CapturePool {
    pub fn new(inner: Arc<dyn Capture>, max_concurrent: usize) -> Self {
        Self {
            inner,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

#[async_trait]
impl Capture for CapturePool {
    async fn capture(&self, url: &str) -> Result<Vec<u8>> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FeedError::Cancelled)?;
        self.inner.capture(url).await
    }
}
