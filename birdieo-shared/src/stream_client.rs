//! HTTP client for a live-stream proxy (health, detection analysis, still frames).

use std::time::Duration;

use crate::client::{AuthContext, ClientError, HttpCore, DEFAULT_TIMEOUT};
use crate::{AnalyzeResponse, HealthResponse};

/// Still frame bytes as served by `/frame`.
#[derive(Debug, Clone)]
pub struct FrameBytes {
    pub data: Vec<u8>,
    pub content_type: Option<String>,
}

/// Client for a stream proxy.
#[derive(Debug, Clone)]
pub struct StreamClient {
    core: HttpCore,
}

impl StreamClient {
    /// Create a new client pointing to the given proxy base URL
    /// (e.g., "http://localhost:8003").
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            core: HttpCore::new(base_url, timeout)?,
        })
    }

    pub fn base_url(&self) -> &str {
        self.core.base_url()
    }

    /// Stream health.
    pub async fn health(&self, auth: &AuthContext) -> Result<HealthResponse, ClientError> {
        self.core.get("/health", auth).await
    }

    /// Latest detections for the current frame.
    pub async fn analyze(&self, auth: &AuthContext) -> Result<AnalyzeResponse, ClientError> {
        self.core.get("/analyze", auth).await
    }

    /// Cache-busted still frame URL.
    ///
    /// Browsers and CDNs cache `/frame` aggressively, so every fetch carries a
    /// fresh `t=<epoch ms>` parameter.
    pub fn frame_url(&self, epoch_ms: i64) -> String {
        format!("{}/frame?t={epoch_ms}", self.core.base_url())
    }

    /// Fetch one still frame. A proxy without a frame yet answers 503.
    pub async fn fetch_frame(&self, epoch_ms: i64) -> Result<FrameBytes, ClientError> {
        let (data, content_type) = self.core.get_bytes(&self.frame_url(epoch_ms)).await?;
        Ok(FrameBytes { data, content_type })
    }
}
