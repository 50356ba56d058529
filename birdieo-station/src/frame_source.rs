//! Live frame sources shown behind the capture and monitor views.
//!
//! A source either serves still frames from a stream proxy's `/frame`
//! endpoint or is an external page embedded as-is.

use std::future::Future;
use std::time::Duration;

use birdieo_shared::StreamClient;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::StationConfig;
use crate::error::{CaptureError, CaptureResult};
use crate::frame::jpeg_dimensions;

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 20_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `failure_count` consecutive
    /// failures (0-based): base, 2x base, 4x base, ... capped at max.
    pub fn delay_for(&self, failure_count: u32) -> Duration {
        let exponential = self
            .base_delay_ms
            .saturating_mul(2_u64.pow(failure_count.min(10)));
        Duration::from_millis(exponential.min(self.max_delay_ms))
    }

    /// Run `op` until it succeeds or `max_attempts` is exhausted.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> CaptureResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = CaptureResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            attempt += 1;
            if attempt >= max_attempts {
                warn!("{what} failed after {attempt} attempts: {err}");
                return Err(err);
            }
            let delay = self.delay_for(attempt - 1);
            warn!("{what} failed: {err}. Retrying in {:.1}s", delay.as_secs_f64());
            tokio::time::sleep(delay).await;
        }
    }
}

/// How a configured stream source is displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    #[default]
    StillImage,
    EmbeddedPage,
}

/// A decoded still frame.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveFrame {
    pub jpeg: Bytes,
    pub width: u32,
    pub height: u32,
    pub fetched_at: DateTime<Utc>,
}

/// What the UI should show for a source.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameView {
    Still(LiveFrame),
    Embedded { url: String },
}

#[derive(Debug, Clone)]
pub enum FrameSource {
    StillImage { client: StreamClient },
    EmbeddedPage { url: String },
}

impl FrameSource {
    pub fn new(mode: SourceMode, client: StreamClient) -> Self {
        match mode {
            SourceMode::StillImage => FrameSource::StillImage { client },
            SourceMode::EmbeddedPage => FrameSource::EmbeddedPage {
                url: client.base_url().to_string(),
            },
        }
    }

    pub fn mode(&self) -> SourceMode {
        match self {
            FrameSource::StillImage { .. } => SourceMode::StillImage,
            FrameSource::EmbeddedPage { .. } => SourceMode::EmbeddedPage,
        }
    }

    /// Fetch the next view. Embedded pages are never fetched.
    pub async fn next_view(&self, policy: &RetryPolicy) -> CaptureResult<FrameView> {
        let client = match self {
            FrameSource::EmbeddedPage { url } => {
                return Ok(FrameView::Embedded { url: url.clone() });
            }
            FrameSource::StillImage { client } => client,
        };

        let frame = policy
            .run("Frame fetch", |_| async move {
                let fetched_at = Utc::now();
                let bytes = client.fetch_frame(fetched_at.timestamp_millis()).await?;
                let jpeg = Bytes::from(bytes.data);
                let (width, height) = jpeg_dimensions(&jpeg).map_err(|e| {
                    CaptureError::Unknown(format!("{} served an undecodable frame: {e}", client.base_url()))
                })?;
                Ok::<_, CaptureError>(LiveFrame {
                    jpeg,
                    width,
                    height,
                    fetched_at,
                })
            })
            .await?;

        debug!("Fetched {}x{} frame from {}", frame.width, frame.height, client.base_url());
        Ok(FrameView::Still(frame))
    }
}

/// Fetch one view from every configured stream, using the configured
/// frame retry policy.
///
/// Sources are fetched concurrently and results keep config order. A source
/// that exhausts its retries only fails its own entry.
pub async fn fetch_views(config: &StationConfig) -> Vec<(String, CaptureResult<FrameView>)> {
    join_all(config.streams.iter().map(|stream| async move {
        let view = match stream.frame_source() {
            Ok(source) => source.next_view(&config.frame_retry).await,
            Err(e) => Err(CaptureError::from(e)),
        };
        (stream.name.clone(), view)
    }))
    .await
}
