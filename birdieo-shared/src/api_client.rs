//! HTTP client for the Birdieo backend API.
//!
//! Covers camera-processing control, round activation, photo persistence and
//! appearance analysis. Every call takes an explicit [`AuthContext`].

use std::time::Duration;

use crate::client::{AuthContext, ClientError, HttpCore, DEFAULT_TIMEOUT};
use crate::{
    ActivateRoundResponse, AnalyzePhotoRequest, AppearanceAnalysis, CameraControlResponse,
    CameraStatus, PhotoType, SaveAnalysisRequest, SavePhotoRequest, SavePhotoResponse,
};

/// Client for the backend API (typically mounted under `/api`).
#[derive(Debug, Clone)]
pub struct ApiClient {
    core: HttpCore,
}

impl ApiClient {
    /// Create a new client pointing to the given base URL.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The API base URL (e.g., "http://localhost:8001/api")
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self {
            core: HttpCore::new(base_url, timeout)?,
        })
    }

    /// Get the base URL this client is configured for.
    pub fn base_url(&self) -> &str {
        self.core.base_url()
    }

    // === Camera Processing ===

    /// Get camera-processing status.
    pub async fn camera_status(&self, auth: &AuthContext) -> Result<CameraStatus, ClientError> {
        self.core.get("/camera/status", auth).await
    }

    /// Start the shot-detection camera processor.
    pub async fn start_camera(
        &self,
        auth: &AuthContext,
    ) -> Result<CameraControlResponse, ClientError> {
        self.core.post_empty("/camera/start", auth).await
    }

    /// Stop the shot-detection camera processor.
    pub async fn stop_camera(
        &self,
        auth: &AuthContext,
    ) -> Result<CameraControlResponse, ClientError> {
        self.core.post_empty("/camera/stop", auth).await
    }

    /// Activate recording for a round.
    pub async fn activate_round(
        &self,
        auth: &AuthContext,
        round_id: &str,
    ) -> Result<ActivateRoundResponse, ClientError> {
        self.core
            .post_empty(&format!("/rounds/{round_id}/activate"), auth)
            .await
    }

    // === Photos ===

    /// Persist an identification photo.
    pub async fn save_photo(
        &self,
        auth: &AuthContext,
        request: &SavePhotoRequest,
    ) -> Result<SavePhotoResponse, ClientError> {
        self.core.post("/photos/save", request, auth).await
    }

    /// Run appearance analysis on a photo.
    pub async fn analyze_photo(
        &self,
        auth: &AuthContext,
        photo_base64: &str,
        photo_type: PhotoType,
    ) -> Result<AppearanceAnalysis, ClientError> {
        let request = AnalyzePhotoRequest {
            photo_base64: photo_base64.to_string(),
            photo_type,
        };
        self.core.post("/analyze-photo", &request, auth).await
    }

    /// Persist analysis results against the stored photo.
    pub async fn save_analysis(
        &self,
        auth: &AuthContext,
        request: &SaveAnalysisRequest,
    ) -> Result<(), ClientError> {
        self.core.post_no_response("/photos/analysis", request, auth).await
    }
}
