//! Two-stage photo submission.
//!
//! Stage 1 persists the photo. Stage 2, for everything but face photos, runs
//! appearance analysis and persists the result. A stage 2 failure leaves the
//! photo saved and is reported as a passive notice.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use birdieo_shared::{
    ApiClient, AppearanceAnalysis, AuthContext, ClientError, PhotoType, SaveAnalysisRequest,
    SavePhotoRequest, SavePhotoResponse,
};
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::error::{CaptureError, CaptureResult};
use crate::frame::CapturedArtifact;

/// Backend calls the pipeline needs. Implemented by [`ApiClient`].
pub trait PhotoService: Send + Sync + 'static {
    fn save_photo<'a>(
        &'a self,
        auth: &'a AuthContext,
        request: &'a SavePhotoRequest,
    ) -> BoxFuture<'a, Result<SavePhotoResponse, ClientError>>;

    fn analyze_photo<'a>(
        &'a self,
        auth: &'a AuthContext,
        photo_base64: &'a str,
        photo_type: PhotoType,
    ) -> BoxFuture<'a, Result<AppearanceAnalysis, ClientError>>;

    fn save_analysis<'a>(
        &'a self,
        auth: &'a AuthContext,
        request: &'a SaveAnalysisRequest,
    ) -> BoxFuture<'a, Result<(), ClientError>>;
}

impl PhotoService for ApiClient {
    fn save_photo<'a>(
        &'a self,
        auth: &'a AuthContext,
        request: &'a SavePhotoRequest,
    ) -> BoxFuture<'a, Result<SavePhotoResponse, ClientError>> {
        ApiClient::save_photo(self, auth, request).boxed()
    }

    fn analyze_photo<'a>(
        &'a self,
        auth: &'a AuthContext,
        photo_base64: &'a str,
        photo_type: PhotoType,
    ) -> BoxFuture<'a, Result<AppearanceAnalysis, ClientError>> {
        ApiClient::analyze_photo(self, auth, photo_base64, photo_type).boxed()
    }

    fn save_analysis<'a>(
        &'a self,
        auth: &'a AuthContext,
        request: &'a SaveAnalysisRequest,
    ) -> BoxFuture<'a, Result<(), ClientError>> {
        ApiClient::save_analysis(self, auth, request).boxed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    Pending,
    Saved,
    Analyzed,
    Failed,
}

/// One photo's progress through the pipeline.
#[derive(Debug, Clone)]
pub struct PhotoSubmission {
    pub artifact: Arc<CapturedArtifact>,
    pub round_id: String,
    pub upload_state: UploadState,
    pub photo_id: Option<String>,
    pub analysis: Option<AppearanceAnalysis>,
    /// Non-fatal problems, e.g. a failed analysis
    pub notices: Vec<CaptureError>,
}

impl PhotoSubmission {
    fn new(artifact: Arc<CapturedArtifact>, round_id: &str) -> Self {
        Self {
            artifact,
            round_id: round_id.to_string(),
            upload_state: UploadState::Pending,
            photo_id: None,
            analysis: None,
            notices: Vec::new(),
        }
    }

    pub fn photo_type(&self) -> PhotoType {
        self.artifact.photo_type()
    }
}

type SubmissionKey = (String, PhotoType);

/// Holds a key in the in-flight set until dropped.
struct InFlight {
    keys: Arc<Mutex<HashSet<SubmissionKey>>>,
    key: SubmissionKey,
}

impl InFlight {
    fn claim(keys: &Arc<Mutex<HashSet<SubmissionKey>>>, key: SubmissionKey) -> Option<Self> {
        let mut set = keys.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(key.clone()) {
            return None;
        }
        Some(Self {
            keys: keys.clone(),
            key,
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut set = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.key);
    }
}

pub struct PhotoPipeline {
    service: Arc<dyn PhotoService>,
    in_flight: Arc<Mutex<HashSet<SubmissionKey>>>,
    events: broadcast::Sender<PhotoSubmission>,
}

impl PhotoPipeline {
    pub fn new(service: Arc<dyn PhotoService>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            service,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            events,
        }
    }

    /// Every state change of every submission.
    pub fn subscribe(&self) -> broadcast::Receiver<PhotoSubmission> {
        self.events.subscribe()
    }

    /// Save a photo and, unless it is a face photo, analyze it.
    ///
    /// Fails only when stage 1 fails or another submission for the same
    /// round and photo type is still in flight.
    pub async fn submit(
        &self,
        auth: &AuthContext,
        artifact: Arc<CapturedArtifact>,
        round_id: &str,
    ) -> CaptureResult<PhotoSubmission> {
        let photo_type = artifact.photo_type();
        let _guard = InFlight::claim(&self.in_flight, (round_id.to_string(), photo_type))
            .ok_or(CaptureError::SubmissionInProgress)?;

        let mut submission = PhotoSubmission::new(artifact.clone(), round_id);
        self.publish(&submission);

        let photo_base64 = artifact.to_base64();
        let request = SavePhotoRequest {
            photo_data: photo_base64.clone(),
            photo_type,
            round_id: round_id.to_string(),
            timestamp: artifact.captured_at(),
        };

        info!("Saving {} photo for round {}", photo_type, round_id);
        let saved = match self.service.save_photo(auth, &request).await {
            Ok(saved) => saved,
            Err(e) => {
                let err = CaptureError::from(e);
                warn!("Saving {} photo failed: {}", photo_type, err);
                submission.upload_state = UploadState::Failed;
                self.publish(&submission);
                return Err(err);
            }
        };
        submission.photo_id = Some(saved.photo_id);
        submission.upload_state = UploadState::Saved;
        self.publish(&submission);

        if !photo_type.is_analyzable() {
            return Ok(submission);
        }

        match self.analyze(auth, &photo_base64, photo_type, round_id).await {
            Ok(analysis) => {
                info!("Analyzed {} photo for round {}", photo_type, round_id);
                submission.analysis = Some(analysis);
                submission.upload_state = UploadState::Analyzed;
            }
            Err(e) => {
                warn!("Analysis of {} photo failed, photo kept: {}", photo_type, e);
                submission
                    .notices
                    .push(CaptureError::AnalysisFailed(e.to_string()));
            }
        }
        self.publish(&submission);
        Ok(submission)
    }

    async fn analyze(
        &self,
        auth: &AuthContext,
        photo_base64: &str,
        photo_type: PhotoType,
        round_id: &str,
    ) -> Result<AppearanceAnalysis, ClientError> {
        let analysis = self
            .service
            .analyze_photo(auth, photo_base64, photo_type)
            .await?;
        let request = SaveAnalysisRequest {
            round_id: round_id.to_string(),
            photo_type,
            analysis_results: analysis.clone(),
        };
        self.service.save_analysis(auth, &request).await?;
        Ok(analysis)
    }

    fn publish(&self, submission: &PhotoSubmission) {
        let _ = self.events.send(submission.clone());
    }
}
