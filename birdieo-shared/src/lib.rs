//! Wire types and HTTP clients for the Birdieo backend and stream services.
//!
//! Every external contract consumed by the capture station lives here so the
//! request and response shapes are defined once.

pub mod api_client;
pub mod client;
pub mod detection;
pub mod photo;
pub mod status;
pub mod stream_client;

pub use api_client::ApiClient;
pub use client::{AuthContext, ClientError};
pub use detection::{
    AnalyzeResponse, BallDetection, BoundingBox, ClothingHint, DetectionPayload, DetectionResult,
    FlagDetection, LabeledBox, LabeledDetection, PersonDetection,
};
pub use photo::{
    AnalyzePhotoRequest, AppearanceAnalysis, ClothingSummary, PhotoType, SaveAnalysisRequest,
    SavePhotoRequest, SavePhotoResponse,
};
pub use status::{ActivateRoundResponse, CameraControlResponse, CameraStatus, HealthResponse};
pub use stream_client::{FrameBytes, StreamClient};
