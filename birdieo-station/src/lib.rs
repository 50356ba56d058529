//! Camera capture and live-stream synchronization for the Birdieo capture
//! station.
//!
//! The capture side walks a golfer through four identification photos
//! (permission, camera lifecycle, countdown, still capture, two-stage
//! submission). The monitoring side polls stream health and detections for
//! the live course cameras independently of any capture flow.

pub mod capture_view;
pub mod config;
pub mod countdown;
pub mod device;
pub mod error;
pub mod frame;
pub mod frame_source;
pub mod health_monitor;
pub mod media;
pub mod overlay;
pub mod permission;
pub mod photo_pipeline;
pub mod virtual_backend;

pub use capture_view::{CaptureView, CaptureViewOptions, GuidedState};
pub use config::{CommonArgs, ConfigError, StationConfig, StreamSourceConfig};
pub use countdown::{CountdownController, CountdownState};
pub use device::{CaptureDevice, CaptureSession, DeviceStatus};
pub use error::{CaptureError, CaptureResult, ErrorKind};
pub use frame::{CaptureFlash, CapturedArtifact, FrameCapturer};
pub use frame_source::{fetch_views, FrameSource, FrameView, LiveFrame, RetryPolicy, SourceMode};
pub use health_monitor::{
    CameraProcessingSnapshot, DetectionFrame, DetectionSet, HealthReport, MonitorSettings,
    MonitoredSource, StreamHealthMonitor, StreamHealthSnapshot,
};
pub use media::{Constraints, Facing, MediaBackend, MediaFailure, MediaStream, QualityHint};
pub use overlay::{DetectionOverlayRenderer, OverlayStyle};
pub use permission::{PermissionBackend, PermissionGate, PermissionState, Subscription};
pub use photo_pipeline::{PhotoPipeline, PhotoService, PhotoSubmission, UploadState};
