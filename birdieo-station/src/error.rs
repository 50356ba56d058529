//! Capture error taxonomy.
//!
//! Every failure the capture flow can surface maps to exactly one
//! [`ErrorKind`]. [`CaptureError`] carries the detail message where one exists.

use birdieo_shared::ClientError;
use thiserror::Error;

/// Fieldless error classification, stored on sessions and shown in the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    PermissionDenied,
    DeviceNotFound,
    DeviceBusy,
    ConstraintsUnsupported,
    NoActiveSession,
    SubmissionInProgress,
    NetworkUnavailable,
    AnalysisFailed,
    MediaUnsupported,
    Unknown,
}

/// Errors surfaced by the capture station.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("no camera found")]
    DeviceNotFound,
    #[error("camera is in use by another application")]
    DeviceBusy,
    #[error("camera does not support the requested settings")]
    ConstraintsUnsupported,
    #[error("no active capture session")]
    NoActiveSession,
    #[error("a submission for this photo is already in progress")]
    SubmissionInProgress,
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),
    #[error("photo analysis failed: {0}")]
    AnalysisFailed(String),
    #[error("camera capture is not supported on this platform")]
    MediaUnsupported,
    #[error("unexpected capture error: {0}")]
    Unknown(String),
}

pub type CaptureResult<T> = Result<T, CaptureError>;

impl CaptureError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CaptureError::PermissionDenied => ErrorKind::PermissionDenied,
            CaptureError::DeviceNotFound => ErrorKind::DeviceNotFound,
            CaptureError::DeviceBusy => ErrorKind::DeviceBusy,
            CaptureError::ConstraintsUnsupported => ErrorKind::ConstraintsUnsupported,
            CaptureError::NoActiveSession => ErrorKind::NoActiveSession,
            CaptureError::SubmissionInProgress => ErrorKind::SubmissionInProgress,
            CaptureError::NetworkUnavailable(_) => ErrorKind::NetworkUnavailable,
            CaptureError::AnalysisFailed(_) => ErrorKind::AnalysisFailed,
            CaptureError::MediaUnsupported => ErrorKind::MediaUnsupported,
            CaptureError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Remediation hint shown alongside the error.
    pub fn remediation(&self) -> &'static str {
        match self {
            CaptureError::PermissionDenied => {
                "Allow camera access in your browser or system settings, then retry."
            }
            CaptureError::DeviceNotFound => "Connect a camera and retry.",
            CaptureError::DeviceBusy => {
                "Close other applications that are using the camera, then retry."
            }
            CaptureError::ConstraintsUnsupported => {
                "This camera cannot provide the requested video settings."
            }
            CaptureError::NoActiveSession => "Start the camera before taking a photo.",
            CaptureError::SubmissionInProgress => "Wait for the current upload to finish.",
            CaptureError::NetworkUnavailable(_) => "Check the network connection and retry.",
            CaptureError::AnalysisFailed(_) => {
                "The photo was saved; clothing analysis will be missing for it."
            }
            CaptureError::MediaUnsupported => {
                "Use a device and browser with camera support to take photos."
            }
            CaptureError::Unknown(_) => "Retry, or reload the page if the problem persists.",
        }
    }

    /// Whether offering a retry action makes sense.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CaptureError::PermissionDenied
                | CaptureError::DeviceBusy
                | CaptureError::DeviceNotFound
                | CaptureError::NetworkUnavailable(_)
                | CaptureError::Unknown(_)
        )
    }

    /// Fatal errors disable capture for the rest of the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CaptureError::MediaUnsupported)
    }

    /// Informational degradations are shown as passive status, never as dialogs.
    pub fn is_passive(&self) -> bool {
        matches!(self, CaptureError::AnalysisFailed(_))
    }
}

impl From<ClientError> for CaptureError {
    fn from(err: ClientError) -> Self {
        if err.is_transport() {
            CaptureError::NetworkUnavailable(err.to_string())
        } else {
            CaptureError::Unknown(err.to_string())
        }
    }
}
