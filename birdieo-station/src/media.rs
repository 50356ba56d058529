//! Platform media abstraction.
//!
//! The capture device never talks to camera hardware directly; it goes through
//! a [`MediaBackend`] which opens [`MediaStream`]s. Backends report failures
//! with the platform's own error name so classification lives in one place.

use std::fmt;

use futures::future::BoxFuture;
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::CaptureError;

/// Which camera to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    /// User-facing (selfie) camera
    Front,
    /// Environment-facing camera
    Back,
}

impl Facing {
    pub fn opposite(&self) -> Facing {
        match self {
            Facing::Front => Facing::Back,
            Facing::Back => Facing::Front,
        }
    }

    /// Facing mode string as understood by browser media APIs.
    pub fn facing_mode(&self) -> &'static str {
        match self {
            Facing::Front => "user",
            Facing::Back => "environment",
        }
    }
}

/// Requested capture quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityHint {
    High,
    Minimal,
}

/// Constraint set handed to the platform.
///
/// Resolution and frame rate are always *ideal* values; the platform may pick
/// something else rather than fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constraints {
    pub facing: Facing,
    pub ideal_width: Option<u32>,
    pub ideal_height: Option<u32>,
    pub ideal_frame_rate: Option<u32>,
}

impl Constraints {
    pub fn for_quality(facing: Facing, quality: QualityHint) -> Self {
        match quality {
            QualityHint::High => Self {
                facing,
                ideal_width: Some(1920),
                ideal_height: Some(1080),
                ideal_frame_rate: Some(30),
            },
            QualityHint::Minimal => Self {
                facing,
                ideal_width: None,
                ideal_height: None,
                ideal_frame_rate: None,
            },
        }
    }

    pub fn is_minimal(&self) -> bool {
        self.ideal_width.is_none() && self.ideal_height.is_none() && self.ideal_frame_rate.is_none()
    }
}

/// Failure reported by a media backend when opening a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFailure {
    /// Platform error name (e.g. `NotAllowedError`)
    pub name: String,
    pub message: String,
}

impl MediaFailure {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Map a platform failure onto exactly one capture error.
    pub fn classify(&self) -> CaptureError {
        match self.name.as_str() {
            "NotAllowedError" | "PermissionDeniedError" | "SecurityError" => {
                CaptureError::PermissionDenied
            }
            "NotFoundError" | "DevicesNotFoundError" => CaptureError::DeviceNotFound,
            "NotReadableError" | "TrackStartError" | "AbortError" => CaptureError::DeviceBusy,
            "OverconstrainedError" | "ConstraintNotSatisfiedError" => {
                CaptureError::ConstraintsUnsupported
            }
            _ => CaptureError::Unknown(format!("{}: {}", self.name, self.message)),
        }
    }
}

impl fmt::Display for MediaFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

/// A live, open camera stream.
pub trait MediaStream: Send + Sync {
    /// Resolves once the device reports it is delivering frames.
    fn wait_ready(&self) -> BoxFuture<'_, ()>;

    /// Current frame at the stream's native resolution.
    fn latest_frame(&self) -> Option<RgbImage>;

    /// Stop every underlying track. Must be idempotent.
    fn stop(&mut self);

    /// Number of tracks still running.
    fn live_tracks(&self) -> usize;
}

/// Platform camera access.
pub trait MediaBackend: Send + Sync + 'static {
    /// False when the platform has no media capture capability at all.
    fn is_supported(&self) -> bool;

    fn open(
        &self,
        constraints: Constraints,
    ) -> BoxFuture<'_, Result<Box<dyn MediaStream>, MediaFailure>>;
}
