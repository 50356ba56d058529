//! Stream health and camera-processing status types.

use serde::{Deserialize, Serialize};

/// Health check response from a stream proxy `/health` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub ok: bool,
    /// Seconds since the proxy last refreshed its frame; null before the first frame
    #[serde(default)]
    pub age_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_processing: Option<bool>,
}

/// Camera processing status from the backend `/camera/status` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CameraStatus {
    pub active: bool,
    /// Unix epoch seconds of the last motion-triggered detection, 0 if none
    #[serde(default)]
    pub last_motion_time: f64,
    #[serde(default)]
    pub clips_created: u64,
    #[serde(default)]
    pub stream_url: String,
}

/// Response from `POST /camera/start` and `POST /camera/stop`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CameraControlResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

/// Response from `POST /rounds/{id}/activate`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivateRoundResponse {
    pub status: String,
    #[serde(default)]
    pub camera_processing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_before_first_frame() {
        let health: HealthResponse =
            serde_json::from_str(r#"{"ok": false, "age_seconds": null}"#).unwrap();
        assert!(!health.ok);
        assert_eq!(health.age_seconds, None);
    }

    #[test]
    fn test_camera_status_defaults() {
        let status: CameraStatus = serde_json::from_str(r#"{"active": true}"#).unwrap();
        assert!(status.active);
        assert_eq!(status.clips_created, 0);
        assert!(status.stream_url.is_empty());
    }
}
