//! Detection payloads returned by the stream analysis service.

use serde::{Deserialize, Serialize};

/// Axis-aligned box in source-frame pixel coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Scale from source-frame pixels into a surface of a different size.
    pub fn scaled(&self, sx: f64, sy: f64) -> Self {
        Self {
            x: self.x * sx,
            y: self.y * sy,
            width: self.width * sx,
            height: self.height * sy,
        }
    }
}

/// Clothing attributes attached to a person detection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClothingHint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bottom_color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersonDetection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub bbox: BoundingBox,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clothing: Option<ClothingHint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlagDetection {
    pub bbox: BoundingBox,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BallDetection {
    pub bbox: BoundingBox,
    pub confidence: f64,
}

/// One poll's worth of detections. Missing categories deserialize as empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DetectionResult {
    #[serde(default)]
    pub people: Vec<PersonDetection>,
    #[serde(default)]
    pub flagstick: Vec<FlagDetection>,
    #[serde(default)]
    pub golf_balls: Vec<BallDetection>,
}

impl DetectionResult {
    pub fn is_empty(&self) -> bool {
        self.people.is_empty() && self.flagstick.is_empty() && self.golf_balls.is_empty()
    }

    pub fn len(&self) -> usize {
        self.people.len() + self.flagstick.len() + self.golf_balls.len()
    }

    /// Fixed layout the stream proxy served before real inference was wired in.
    ///
    /// Only ever used when demo detections are explicitly enabled.
    pub fn demo(frame_width: u32, frame_height: u32) -> Self {
        let w = frame_width as f64;
        let h = frame_height as f64;
        Self {
            people: vec![PersonDetection {
                id: Some("golfer_1".to_string()),
                bbox: BoundingBox::new((w * 0.3).floor(), (h * 0.4).floor(), (w * 0.1).floor(), (h * 0.3).floor()),
                confidence: 0.85,
                clothing: Some(ClothingHint {
                    top_color: Some("blue".to_string()),
                    top_style: Some("polo".to_string()),
                    bottom_color: Some("white".to_string()),
                }),
            }],
            flagstick: vec![FlagDetection {
                bbox: BoundingBox::new((w * 0.7).floor(), (h * 0.2).floor(), 5.0, (h * 0.6).floor()),
                confidence: 0.92,
            }],
            golf_balls: vec![BallDetection {
                bbox: BoundingBox::new((w * 0.5).floor(), (h * 0.7).floor(), 10.0, 10.0),
                confidence: 0.78,
            }],
        }
    }
}

/// Box format used by the older label-list analysis endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LabeledBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabeledDetection {
    pub label: String,
    #[serde(rename = "box")]
    pub bbox: LabeledBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// The analysis service has shipped two payload shapes: a categorized object
/// and a flat list of labeled boxes. Both normalize to [`DetectionResult`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum DetectionPayload {
    Labeled(Vec<LabeledDetection>),
    Categorized(DetectionResult),
}

impl DetectionPayload {
    /// Labels that match no tracked category (e.g. `golf_area`) are dropped.
    pub fn into_result(self) -> DetectionResult {
        match self {
            DetectionPayload::Categorized(result) => result,
            DetectionPayload::Labeled(items) => {
                let mut result = DetectionResult::default();
                for item in items {
                    let bbox = BoundingBox::new(item.bbox.x, item.bbox.y, item.bbox.w, item.bbox.h);
                    let confidence = item.confidence.unwrap_or(1.0).clamp(0.0, 1.0);
                    let label = item.label.to_ascii_lowercase();
                    if label.contains("person") || label.contains("golfer") {
                        result.people.push(PersonDetection {
                            id: None,
                            bbox,
                            confidence,
                            clothing: None,
                        });
                    } else if label.contains("flag") {
                        result.flagstick.push(FlagDetection { bbox, confidence });
                    } else if label.contains("ball") {
                        result.golf_balls.push(BallDetection { bbox, confidence });
                    }
                }
                result
            }
        }
    }
}

/// Response from the stream service `GET /analyze` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalyzeResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detections: Option<DetectionPayload>,
    /// Present when `ok` is false (e.g. "no frame yet")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorized_payload_with_missing_categories() {
        let json = r#"{
            "ok": true, "width": 1280, "height": 720,
            "detections": {
                "people": [{"id": "golfer_1", "bbox": {"x": 384, "y": 288, "width": 128, "height": 216}, "confidence": 0.85}]
            }
        }"#;
        let response: AnalyzeResponse = serde_json::from_str(json).unwrap();
        let result = response.detections.unwrap().into_result();
        assert_eq!(result.people.len(), 1);
        assert!(result.flagstick.is_empty());
        assert!(result.golf_balls.is_empty());
        assert_eq!(result.people[0].bbox.width, 128.0);
    }

    #[test]
    fn test_labeled_payload_normalizes() {
        let json = r#"{
            "ok": true,
            "detections": [
                {"label": "golf_area", "box": {"x": 1, "y": 2, "w": 3, "h": 4}},
                {"label": "golf_ball", "box": {"x": 10, "y": 20, "w": 5, "h": 5}, "confidence": 0.4}
            ]
        }"#;
        let response: AnalyzeResponse = serde_json::from_str(json).unwrap();
        let result = response.detections.unwrap().into_result();
        assert_eq!(result.len(), 1);
        assert_eq!(result.golf_balls[0].confidence, 0.4);
        assert_eq!(result.golf_balls[0].bbox, BoundingBox::new(10.0, 20.0, 5.0, 5.0));
    }

    #[test]
    fn test_not_ok_response() {
        let response: AnalyzeResponse =
            serde_json::from_str(r#"{"ok": false, "reason": "no frame yet"}"#).unwrap();
        assert!(!response.ok);
        assert!(response.detections.is_none());
        assert_eq!(response.reason.as_deref(), Some("no frame yet"));
    }

    #[test]
    fn test_demo_layout_scales_with_frame() {
        let result = DetectionResult::demo(1000, 500);
        assert_eq!(result.len(), 3);
        assert_eq!(result.people[0].bbox, BoundingBox::new(300.0, 200.0, 100.0, 150.0));
        assert_eq!(result.flagstick[0].bbox.height, 300.0);
    }
}
