//! Identification photo types and the photo persistence / appearance analysis
//! request and response bodies.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which identification photo a capture is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoType {
    Face,
    Front,
    Side,
    Back,
}

impl PhotoType {
    /// The guided capture order.
    pub const SEQUENCE: [PhotoType; 4] = [
        PhotoType::Face,
        PhotoType::Front,
        PhotoType::Side,
        PhotoType::Back,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PhotoType::Face => "face",
            PhotoType::Front => "front",
            PhotoType::Side => "side",
            PhotoType::Back => "back",
        }
    }

    /// Face photos are stored but never sent for appearance analysis.
    pub fn is_analyzable(&self) -> bool {
        !matches!(self, PhotoType::Face)
    }

    /// Next step in the guided sequence, `None` after the back photo.
    pub fn next(&self) -> Option<PhotoType> {
        let idx = Self::SEQUENCE.iter().position(|t| t == self)?;
        Self::SEQUENCE.get(idx + 1).copied()
    }
}

impl fmt::Display for PhotoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhotoType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "face" => Ok(PhotoType::Face),
            "front" => Ok(PhotoType::Front),
            "side" => Ok(PhotoType::Side),
            "back" => Ok(PhotoType::Back),
            other => Err(format!("unknown photo type: {other}")),
        }
    }
}

/// Request body for `POST /photos/save`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SavePhotoRequest {
    /// Base64-encoded JPEG
    pub photo_data: String,
    pub photo_type: PhotoType,
    pub round_id: String,
    /// Capture time, serialized as RFC 3339
    pub timestamp: DateTime<Utc>,
}

/// Response body from `POST /photos/save`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SavePhotoResponse {
    pub photo_id: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub message: String,
}

/// Request body for `POST /analyze-photo`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalyzePhotoRequest {
    pub photo_base64: String,
    pub photo_type: PhotoType,
}

/// Clothing attributes produced by the appearance analysis service.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppearanceAnalysis {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bottom_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hat_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shoes_color: Option<String>,
    #[serde(default)]
    pub confidence: f64,
}

impl AppearanceAnalysis {
    fn field(&self, name: ClothingField) -> Option<&str> {
        match name {
            ClothingField::TopColor => self.top_color.as_deref(),
            ClothingField::TopStyle => self.top_style.as_deref(),
            ClothingField::BottomColor => self.bottom_color.as_deref(),
            ClothingField::HatColor => self.hat_color.as_deref(),
            ClothingField::ShoesColor => self.shoes_color.as_deref(),
        }
    }
}

/// Request body for `POST /photos/analysis`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SaveAnalysisRequest {
    pub round_id: String,
    pub photo_type: PhotoType,
    pub analysis_results: AppearanceAnalysis,
}

#[derive(Debug, Clone, Copy)]
enum ClothingField {
    TopColor,
    TopStyle,
    BottomColor,
    HatColor,
    ShoesColor,
}

impl ClothingField {
    const ALL: [ClothingField; 5] = [
        ClothingField::TopColor,
        ClothingField::TopStyle,
        ClothingField::BottomColor,
        ClothingField::HatColor,
        ClothingField::ShoesColor,
    ];
}

/// Round-level clothing description merged from the front, side and back photos.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClothingSummary {
    pub top_color: Option<String>,
    pub top_style: Option<String>,
    pub bottom_color: Option<String>,
    pub hat_color: Option<String>,
    pub shoes_color: Option<String>,
    pub confidence: f64,
    pub analysis_count: usize,
    pub photos_analyzed: Vec<PhotoType>,
}

impl ClothingSummary {
    /// Majority vote per attribute across analysed photos.
    ///
    /// Values of `"none"` do not vote; ties go to the value seen first.
    /// Confidence is the mean over every contributing photo. Face analyses
    /// are ignored. Returns `None` when nothing contributes.
    pub fn consolidate(analyses: &[(PhotoType, AppearanceAnalysis)]) -> Option<Self> {
        let clothing: Vec<_> = analyses
            .iter()
            .filter(|(photo_type, _)| photo_type.is_analyzable())
            .collect();
        if clothing.is_empty() {
            return None;
        }

        let mut summary = ClothingSummary {
            analysis_count: clothing.len(),
            ..Default::default()
        };

        for field in ClothingField::ALL {
            let mut votes: Vec<(&str, usize)> = Vec::new();
            for (_, analysis) in &clothing {
                let Some(value) = analysis.field(field) else {
                    continue;
                };
                if value.is_empty() || value == "none" {
                    continue;
                }
                match votes.iter_mut().find(|(v, _)| *v == value) {
                    Some((_, count)) => *count += 1,
                    None => votes.push((value, 1)),
                }
            }

            let mut winner: Option<(&str, usize)> = None;
            for (value, count) in votes {
                if winner.map_or(true, |(_, best)| count > best) {
                    winner = Some((value, count));
                }
            }
            let winner = winner.map(|(v, _)| v.to_string());

            match field {
                ClothingField::TopColor => summary.top_color = winner,
                ClothingField::TopStyle => summary.top_style = winner,
                ClothingField::BottomColor => summary.bottom_color = winner,
                ClothingField::HatColor => summary.hat_color = winner,
                ClothingField::ShoesColor => summary.shoes_color = winner,
            }
        }

        summary.photos_analyzed = clothing.iter().map(|(t, _)| *t).collect();
        summary.confidence =
            clothing.iter().map(|(_, a)| a.confidence).sum::<f64>() / clothing.len() as f64;

        Some(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_request_timestamp_is_rfc3339() {
        let request = SavePhotoRequest {
            photo_data: "AAAA".to_string(),
            photo_type: PhotoType::Side,
            round_id: "r9".to_string(),
            timestamp: "2026-03-01T12:30:00Z".parse().unwrap(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["timestamp"], "2026-03-01T12:30:00Z");
        assert_eq!(json["photo_type"], "side");
    }

    fn analysis(top: &str, bottom: &str, confidence: f64) -> AppearanceAnalysis {
        AppearanceAnalysis {
            top_color: Some(top.to_string()),
            bottom_color: Some(bottom.to_string()),
            confidence,
            ..Default::default()
        }
    }

    #[test]
    fn test_photo_type_serde_is_lowercase() {
        let json = serde_json::to_string(&PhotoType::Front).unwrap();
        assert_eq!(json, "\"front\"");
        let parsed: PhotoType = serde_json::from_str("\"back\"").unwrap();
        assert_eq!(parsed, PhotoType::Back);
    }

    #[test]
    fn test_guided_sequence() {
        assert_eq!(PhotoType::Face.next(), Some(PhotoType::Front));
        assert_eq!(PhotoType::Side.next(), Some(PhotoType::Back));
        assert_eq!(PhotoType::Back.next(), None);
        assert!(!PhotoType::Face.is_analyzable());
        assert!(PhotoType::Side.is_analyzable());
    }

    #[test]
    fn test_consolidate_majority_vote() {
        let analyses = vec![
            (PhotoType::Front, analysis("blue", "khaki", 0.9)),
            (PhotoType::Side, analysis("blue", "none", 0.6)),
            (PhotoType::Back, analysis("navy", "white", 0.3)),
        ];
        let summary = ClothingSummary::consolidate(&analyses).unwrap();
        assert_eq!(summary.top_color.as_deref(), Some("blue"));
        // khaki and white tie at one vote each, khaki was seen first
        assert_eq!(summary.bottom_color.as_deref(), Some("khaki"));
        assert_eq!(summary.hat_color, None);
        assert_eq!(summary.analysis_count, 3);
        assert!((summary.confidence - 0.6).abs() < 1e-9);
        assert_eq!(
            summary.photos_analyzed,
            vec![PhotoType::Front, PhotoType::Side, PhotoType::Back]
        );
    }

    #[test]
    fn test_consolidate_ignores_face() {
        let analyses = vec![(PhotoType::Face, analysis("red", "red", 1.0))];
        assert!(ClothingSummary::consolidate(&analyses).is_none());
    }
}
