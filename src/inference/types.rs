use crate::knowledge::Enrichment;
use crate::utils::error::VisionError;
use crate::Result;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Requested pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Classify,
    Detect,
}

impl FromStr for Mode {
    type Err = VisionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "classify" => Ok(Mode::Classify),
            "detect" => Ok(Mode::Detect),
            "" => Err(VisionError::InvalidInput("Mode is required".to_string())),
            other => Err(VisionError::InvalidInput(format!(
                "Unknown mode '{}', expected 'classify' or 'detect'",
                other
            ))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Classify => f.write_str("classify"),
            Mode::Detect => f.write_str("detect"),
        }
    }
}

/// One inbound request, as handed over by the HTTP/auth layer
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    /// Raw upload, still encoded
    pub image: Vec<u8>,
    /// Matched case-insensitively against the registry
    pub model_id: String,
    /// `classify` or `detect`
    pub mode: String,
    /// Opaque, already-authenticated caller identity
    pub caller: Option<String>,
}

impl InferenceRequest {
    pub fn new(image: Vec<u8>, model_id: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            image,
            model_id: model_id.into(),
            mode: mode.into(),
            caller: None,
        }
    }

    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }
}

/// Top-1 prediction of a classifier
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub class_name: String,
    /// Percentage in [0, 100], rounded to two decimals
    pub confidence: f32,
}

impl ClassificationResult {
    pub fn new(class_name: String, probability: f32) -> Self {
        let percent = (probability * 100.0).clamp(0.0, 100.0);
        Self {
            class_name,
            confidence: (percent * 100.0).round() / 100.0,
        }
    }

    /// `NN.NN%`
    pub fn confidence_display(&self) -> String {
        format_percent(self.confidence)
    }
}

pub fn format_percent(value: f32) -> String {
    format!("{:.2}%", value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Crop,
    Weed,
}

impl Category {
    /// Anything whose label mentions "weed" is a weed; everything else a crop
    pub fn from_label(label: &str) -> Self {
        if label.to_lowercase().contains("weed") {
            Category::Weed
        } else {
            Category::Crop
        }
    }
}

/// Box corners in source-image pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub bounding_box: BoundingBox,
    pub label: String,
    /// Percentage in [0, 100]
    pub confidence: f32,
    pub category: Category,
}

impl Detection {
    /// `"{label}: {confidence}%"`
    pub fn caption(&self) -> String {
        format!("{}: {}", self.label, format_percent(self.confidence))
    }
}

#[derive(Debug, Clone)]
pub struct DetectionSummary {
    pub detections: Vec<Detection>,
    pub weed_count: usize,
    pub crop_count: usize,
    /// PNG, same pixel dimensions as the input
    pub annotated_image: Vec<u8>,
}

/// Result of one pipeline pass
#[derive(Debug, Clone)]
pub enum InferenceResponse {
    Classification {
        result: ClassificationResult,
        enrichment: Option<Enrichment>,
    },
    Detection(DetectionSummary),
}

impl InferenceResponse {
    pub fn mode(&self) -> Mode {
        match self {
            InferenceResponse::Classification { .. } => Mode::Classify,
            InferenceResponse::Detection(_) => Mode::Detect,
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
enum ResponsePayload<'a> {
    Classify {
        class_name: &'a str,
        confidence: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        enrichment_title: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        enrichment_text: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        enrichment_url: Option<&'a str>,
    },
    Detect {
        weed_count: usize,
        crop_count: usize,
        /// base64 PNG
        annotated_image: String,
        detections: &'a [Detection],
    },
}

impl Serialize for InferenceResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let payload = match self {
            InferenceResponse::Classification { result, enrichment } => ResponsePayload::Classify {
                class_name: &result.class_name,
                confidence: result.confidence_display(),
                enrichment_title: enrichment.as_ref().map(|e| e.title.as_str()),
                enrichment_text: enrichment.as_ref().map(|e| e.text.as_str()),
                enrichment_url: enrichment.as_ref().map(|e| e.url.as_str()),
            },
            InferenceResponse::Detection(summary) => ResponsePayload::Detect {
                weed_count: summary.weed_count,
                crop_count: summary.crop_count,
                annotated_image: base64::engine::general_purpose::STANDARD
                    .encode(&summary.annotated_image),
                detections: &summary.detections,
            },
        };
        payload.serialize(serializer)
    }
}

pub const SUMMARY_PLACEHOLDER: &str = "No summary available";
pub const UNKNOWN_CROP: &str = "Unknown Crop";

/// Fields handed to the persistence layer after a successful pass
#[derive(Debug, Clone, Serialize)]
pub struct InferenceRecord {
    pub id: Uuid,
    pub caller: Option<String>,
    pub model_chosen: String,
    pub mode: Mode,
    /// Storage reference of the uploaded image
    pub original_image: String,
    /// Storage reference of the annotated image; detection only
    pub processed_image: Option<String>,
    pub crop_name: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parsing() {
        assert_eq!("Classify".parse::<Mode>().unwrap(), Mode::Classify);
        assert_eq!(" detect ".parse::<Mode>().unwrap(), Mode::Detect);
        assert!(matches!("segment".parse::<Mode>(), Err(VisionError::InvalidInput(_))));
        assert!(matches!("".parse::<Mode>(), Err(VisionError::InvalidInput(_))));
    }

    #[test]
    fn confidence_is_two_decimal_percent() {
        let result = ClassificationResult::new("wheat".to_string(), 0.923_456);
        assert_eq!(result.confidence, 92.35);
        assert_eq!(result.confidence_display(), "92.35%");

        let certain = ClassificationResult::new("rice".to_string(), 1.0);
        assert_eq!(certain.confidence_display(), "100.00%");
    }

    #[test]
    fn weed_category_is_case_insensitive_substring() {
        assert_eq!(Category::from_label("Weed"), Category::Weed);
        assert_eq!(Category::from_label("broadleaf_WEEDS"), Category::Weed);
        assert_eq!(Category::from_label("maize"), Category::Crop);
        assert_eq!(Category::from_label("wed"), Category::Crop);
    }

    #[test]
    fn caption_format() {
        let detection = Detection {
            bounding_box: BoundingBox { x1: 0, y1: 0, x2: 10, y2: 10 },
            label: "weed".to_string(),
            confidence: 87.5,
            category: Category::Weed,
        };
        assert_eq!(detection.caption(), "weed: 87.50%");
    }

    #[test]
    fn classification_payload_shape() {
        let response = InferenceResponse::Classification {
            result: ClassificationResult::new("wheat".to_string(), 0.9235),
            enrichment: None,
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["mode"], "classify");
        assert_eq!(json["class_name"], "wheat");
        assert_eq!(json["confidence"], "92.35%");
        assert!(json.get("enrichment_text").is_none());
    }

    #[test]
    fn detection_payload_shape() {
        let response = InferenceResponse::Detection(DetectionSummary {
            detections: Vec::new(),
            weed_count: 0,
            crop_count: 0,
            annotated_image: vec![1, 2, 3],
        });

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["mode"], "detect");
        assert_eq!(json["weed_count"], 0);
        assert_eq!(json["annotated_image"], "AQID");
    }
}
