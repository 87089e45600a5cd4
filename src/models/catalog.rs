use crate::utils::error::VisionError;
use crate::Result;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Supported whole-image classifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationModelId {
    ResNet,
    MobileNet,
    EfficientNet,
}

impl ClassificationModelId {
    pub const ALL: [ClassificationModelId; 3] = [Self::ResNet, Self::MobileNet, Self::EfficientNet];

    /// Public model id, as accepted in requests
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResNet => "resnet",
            Self::MobileNet => "mobilenet",
            Self::EfficientNet => "efficientnet",
        }
    }

    /// Prefix of the fine-tuned artifacts (`<stem>_finetuned.onnx`, `<stem>_cls_idx.json`)
    pub fn artifact_stem(&self) -> &'static str {
        match self {
            Self::ResNet => "ResNet50",
            Self::MobileNet => "MobileNetV3",
            Self::EfficientNet => "EfficientNet",
        }
    }

    /// File stem of the generic pretrained weights
    pub fn pretrained_stem(&self) -> &'static str {
        match self {
            Self::ResNet => "resnet50",
            Self::MobileNet => "mobilenet_v3_large",
            Self::EfficientNet => "efficientnet_b0",
        }
    }
}

impl FromStr for ClassificationModelId {
    type Err = VisionError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == name)
            .ok_or_else(|| VisionError::ModelNotFound(s.trim().to_string()))
    }
}

impl fmt::Display for ClassificationModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported crop/weed detectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum DetectionModelId {
    #[serde(rename = "yolov8_m")]
    YoloV8M,
    #[serde(rename = "yolov8_l")]
    YoloV8L,
    #[serde(rename = "yolov8_x")]
    YoloV8X,
}

impl DetectionModelId {
    pub const ALL: [DetectionModelId; 3] = [Self::YoloV8M, Self::YoloV8L, Self::YoloV8X];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::YoloV8M => "yolov8_m",
            Self::YoloV8L => "yolov8_l",
            Self::YoloV8X => "yolov8_x",
        }
    }

    pub fn weights_file(&self) -> &'static str {
        match self {
            Self::YoloV8M => "yolo_v8_m.onnx",
            Self::YoloV8L => "yolo_v8_l.onnx",
            Self::YoloV8X => "yolo_v8_x.onnx",
        }
    }
}

impl FromStr for DetectionModelId {
    type Err = VisionError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == name)
            .ok_or_else(|| VisionError::ModelNotFound(s.trim().to_string()))
    }
}

impl fmt::Display for DetectionModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Classification,
    Detection,
}

/// Where a loaded model's weights came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightsSource {
    FineTuned,
    Pretrained,
}

/// Immutable description of a model as it was loaded at startup
#[derive(Debug, Clone, Serialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub kind: ModelKind,
    pub weights: PathBuf,
    /// Label-index mapping file; classification only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<PathBuf>,
    pub source: WeightsSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_parse_case_insensitively() {
        assert_eq!("ResNet".parse::<ClassificationModelId>().unwrap(), ClassificationModelId::ResNet);
        assert_eq!("YOLOv8_L".parse::<DetectionModelId>().unwrap(), DetectionModelId::YoloV8L);
    }

    #[test]
    fn unknown_id_is_model_not_found() {
        let err = "nonexistent_model".parse::<ClassificationModelId>().unwrap_err();
        assert!(matches!(err, VisionError::ModelNotFound(name) if name == "nonexistent_model"));

        // detection names are not classification names and vice versa
        assert!("yolov8_m".parse::<ClassificationModelId>().is_err());
        assert!("resnet".parse::<DetectionModelId>().is_err());
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for id in DetectionModelId::ALL {
            assert_eq!(id.to_string().parse::<DetectionModelId>().unwrap(), id);
        }
    }
}
