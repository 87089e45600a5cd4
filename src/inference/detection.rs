use crate::image::Annotator;
use crate::inference::types::{BoundingBox, Category, Detection, DetectionSummary};
use crate::models::{LabelMap, ModelRegistry, RawBox};
use crate::Result;
use image::DynamicImage;
use std::sync::Arc;

/// Crop/weed object detection with an annotated copy of the input
pub struct DetectionEngine {
    registry: Arc<ModelRegistry>,
}

impl DetectionEngine {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    /// Blocking; runs the detector and the annotator on the calling thread
    pub fn detect(&self, image: &DynamicImage, model_id: &str) -> Result<DetectionSummary> {
        let entry = self.registry.get_detection_model(model_id)?;

        let rgb = image.to_rgb8();
        let raw_boxes = entry.model.detect(&rgb)?;
        tracing::debug!("Detector '{}' returned {} boxes", model_id, raw_boxes.len());

        let labels = entry.model.labels();
        let detections: Vec<Detection> = raw_boxes
            .iter()
            .map(|raw| to_detection(raw, labels, rgb.dimensions()))
            .collect();

        let weed_count = detections
            .iter()
            .filter(|d| d.category == Category::Weed)
            .count();
        let crop_count = detections.len() - weed_count;

        let annotated_image = Annotator::annotate(&rgb, &detections)?;

        Ok(DetectionSummary {
            detections,
            weed_count,
            crop_count,
            annotated_image,
        })
    }
}

fn to_detection(raw: &RawBox, labels: &LabelMap, (width, height): (u32, u32)) -> Detection {
    let clamp_x = |v: f32| v.round().clamp(0.0, width.saturating_sub(1) as f32) as u32;
    let clamp_y = |v: f32| v.round().clamp(0.0, height.saturating_sub(1) as f32) as u32;

    let (x1, x2) = (clamp_x(raw.x1.min(raw.x2)), clamp_x(raw.x1.max(raw.x2)));
    let (y1, y2) = (clamp_y(raw.y1.min(raw.y2)), clamp_y(raw.y1.max(raw.y2)));

    let label = labels.label_or_index(raw.class_id);
    let percent = (raw.score * 100.0).clamp(0.0, 100.0);

    Detection {
        bounding_box: BoundingBox { x1, y1, x2, y2 },
        category: Category::from_label(&label),
        label,
        confidence: (percent * 100.0).round() / 100.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::catalog::{DetectionModelId, ModelDescriptor, ModelKind, WeightsSource};
    use crate::models::registry::tests::FixedBoxes;
    use crate::models::Device;
    use crate::utils::error::VisionError;
    use image::{Rgb, RgbImage};
    use std::collections::BTreeMap;

    fn raw(x: f32, class_id: usize, score: f32) -> RawBox {
        RawBox {
            x1: x,
            y1: 20.0,
            x2: x + 30.0,
            y2: 60.0,
            class_id,
            score,
        }
    }

    fn engine(boxes: Vec<RawBox>) -> DetectionEngine {
        let labels = LabelMap::new(BTreeMap::from([(0, "crop".to_string()), (1, "weed".to_string())]));
        let registry = ModelRegistry::new(Device::Cpu, 1).with_detector(
            DetectionModelId::YoloV8M,
            Arc::new(FixedBoxes { labels, boxes }),
            ModelDescriptor {
                name: "yolov8_m".to_string(),
                kind: ModelKind::Detection,
                weights: "yolo_v8_m.onnx".into(),
                labels: None,
                source: WeightsSource::FineTuned,
            },
        );
        DetectionEngine::new(Arc::new(registry))
    }

    fn field() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(320, 100, Rgb([90, 140, 60])))
    }

    #[test]
    fn five_crops_and_two_weeds_are_counted() {
        let boxes = (0..7)
            .map(|i| raw(i as f32 * 40.0, if i < 5 { 0 } else { 1 }, 0.8))
            .collect();
        let summary = engine(boxes).detect(&field(), "yolov8_m").unwrap();

        assert_eq!(summary.crop_count, 5);
        assert_eq!(summary.weed_count, 2);
        assert_eq!(summary.detections.len(), 7);
        assert_eq!(summary.weed_count + summary.crop_count, summary.detections.len());

        let annotated = image::load_from_memory(&summary.annotated_image).unwrap().to_rgb8();
        assert_eq!(annotated.dimensions(), (320, 100));

        for i in 0..7u32 {
            let x = i * 40;
            let expected = if i < 5 {
                Annotator::color(Category::Crop)
            } else {
                Annotator::color(Category::Weed)
            };
            assert_eq!(*annotated.get_pixel(x, 20), expected, "top-left corner of box {}", i);
            assert_eq!(*annotated.get_pixel(x + 30, 60), expected, "bottom-right corner of box {}", i);
            // inside the outline
            assert_eq!(*annotated.get_pixel(x + 15, 40), Rgb([90, 140, 60]), "interior of box {}", i);
        }
    }

    #[test]
    fn zero_boxes_return_the_input_unchanged() {
        let input = field();
        let summary = engine(Vec::new()).detect(&input, "yolov8_m").unwrap();

        assert_eq!(summary.weed_count, 0);
        assert_eq!(summary.crop_count, 0);
        assert!(summary.detections.is_empty());
        let annotated = image::load_from_memory(&summary.annotated_image).unwrap().to_rgb8();
        assert_eq!(annotated, input.to_rgb8());
    }

    #[test]
    fn boxes_are_clamped_and_scores_become_percentages() {
        let out_of_frame = RawBox {
            x1: 300.0,
            y1: -5.0,
            x2: 400.0,
            y2: 140.0,
            class_id: 1,
            score: 0.91256,
        };
        let summary = engine(vec![out_of_frame]).detect(&field(), "yolov8_m").unwrap();
        let detection = &summary.detections[0];

        assert_eq!(detection.bounding_box, BoundingBox { x1: 300, y1: 0, x2: 319, y2: 99 });
        assert_eq!(detection.confidence, 91.26);
        assert_eq!(detection.category, Category::Weed);
    }

    #[test]
    fn unmapped_class_uses_index_label() {
        let summary = engine(vec![raw(10.0, 7, 0.5)]).detect(&field(), "yolov8_m").unwrap();
        assert_eq!(summary.detections[0].label, "7");
        assert_eq!(summary.crop_count, 1);
    }

    #[test]
    fn unknown_detector_is_not_found() {
        let engine = engine(Vec::new());
        assert!(matches!(
            engine.detect(&field(), "nonexistent_model"),
            Err(VisionError::ModelNotFound(_))
        ));
        assert!(matches!(
            engine.detect(&field(), "yolov8_x"),
            Err(VisionError::ModelNotFound(_))
        ));
    }
}
