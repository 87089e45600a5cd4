use crate::config::OnnxConfig;
use crate::image::transforms::{ImageTransforms, Letterbox};
use crate::models::device::{session_builder, Device};
use crate::models::labels::LabelMap;
use crate::utils::error::VisionError;
use crate::Result;
use image::RgbImage;
use ndarray::{ArrayView2, Axis, Ix3};
use ort::{inputs, session::Session, value::Tensor};
use parking_lot::Mutex;
use serde::Serialize;
use std::cmp::Ordering;
use std::path::Path;

/// A detector box in source-image pixels, before category assignment
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RawBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub class_id: usize,
    /// 0..1
    pub score: f32,
}

impl RawBox {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }
}

/// A loaded object detector with its own embedded label set
pub trait DetectionModel: Send + Sync {
    fn labels(&self) -> &LabelMap;

    fn detect(&self, image: &RgbImage) -> Result<Vec<RawBox>>;
}

#[derive(Debug, Clone)]
pub struct YoloParams {
    pub input_size: u32,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl Default for YoloParams {
    fn default() -> Self {
        Self {
            input_size: 640,
            conf_threshold: 0.25,
            iou_threshold: 0.45,
            max_detections: 300,
        }
    }
}

pub struct OnnxYoloDetector {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    labels: LabelMap,
    params: YoloParams,
}

impl OnnxYoloDetector {
    pub fn load(model_path: &Path, device: Device, onnx_config: &OnnxConfig) -> Result<Self> {
        if !model_path.exists() {
            return Err(VisionError::ModelLoad(format!(
                "Detection model not found: {}",
                model_path.display()
            )));
        }

        tracing::info!("Loading detection model from: {}", model_path.display());

        let session = session_builder(device, onnx_config)?
            .commit_from_file(model_path)
            .map_err(|e| {
                VisionError::ModelLoad(format!("Failed to load {}: {}", model_path.display(), e))
            })?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| VisionError::ModelLoad("Detection model has no inputs".to_string()))?;

        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| VisionError::ModelLoad("Detection model has no outputs".to_string()))?;

        let labels = Self::embedded_labels(&session, model_path);
        tracing::info!(
            "Detection model {} exposes {} classes",
            model_path.display(),
            labels.len()
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            labels,
            params: YoloParams::default(),
        })
    }

    /// Class names stored in the export metadata; numeric labels when absent
    fn embedded_labels(session: &Session, model_path: &Path) -> LabelMap {
        let raw = session
            .metadata()
            .ok()
            .and_then(|metadata| metadata.custom("names").ok().flatten());

        match raw.map(|raw| LabelMap::from_ultralytics_names(&raw)) {
            Some(Ok(labels)) => labels,
            Some(Err(e)) => {
                tracing::warn!("Ignoring class names of {}: {}", model_path.display(), e);
                LabelMap::default()
            }
            None => {
                tracing::warn!(
                    "{} carries no class names, labels will be numeric",
                    model_path.display()
                );
                LabelMap::default()
            }
        }
    }
}

impl DetectionModel for OnnxYoloDetector {
    fn labels(&self) -> &LabelMap {
        &self.labels
    }

    fn detect(&self, image: &RgbImage) -> Result<Vec<RawBox>> {
        let (input, letterbox) = ImageTransforms::letterbox(image, self.params.input_size);

        let input_tensor = Tensor::from_array(input)
            .map_err(|e| VisionError::Inference(format!("Failed to build input tensor: {}", e)))?;

        let prediction = {
            let mut session = self.session.lock();
            let outputs = session
                .run(inputs![self.input_name.as_str() => input_tensor])
                .map_err(|e| VisionError::Inference(e.to_string()))?;

            match outputs.get(&self.output_name) {
                Some(output) => output
                    .try_extract_array::<f32>()
                    .map_err(|e| VisionError::Inference(e.to_string()))?
                    .into_owned(),
                None => {
                    let available: Vec<String> = outputs.keys().map(|s| s.to_string()).collect();
                    return Err(VisionError::Inference(format!(
                        "Output '{}' not found. Available outputs: {:?}",
                        self.output_name, available
                    )));
                }
            }
        };

        tracing::debug!("Detection prediction shape: {:?}", prediction.shape());

        let prediction = prediction.into_dimensionality::<Ix3>().map_err(|_| {
            VisionError::Inference("Expected detection output of shape [1, 4 + classes, candidates]".to_string())
        })?;
        if prediction.shape()[0] != 1 {
            return Err(VisionError::Inference("Expected batch size 1 for detection".to_string()));
        }

        let candidates = decode_candidates(
            prediction.index_axis(Axis(0), 0),
            &letterbox,
            image.dimensions(),
            self.params.conf_threshold,
        )?;
        let mut boxes = non_max_suppression(candidates, self.params.iou_threshold);
        boxes.truncate(self.params.max_detections);

        tracing::debug!("Detected {} boxes after NMS", boxes.len());
        Ok(boxes)
    }
}

/// Decode a YOLOv8 head `[4 + classes, candidates]` (cx, cy, w, h, class scores...)
/// into source-image boxes above `conf_threshold`.
pub fn decode_candidates(
    view: ArrayView2<f32>,
    letterbox: &Letterbox,
    (width, height): (u32, u32),
    conf_threshold: f32,
) -> Result<Vec<RawBox>> {
    let rows = view.shape()[0];
    if rows <= 4 {
        return Err(VisionError::Inference(format!(
            "Detection head has {} rows, expected 4 box rows plus class scores",
            rows
        )));
    }

    let max_x = width as f32;
    let max_y = height as f32;
    let mut boxes = Vec::new();

    for candidate in view.axis_iter(Axis(1)) {
        let mut class_id = 0;
        let mut best = f32::NEG_INFINITY;
        for (i, &score) in candidate.iter().skip(4).enumerate() {
            if score > best {
                best = score;
                class_id = i;
            }
        }

        if best <= conf_threshold {
            continue;
        }

        let (cx, cy, w, h) = (candidate[0], candidate[1], candidate[2], candidate[3]);
        let (x1, y1) = letterbox.to_source(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.to_source(cx + w / 2.0, cy + h / 2.0);

        boxes.push(RawBox {
            x1: x1.clamp(0.0, max_x),
            y1: y1.clamp(0.0, max_y),
            x2: x2.clamp(0.0, max_x),
            y2: y2.clamp(0.0, max_y),
            class_id,
            score: best.min(1.0),
        });
    }

    Ok(boxes)
}

/// Class-wise non-maximum suppression; output is ordered by descending score
pub fn non_max_suppression(mut boxes: Vec<RawBox>, iou_threshold: f32) -> Vec<RawBox> {
    boxes.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let mut kept: Vec<RawBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == candidate.class_id && iou(k, &candidate) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }

    kept
}

/// Intersection over union of two axis-aligned boxes
pub fn iou(a: &RawBox, b: &RawBox) -> f32 {
    let ix1 = a.x1.max(b.x1);
    let iy1 = a.y1.max(b.y1);
    let ix2 = a.x2.min(b.x2);
    let iy2 = a.y2.min(b.y2);

    if ix1 >= ix2 || iy1 >= iy2 {
        return 0.0;
    }

    let intersection = (ix2 - ix1) * (iy2 - iy1);
    let union = a.area() + b.area() - intersection;

    if union <= 0.0 {
        return 0.0;
    }

    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn raw(x1: f32, y1: f32, x2: f32, y2: f32, class_id: usize, score: f32) -> RawBox {
        RawBox { x1, y1, x2, y2, class_id, score }
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = raw(0.0, 0.0, 10.0, 10.0, 0, 0.9);
        let b = raw(20.0, 20.0, 30.0, 30.0, 0, 0.9);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn nms_suppresses_overlaps_within_a_class_only() {
        let boxes = vec![
            raw(0.0, 0.0, 10.0, 10.0, 0, 0.6),
            raw(1.0, 1.0, 11.0, 11.0, 0, 0.9),
            // same place, other class: kept
            raw(1.0, 1.0, 11.0, 11.0, 1, 0.5),
            raw(50.0, 50.0, 60.0, 60.0, 0, 0.4),
        ];

        let kept = non_max_suppression(boxes, 0.45);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].score, 0.9);
        assert_eq!(kept[1].class_id, 1);
        assert_eq!(kept[2].score, 0.4);
    }

    #[test]
    fn decode_maps_letterboxed_boxes_back_to_source() {
        // 200x100 source into a 100x100 input: scale 0.5, 25px vertical padding
        let letterbox = Letterbox { scale: 0.5, pad_x: 0.0, pad_y: 25.0 };

        // rows: cx, cy, w, h, crop score, weed score; two candidates
        let mut head = Array2::<f32>::zeros((6, 2));
        head.column_mut(0).assign(&ndarray::arr1(&[50.0, 50.0, 20.0, 10.0, 0.1, 0.8]));
        head.column_mut(1).assign(&ndarray::arr1(&[10.0, 10.0, 4.0, 4.0, 0.2, 0.1]));

        let boxes = decode_candidates(head.view(), &letterbox, (200, 100), 0.25).unwrap();
        assert_eq!(boxes.len(), 1);

        let b = boxes[0];
        assert_eq!(b.class_id, 1);
        assert!((b.x1 - 80.0).abs() < 1e-4);
        assert!((b.y1 - 40.0).abs() < 1e-4);
        assert!((b.x2 - 120.0).abs() < 1e-4);
        assert!((b.y2 - 60.0).abs() < 1e-4);
    }

    #[test]
    fn decode_clamps_to_image_bounds() {
        let letterbox = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        let mut head = Array2::<f32>::zeros((5, 1));
        head.column_mut(0).assign(&ndarray::arr1(&[2.0, 2.0, 10.0, 10.0, 0.9]));

        let boxes = decode_candidates(head.view(), &letterbox, (50, 50), 0.25).unwrap();
        assert_eq!(boxes[0].x1, 0.0);
        assert_eq!(boxes[0].y1, 0.0);
        assert_eq!(boxes[0].x2, 7.0);
    }

    #[test]
    fn decode_rejects_headless_output() {
        let letterbox = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        let head = Array2::<f32>::zeros((4, 3));
        assert!(decode_candidates(head.view(), &letterbox, (10, 10), 0.25).is_err());
    }
}
