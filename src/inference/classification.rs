use crate::image::ImageTransforms;
use crate::inference::types::ClassificationResult;
use crate::models::ModelRegistry;
use crate::utils::error::VisionError;
use crate::Result;
use image::DynamicImage;
use std::sync::Arc;

/// Whole-image top-1 classification
pub struct ClassificationEngine {
    registry: Arc<ModelRegistry>,
}

impl ClassificationEngine {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    /// Blocking; runs the forward pass on the calling thread
    pub fn classify(&self, image: &DynamicImage, model_id: &str) -> Result<ClassificationResult> {
        let entry = self.registry.get_classification_model(model_id)?;

        let (width, height) = entry.model.input_size();
        let input = ImageTransforms::classification_input(&image.to_rgb8(), width, height);
        let logits = entry.model.forward(input)?;

        let probabilities = softmax(&logits);
        let (index, probability) = argmax(&probabilities)
            .ok_or_else(|| VisionError::Inference("Model returned no logits".to_string()))?;

        if !probability.is_finite() {
            return Err(VisionError::Inference(format!(
                "Non-finite probability for class {}",
                index
            )));
        }

        let class_name = self.registry.label_for(model_id, index);
        tracing::debug!(
            "Classified with '{}': index={}, class={}, p={:.4}",
            model_id,
            index,
            class_name,
            probability
        );

        Ok(ClassificationResult::new(class_name, probability))
    }
}

/// Numerically stable softmax
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index and value of the largest element; the first one wins ties
pub fn argmax(values: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &value) in values.iter().enumerate() {
        match best {
            Some((_, top)) if value <= top => {}
            _ => best = Some((index, value)),
        }
    }
    best
}
