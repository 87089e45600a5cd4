use crate::config::OnnxConfig;
use crate::models::device::{session_builder, Device};
use crate::utils::error::VisionError;
use crate::Result;
use ndarray::Array4;
use ort::{inputs, session::Session, value::Tensor};
use parking_lot::Mutex;
use std::path::Path;

/// Classification input side length for every supported backbone
pub const CLASSIFIER_INPUT_SIZE: u32 = 224;

/// A loaded whole-image classifier.
///
/// Implementations take a normalized `(1, 3, H, W)` batch and return the raw
/// logits of the single batch item.
pub trait ClassificationModel: Send + Sync {
    fn input_size(&self) -> (u32, u32) {
        (CLASSIFIER_INPUT_SIZE, CLASSIFIER_INPUT_SIZE)
    }

    fn forward(&self, input: Array4<f32>) -> Result<Vec<f32>>;
}

pub struct OnnxClassifier {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
}

impl OnnxClassifier {
    pub fn load(model_path: &Path, device: Device, onnx_config: &OnnxConfig) -> Result<Self> {
        if !model_path.exists() {
            return Err(VisionError::ModelLoad(format!(
                "Classification model not found: {}",
                model_path.display()
            )));
        }

        tracing::info!("Loading classification model from: {}", model_path.display());

        let session = session_builder(device, onnx_config)?
            .commit_from_file(model_path)
            .map_err(|e| {
                VisionError::ModelLoad(format!("Failed to load {}: {}", model_path.display(), e))
            })?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| VisionError::ModelLoad("Classification model has no inputs".to_string()))?;

        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| VisionError::ModelLoad("Classification model has no outputs".to_string()))?;

        tracing::debug!(
            "Classification model io: input='{}', output='{}'",
            input_name,
            output_name
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
        })
    }
}

impl ClassificationModel for OnnxClassifier {
    fn forward(&self, input: Array4<f32>) -> Result<Vec<f32>> {
        let input_tensor = Tensor::from_array(input)
            .map_err(|e| VisionError::Inference(format!("Failed to build input tensor: {}", e)))?;

        let logits = {
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
                        "Classification output '{}' not found. Available outputs: {:?}",
                        self.output_name, available
                    )));
                }
            }
        };

        let shape = logits.shape().to_vec();
        match shape.as_slice() {
            [1, _] | [_] => Ok(logits.iter().copied().collect()),
            _ => Err(VisionError::Inference(format!(
                "Expected logits of shape [1, classes], got {:?}",
                shape
            ))),
        }
    }
}
