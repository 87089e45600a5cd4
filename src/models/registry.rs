use crate::config::{Config, OnnxConfig};
use crate::models::catalog::{
    ClassificationModelId, DetectionModelId, ModelDescriptor, ModelKind, WeightsSource,
};
use crate::models::classifier::{ClassificationModel, OnnxClassifier};
use crate::models::detector::{DetectionModel, OnnxYoloDetector};
use crate::models::device::{Device, DeviceGate};
use crate::models::labels::LabelMap;
use crate::utils::error::VisionError;
use crate::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Turns weight files into runnable models
pub trait ModelLoader {
    fn load_classifier(&self, path: &Path) -> Result<Arc<dyn ClassificationModel>>;

    fn load_detector(&self, path: &Path) -> Result<Arc<dyn DetectionModel>>;
}

/// ONNX Runtime sessions bound to one device
pub struct OnnxModelLoader {
    device: Device,
    onnx_config: OnnxConfig,
}

impl OnnxModelLoader {
    pub fn new(device: Device, onnx_config: OnnxConfig) -> Self {
        Self { device, onnx_config }
    }
}

impl ModelLoader for OnnxModelLoader {
    fn load_classifier(&self, path: &Path) -> Result<Arc<dyn ClassificationModel>> {
        Ok(Arc::new(OnnxClassifier::load(path, self.device, &self.onnx_config)?))
    }

    fn load_detector(&self, path: &Path) -> Result<Arc<dyn DetectionModel>> {
        Ok(Arc::new(OnnxYoloDetector::load(path, self.device, &self.onnx_config)?))
    }
}

/// A loaded classifier and its class names
pub struct ClassifierEntry {
    pub descriptor: ModelDescriptor,
    pub model: Arc<dyn ClassificationModel>,
    /// `None` means labels fall back to the numeric index
    pub labels: Option<LabelMap>,
}

pub struct DetectorEntry {
    pub descriptor: ModelDescriptor,
    pub model: Arc<dyn DetectionModel>,
}

/// Every model loaded at startup.
///
/// Built once, then shared read-only behind an `Arc` for the life of the
/// process. The device is resolved before any model is loaded and never
/// re-probed.
pub struct ModelRegistry {
    device: Device,
    gate: DeviceGate,
    classifiers: BTreeMap<ClassificationModelId, ClassifierEntry>,
    detectors: BTreeMap<DetectionModelId, DetectorEntry>,
}

/// Snapshot for the info endpoint
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub device: Device,
    pub models: Vec<ModelDescriptor>,
    pub unavailable: Vec<String>,
}

impl ModelRegistry {
    /// Resolve the device and load every configured model from disk
    pub fn load(config: &Config) -> Self {
        let device = Device::resolve(config.onnx_config.device);
        tracing::info!("Inference device: {:?}", device);

        let loader = OnnxModelLoader::new(device, config.onnx_config.clone());
        Self::load_with(config, device, &loader)
    }

    /// Same as [`load`](ModelRegistry::load) with an explicit device and loader.
    ///
    /// A model that fails to load is logged and left out; this never fails.
    pub fn load_with(config: &Config, device: Device, loader: &dyn ModelLoader) -> Self {
        tracing::info!("Loading models from {}", config.models_dir.display());

        let mut registry = Self::new(device, config.onnx_config.accelerator_permits);

        let pretrained_labels = Self::load_pretrained_labels(config);
        for id in ClassificationModelId::ALL {
            if let Some(entry) = Self::load_classifier(config, id, loader, pretrained_labels.as_ref()) {
                registry.classifiers.insert(id, entry);
            }
        }

        for id in DetectionModelId::ALL {
            let path = config.detection_weights_path(id);
            match loader.load_detector(&path) {
                Ok(model) => {
                    tracing::info!("Detection model '{}' loaded", id);
                    let descriptor = ModelDescriptor {
                        name: id.to_string(),
                        kind: ModelKind::Detection,
                        weights: path,
                        labels: None,
                        source: WeightsSource::FineTuned,
                    };
                    registry.detectors.insert(id, DetectorEntry { descriptor, model });
                }
                Err(e) => {
                    tracing::error!("Detection model '{}' unavailable: {}", id, e);
                }
            }
        }

        tracing::info!(
            "Model registry ready: {} classification, {} detection models",
            registry.classifiers.len(),
            registry.detectors.len()
        );

        registry
    }

    /// Empty registry; models are added with the `with_*` builders
    pub fn new(device: Device, accelerator_permits: usize) -> Self {
        Self {
            device,
            gate: DeviceGate::new(device, accelerator_permits),
            classifiers: BTreeMap::new(),
            detectors: BTreeMap::new(),
        }
    }

    /// Register a classifier, replacing any previous entry for `id`
    pub fn with_classifier(
        mut self,
        id: ClassificationModelId,
        model: Arc<dyn ClassificationModel>,
        labels: Option<LabelMap>,
        descriptor: ModelDescriptor,
    ) -> Self {
        self.classifiers.insert(id, ClassifierEntry { descriptor, model, labels });
        self
    }

    /// Register a detector, replacing any previous entry for `id`
    pub fn with_detector(
        mut self,
        id: DetectionModelId,
        model: Arc<dyn DetectionModel>,
        descriptor: ModelDescriptor,
    ) -> Self {
        self.detectors.insert(id, DetectorEntry { descriptor, model });
        self
    }

    fn load_pretrained_labels(config: &Config) -> Option<LabelMap> {
        let path = config.pretrained_labels_path();
        if !path.exists() {
            tracing::warn!(
                "Default label list {} missing, pretrained models will report numeric classes",
                path.display()
            );
            return None;
        }

        match LabelMap::from_label_list(&path) {
            Ok(labels) => Some(labels),
            Err(e) => {
                tracing::warn!("Ignoring default label list: {}", e);
                None
            }
        }
    }

    /// Fine-tuned weights plus mapping when both load, otherwise the generic
    /// pretrained model. `None` only when neither can be loaded.
    fn load_classifier(
        config: &Config,
        id: ClassificationModelId,
        loader: &dyn ModelLoader,
        pretrained_labels: Option<&LabelMap>,
    ) -> Option<ClassifierEntry> {
        let weights = config.finetuned_weights_path(id);
        let mapping = config.label_mapping_path(id);

        if weights.exists() && mapping.exists() {
            let loaded = LabelMap::from_class_index_json(&mapping)
                .and_then(|labels| loader.load_classifier(&weights).map(|model| (model, labels)));

            match loaded {
                Ok((model, labels)) => {
                    tracing::info!("Classification model '{}' loaded with {} fine-tuned classes", id, labels.len());
                    return Some(ClassifierEntry {
                        descriptor: ModelDescriptor {
                            name: id.to_string(),
                            kind: ModelKind::Classification,
                            weights,
                            labels: Some(mapping),
                            source: WeightsSource::FineTuned,
                        },
                        model,
                        labels: Some(labels),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        "{} fine-tuned model unusable ({}). Loading default pretrained model.",
                        id,
                        e
                    );
                }
            }
        } else {
            tracing::warn!("{} fine-tuned model missing. Loading default pretrained model.", id);
        }

        let pretrained = config.pretrained_weights_path(id);
        match loader.load_classifier(&pretrained) {
            Ok(model) => Some(ClassifierEntry {
                descriptor: ModelDescriptor {
                    name: id.to_string(),
                    kind: ModelKind::Classification,
                    weights: pretrained,
                    labels: pretrained_labels.map(|_| config.pretrained_labels_path()),
                    source: WeightsSource::Pretrained,
                },
                model,
                labels: pretrained_labels.cloned(),
            }),
            Err(e) => {
                tracing::error!("Classification model '{}' unavailable: {}", id, e);
                None
            }
        }
    }

    /// Case-insensitive lookup. `ModelNotFound` for unknown or unloaded names.
    pub fn get_classification_model(&self, name: &str) -> Result<&ClassifierEntry> {
        let id: ClassificationModelId = name.parse()?;
        self.classifiers
            .get(&id)
            .ok_or_else(|| VisionError::ModelNotFound(id.to_string()))
    }

    /// See [`get_classification_model`](ModelRegistry::get_classification_model)
    pub fn get_detection_model(&self, name: &str) -> Result<&DetectorEntry> {
        let id: DetectionModelId = name.parse()?;
        self.detectors
            .get(&id)
            .ok_or_else(|| VisionError::ModelNotFound(id.to_string()))
    }

    /// Class name for a classifier output index, or the index itself when the
    /// model has no mapping for it
    pub fn label_for(&self, name: &str, index: usize) -> String {
        match self.get_classification_model(name) {
            Ok(ClassifierEntry { labels: Some(labels), .. }) => labels.label_or_index(index),
            _ => index.to_string(),
        }
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Admission gate every inference call goes through
    pub fn gate(&self) -> &DeviceGate {
        &self.gate
    }

    /// Loaded models, classifiers first
    pub fn descriptors(&self) -> Vec<ModelDescriptor> {
        self.classifiers
            .values()
            .map(|entry| entry.descriptor.clone())
            .chain(self.detectors.values().map(|entry| entry.descriptor.clone()))
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        let unavailable = ClassificationModelId::ALL
            .into_iter()
            .filter(|id| !self.classifiers.contains_key(id))
            .map(|id| id.to_string())
            .chain(
                DetectionModelId::ALL
                    .into_iter()
                    .filter(|id| !self.detectors.contains_key(id))
                    .map(|id| id.to_string()),
            )
            .collect();

        RegistryStats {
            device: self.device,
            models: self.descriptors(),
            unavailable,
        }
    }

    /// Release every model. Called once at process shutdown.
    pub fn shutdown(self) {
        tracing::info!(
            "Releasing {} classification and {} detection models",
            self.classifiers.len(),
            self.detectors.len()
        );
        drop(self);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::detector::RawBox;
    use image::RgbImage;
    use ndarray::Array4;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// Classifier returning fixed logits
    pub(crate) struct FixedLogits(pub Vec<f32>);

    impl ClassificationModel for FixedLogits {
        fn forward(&self, _input: Array4<f32>) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    /// Detector returning fixed boxes
    pub(crate) struct FixedBoxes {
        pub labels: LabelMap,
        pub boxes: Vec<RawBox>,
    }

    impl DetectionModel for FixedBoxes {
        fn labels(&self) -> &LabelMap {
            &self.labels
        }

        fn detect(&self, _image: &RgbImage) -> Result<Vec<RawBox>> {
            Ok(self.boxes.clone())
        }
    }

    /// Loads any file that exists; files containing `corrupt` fail to load
    struct FileStubLoader;

    impl FileStubLoader {
        fn check(path: &Path) -> Result<()> {
            let content = fs::read_to_string(path)
                .map_err(|_| VisionError::ModelLoad(format!("not found: {}", path.display())))?;
            if content.contains("corrupt") {
                return Err(VisionError::ModelLoad(format!("corrupt: {}", path.display())));
            }
            Ok(())
        }
    }

    impl ModelLoader for FileStubLoader {
        fn load_classifier(&self, path: &Path) -> Result<Arc<dyn ClassificationModel>> {
            Self::check(path)?;
            Ok(Arc::new(FixedLogits(vec![0.1, 2.0, 0.3])))
        }

        fn load_detector(&self, path: &Path) -> Result<Arc<dyn DetectionModel>> {
            Self::check(path)?;
            Ok(Arc::new(FixedBoxes {
                labels: LabelMap::default(),
                boxes: Vec::new(),
            }))
        }
    }

    fn write(path: PathBuf, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn config_for(dir: &TempDir) -> Config {
        Config::new(
            "127.0.0.1:0".to_string(),
            dir.path().to_string_lossy().into_owned(),
            Some(1),
            false,
        )
        .unwrap()
    }

    /// Every pretrained classifier, the default labels and every detector
    fn seed_defaults(config: &Config) {
        for id in ClassificationModelId::ALL {
            write(config.pretrained_weights_path(id), "onnx");
        }
        write(config.pretrained_labels_path(), "tench\ngoldfish\ngreat white shark\n");
        for id in DetectionModelId::ALL {
            write(config.detection_weights_path(id), "onnx");
        }
    }

    #[test]
    fn fine_tuned_models_are_preferred() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);
        seed_defaults(&config);
        write(config.finetuned_weights_path(ClassificationModelId::ResNet), "onnx");
        write(
            config.label_mapping_path(ClassificationModelId::ResNet),
            r#"{"rice": 0, "wheat": 1, "maize": 2}"#,
        );

        let registry = ModelRegistry::load_with(&config, Device::Cpu, &FileStubLoader);

        let entry = registry.get_classification_model("resnet").unwrap();
        assert_eq!(entry.descriptor.source, WeightsSource::FineTuned);
        assert_eq!(registry.label_for("resnet", 1), "wheat");
    }

    #[test]
    fn missing_fine_tuned_weights_fall_back_to_pretrained() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);
        seed_defaults(&config);
        // mapping present, weights absent
        write(config.label_mapping_path(ClassificationModelId::EfficientNet), r#"{"wheat": 0}"#);

        let registry = ModelRegistry::load_with(&config, Device::Cpu, &FileStubLoader);

        let entry = registry.get_classification_model("efficientnet").unwrap();
        assert_eq!(entry.descriptor.source, WeightsSource::Pretrained);
        assert_eq!(registry.label_for("efficientnet", 2), "great white shark");
    }

    #[test]
    fn corrupt_fine_tuned_weights_fall_back_to_pretrained() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);
        seed_defaults(&config);
        write(config.finetuned_weights_path(ClassificationModelId::MobileNet), "corrupt");
        write(config.label_mapping_path(ClassificationModelId::MobileNet), r#"{"wheat": 0}"#);

        let registry = ModelRegistry::load_with(&config, Device::Cpu, &FileStubLoader);
        let entry = registry.get_classification_model("mobilenet").unwrap();
        assert_eq!(entry.descriptor.source, WeightsSource::Pretrained);
    }

    #[test]
    fn missing_default_labels_give_numeric_classes() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);
        seed_defaults(&config);
        fs::remove_file(config.pretrained_labels_path()).unwrap();

        let registry = ModelRegistry::load_with(&config, Device::Cpu, &FileStubLoader);
        assert!(registry.get_classification_model("resnet").unwrap().labels.is_none());
        assert_eq!(registry.label_for("resnet", 42), "42");
    }

    #[test]
    fn missing_detector_is_unavailable_but_others_load() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);
        seed_defaults(&config);
        fs::remove_file(config.detection_weights_path(DetectionModelId::YoloV8X)).unwrap();

        let registry = ModelRegistry::load_with(&config, Device::Cpu, &FileStubLoader);

        assert!(registry.get_detection_model("yolov8_m").is_ok());
        assert!(registry.get_detection_model("yolov8_l").is_ok());
        assert!(matches!(
            registry.get_detection_model("yolov8_x"),
            Err(VisionError::ModelNotFound(_))
        ));
        assert_eq!(registry.stats().unavailable, vec!["yolov8_x".to_string()]);
    }

    #[test]
    fn empty_model_dir_never_fails_startup() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);

        let registry = ModelRegistry::load_with(&config, Device::Cpu, &FileStubLoader);
        assert!(registry.descriptors().is_empty());
        assert_eq!(registry.stats().unavailable.len(), 6);
        assert!(matches!(
            registry.get_classification_model("resnet"),
            Err(VisionError::ModelNotFound(_))
        ));
    }

    #[test]
    fn unknown_names_are_not_found() {
        let registry = ModelRegistry::new(Device::Cpu, 1);
        assert!(matches!(
            registry.get_classification_model("nonexistent_model"),
            Err(VisionError::ModelNotFound(_))
        ));
        assert!(matches!(
            registry.get_detection_model("nonexistent_model"),
            Err(VisionError::ModelNotFound(_))
        ));
        assert_eq!(registry.label_for("nonexistent_model", 3), "3");
    }

    #[test]
    fn accelerator_registry_is_gated() {
        let registry = ModelRegistry::new(Device::Cuda, 2);
        assert_eq!(registry.gate().available_permits(), Some(2));
        registry.shutdown();
    }
}
