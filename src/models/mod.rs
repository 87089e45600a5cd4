pub mod catalog;
pub mod classifier;
pub mod detector;
pub mod device;
pub mod labels;
pub mod registry;

pub use catalog::{ClassificationModelId, DetectionModelId, ModelDescriptor, ModelKind, WeightsSource};
pub use classifier::{ClassificationModel, OnnxClassifier};
pub use detector::{DetectionModel, OnnxYoloDetector, RawBox};
pub use device::{Device, DeviceGate};
pub use labels::LabelMap;
pub use registry::{ModelLoader, ModelRegistry, OnnxModelLoader, RegistryStats};
