use crate::models::{ClassificationModelId, DetectionModelId};
use crate::utils::error::VisionError;
use crate::Result;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub bind_addr: String,

    /// Model directory, holding `classification/` and `detection/`
    pub models_dir: PathBuf,

    /// Worker thread count
    pub workers: usize,

    /// Development mode
    pub dev_mode: bool,

    pub onnx_config: OnnxConfig,

    pub server_config: ServerConfig,

    pub knowledge_config: KnowledgeConfig,
}

#[derive(Debug, Clone)]
pub struct OnnxConfig {
    /// Intra-op CPU threads per session
    pub intra_threads: usize,

    pub optimization_level: i32,

    /// Requested compute device, resolved once at registry construction
    pub device: DevicePreference,

    /// Concurrent inference calls allowed on an accelerator
    pub accelerator_permits: usize,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Request timeout in seconds
    pub request_timeout: u64,

    /// Maximum request body size in bytes
    pub max_request_size: usize,

    pub max_connections: usize,
}

#[derive(Debug, Clone)]
pub struct KnowledgeConfig {
    pub enabled: bool,

    /// Base of the page-summary endpoint; the URL-encoded term is appended
    pub endpoint: String,

    pub user_agent: String,

    pub timeout: Duration,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://en.wikipedia.org/api/rest_v1/page/summary/".to_string(),
            user_agent: format!("CropWeedVision/{} (crop and weed detection)", env!("CARGO_PKG_VERSION")),
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePreference {
    Auto,
    Cpu,
    Cuda,
}

impl FromStr for DevicePreference {
    type Err = VisionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            other => Err(VisionError::Config(format!(
                "Unknown device '{}', expected auto, cpu or cuda",
                other
            ))),
        }
    }
}

impl Config {
    /// Defaults for everything not given on the command line. `workers`
    /// falls back to the core count.
    pub fn new(
        bind_addr: String,
        models_dir: String,
        workers: Option<usize>,
        dev_mode: bool,
    ) -> Result<Self> {
        let cpu_cores = num_cpus::get();
        let workers = workers.unwrap_or(cpu_cores);

        if workers == 0 {
            return Err(VisionError::Config("workers must be at least 1".to_string()));
        }

        let onnx_config = OnnxConfig {
            intra_threads: (cpu_cores * 3 / 4).max(1),
            optimization_level: 3,
            device: DevicePreference::Auto,
            accelerator_permits: 1,
        };

        let server_config = ServerConfig {
            request_timeout: if dev_mode { 300 } else { 60 },
            max_request_size: 50 * 1024 * 1024,
            max_connections: if dev_mode { 10 } else { 1000 },
        };

        Ok(Self {
            bind_addr,
            models_dir: PathBuf::from(models_dir),
            workers,
            dev_mode,
            onnx_config,
            server_config,
            knowledge_config: KnowledgeConfig::default(),
        })
    }

    /// Rejects zero permits
    pub fn with_device(mut self, device: DevicePreference, accelerator_permits: usize) -> Result<Self> {
        if accelerator_permits == 0 {
            return Err(VisionError::Config(
                "accelerator permits must be at least 1".to_string(),
            ));
        }
        self.onnx_config.device = device;
        self.onnx_config.accelerator_permits = accelerator_permits;
        Ok(self)
    }

    pub fn with_enrichment(mut self, enabled: bool, timeout_secs: u64) -> Self {
        self.knowledge_config.enabled = enabled;
        self.knowledge_config.timeout = Duration::from_secs(timeout_secs.max(1));
        self
    }

    pub fn classification_dir(&self) -> PathBuf {
        self.models_dir.join("classification")
    }

    pub fn detection_dir(&self) -> PathBuf {
        self.models_dir.join("detection")
    }

    /// Fine-tuned classification weights
    pub fn finetuned_weights_path(&self, id: ClassificationModelId) -> PathBuf {
        self.classification_dir().join(format!("{}_finetuned.onnx", id.artifact_stem()))
    }

    /// Label-index mapping written next to the fine-tuned weights
    pub fn label_mapping_path(&self, id: ClassificationModelId) -> PathBuf {
        self.classification_dir().join(format!("{}_cls_idx.json", id.artifact_stem()))
    }

    /// Generic pretrained weights used when the fine-tuned artifact is missing
    pub fn pretrained_weights_path(&self, id: ClassificationModelId) -> PathBuf {
        self.classification_dir()
            .join("pretrained")
            .join(format!("{}.onnx", id.pretrained_stem()))
    }

    /// Default label list shared by every pretrained classifier
    pub fn pretrained_labels_path(&self) -> PathBuf {
        self.classification_dir().join("pretrained").join("imagenet_classes.txt")
    }

    /// YOLO weights; class names ship inside the model metadata
    pub fn detection_weights_path(&self, id: DetectionModelId) -> PathBuf {
        self.detection_dir().join(id.weights_file())
    }
}
