//! The inference pipeline: engines per mode and the assembler that drives them.

pub mod classification;
pub mod detection;
pub mod pipeline;
pub mod record;
pub mod types;

pub use classification::ClassificationEngine;
pub use detection::DetectionEngine;
pub use pipeline::{Assembled, ResultAssembler};
pub use record::{RecordSink, TracingRecordSink};
pub use types::{
    BoundingBox, Category, ClassificationResult, Detection, DetectionSummary, InferenceRecord,
    InferenceRequest, InferenceResponse, Mode,
};
