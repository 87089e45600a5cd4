pub mod config;
pub mod image;
pub mod inference;
pub mod knowledge;
pub mod models;
pub mod utils;
pub mod web;

// Re-export the main types
pub use config::Config;
pub use inference::{InferenceRequest, InferenceResponse, ResultAssembler};
pub use models::ModelRegistry;
pub use utils::error::VisionError;

pub type Result<T> = std::result::Result<T, VisionError>;
