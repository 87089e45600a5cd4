use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Model '{0}' not found")]
    ModelNotFound(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Enrichment unavailable: {0}")]
    EnrichmentUnavailable(String),

    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("ORT error: {0}")]
    Ort(#[from] ort::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl VisionError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            VisionError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            VisionError::Base64(_) => StatusCode::BAD_REQUEST,
            VisionError::Json(_) => StatusCode::BAD_REQUEST,
            VisionError::ModelNotFound(_) => StatusCode::NOT_FOUND,
            VisionError::ModelLoad(_) => StatusCode::SERVICE_UNAVAILABLE,
            VisionError::EnrichmentUnavailable(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            VisionError::InvalidInput(_) => "INVALID_INPUT",
            VisionError::ModelNotFound(_) => "MODEL_NOT_FOUND",
            VisionError::Inference(_) => "INFERENCE_ERROR",
            VisionError::EnrichmentUnavailable(_) => "ENRICHMENT_UNAVAILABLE",
            VisionError::ModelLoad(_) => "MODEL_LOAD_ERROR",
            VisionError::Config(_) => "CONFIG_ERROR",
            VisionError::Io(_) => "IO_ERROR",
            VisionError::Json(_) => "JSON_ERROR",
            VisionError::Base64(_) => "BASE64_DECODE_ERROR",
            VisionError::Image(_) => "IMAGE_ERROR",
            VisionError::Ort(_) => "ORT_ERROR",
            VisionError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for VisionError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_response = serde_json::json!({
            "error": format!("{}: {}", self.error_code(), self),
        });

        tracing::error!("Request failed: {} ({})", self, status);

        (status, axum::Json(error_response)).into_response()
    }
}
