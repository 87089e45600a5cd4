use crate::{
    image::ImageLoader,
    inference::{InferenceRequest, InferenceResponse},
    utils::error::VisionError,
    web::{
        extractors::{CallerId, RequestId, ValidatedJson},
        AppState,
    },
    Result,
};
use axum::{
    extract::{Multipart, State},
    response::Json,
};
use serde::Deserialize;
use std::time::Instant;

const DEFAULT_MODE: &str = "classify";

/// JSON request body (base64 mode)
#[derive(Debug, Deserialize)]
pub struct InferJsonRequest {
    /// Base64 image, optionally as a `data:` URL
    pub image: String,

    pub model: String,

    #[serde(default = "default_mode")]
    pub mode: String,
}

fn default_mode() -> String {
    DEFAULT_MODE.to_string()
}

pub async fn infer_json_handler(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    CallerId(caller): CallerId,
    ValidatedJson(request): ValidatedJson<InferJsonRequest>,
) -> Result<Json<InferenceResponse>> {
    tracing::info!(
        "Processing JSON inference request: request_id={}, model={}, mode={}",
        request_id,
        request.model,
        request.mode
    );

    let image = ImageLoader::decode_base64(&request.image)?;
    run(&state, &request_id, caller, InferenceRequest::new(image, request.model, request.mode)).await
}

/// Multipart form: `image` (file), `model`, `mode`
pub async fn upload_handler(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    CallerId(caller): CallerId,
    mut multipart: Multipart,
) -> Result<Json<InferenceResponse>> {
    tracing::info!("Processing multipart inference request: request_id={}", request_id);

    let mut image: Option<Vec<u8>> = None;
    let mut model: Option<String> = None;
    let mut mode: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        VisionError::InvalidInput(format!("Failed to read multipart field: {}", e))
    })? {
        let field_name = field.name().unwrap_or("unknown").to_string();

        match field_name.as_str() {
            "image" | "file" => {
                if let Some(content_type) = field.content_type() {
                    if !content_type.starts_with("image/") && content_type != "application/octet-stream" {
                        return Err(VisionError::InvalidInput(format!(
                            "Unsupported content type: {}",
                            content_type
                        )));
                    }
                }

                let data = field.bytes().await.map_err(|e| {
                    VisionError::InvalidInput(format!("Failed to read file data: {}", e))
                })?;

                tracing::debug!("Received file: {} bytes", data.len());
                image = Some(data.to_vec());
            }
            "model" | "mode" => {
                let value = field.text().await.map_err(|e| {
                    VisionError::InvalidInput(format!("Failed to read field '{}': {}", field_name, e))
                })?;
                if field_name == "model" {
                    model = Some(value);
                } else {
                    mode = Some(value);
                }
            }
            _ => {
                tracing::debug!("Ignoring unknown field: {}", field_name);
            }
        }
    }

    let image = image.ok_or_else(|| VisionError::InvalidInput("No image file provided".to_string()))?;
    let model = model.ok_or_else(|| VisionError::InvalidInput("Model is required".to_string()))?;
    let mode = mode.unwrap_or_else(default_mode);

    run(&state, &request_id, caller, InferenceRequest::new(image, model, mode)).await
}

async fn run(
    state: &AppState,
    request_id: &str,
    caller: Option<String>,
    request: InferenceRequest,
) -> Result<Json<InferenceResponse>> {
    let start_time = Instant::now();
    let request = match caller {
        Some(caller) => request.with_caller(caller),
        None => request,
    };

    let response = state.assembler.process(request).await?;

    tracing::info!(
        "Inference completed: request_id={}, mode={}, time={:.3}s",
        request_id,
        response.mode(),
        start_time.elapsed().as_secs_f32()
    );

    Ok(Json(response))
}
