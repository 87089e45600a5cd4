use crate::image::ImageLoader;
use crate::inference::classification::ClassificationEngine;
use crate::inference::detection::DetectionEngine;
use crate::inference::record::{RecordSink, TracingRecordSink};
use crate::inference::types::{
    ClassificationResult, DetectionSummary, InferenceRecord, InferenceRequest, InferenceResponse, Mode,
};
use crate::knowledge::{Enrichment, KnowledgeLookup};
use crate::models::ModelRegistry;
use crate::utils::error::VisionError;
use crate::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_ENRICHMENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Response plus the record handed to the sink
#[derive(Debug, Clone)]
pub struct Assembled {
    pub response: InferenceResponse,
    pub record: InferenceRecord,
}

enum EngineOutput {
    Classified(ClassificationResult),
    Detected(DetectionSummary),
}

/// One stateless pass per request: validate, run the engine for the
/// requested mode, enrich classifications, build the record.
#[derive(Clone)]
pub struct ResultAssembler {
    registry: Arc<ModelRegistry>,
    lookup: Arc<dyn KnowledgeLookup>,
    sink: Arc<dyn RecordSink>,
    enrichment_timeout: Duration,
}

impl ResultAssembler {
    /// Assembler with the logging record sink and a 5 s enrichment timeout
    pub fn new(registry: Arc<ModelRegistry>, lookup: Arc<dyn KnowledgeLookup>) -> Self {
        Self {
            registry,
            lookup,
            sink: Arc::new(TracingRecordSink),
            enrichment_timeout: DEFAULT_ENRICHMENT_TIMEOUT,
        }
    }

    /// Replace the record sink
    pub fn with_sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Upper bound on a single knowledge lookup
    pub fn with_enrichment_timeout(mut self, timeout: Duration) -> Self {
        self.enrichment_timeout = timeout;
        self
    }

    /// Registry shared with the info endpoints
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Assemble the response and hand the record to the sink
    pub async fn process(&self, request: InferenceRequest) -> Result<InferenceResponse> {
        let original = request.image.clone();
        let Assembled { response, record } = self.assemble(request).await?;

        let annotated = match &response {
            InferenceResponse::Detection(summary) => Some(summary.annotated_image.as_slice()),
            InferenceResponse::Classification { .. } => None,
        };
        if let Err(e) = self.sink.store(&record, &original, annotated).await {
            tracing::warn!("Failed to store inference record {}: {}", record.id, e);
        }

        Ok(response)
    }

    /// Run one request through validation, inference and enrichment.
    ///
    /// Fails with `InvalidInput` before any model is touched when the model id,
    /// mode or image is unusable. Nothing is stored here; see [`process`].
    ///
    /// [`process`]: ResultAssembler::process
    pub async fn assemble(&self, request: InferenceRequest) -> Result<Assembled> {
        let start_time = Instant::now();

        let model_id = request.model_id.trim().to_ascii_lowercase();
        if model_id.is_empty() {
            return Err(VisionError::InvalidInput("Model id is required".to_string()));
        }
        let mode: Mode = request.mode.parse()?;
        let extension = ImageLoader::extension(&request.image);

        // decoding large uploads is CPU-bound, keep it off the async workers
        let bytes = request.image;
        let image = tokio::task::spawn_blocking(move || ImageLoader::from_bytes(&bytes))
            .await
            .map_err(|e| VisionError::Internal(format!("Image decode task failed: {}", e)))??;

        // The permit moves into the blocking task, so it is only released once
        // the model call returns, even if this future is dropped first.
        let permit = self.registry.gate().acquire().await?;
        let registry = Arc::clone(&self.registry);
        let model = model_id.clone();

        let output = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            match mode {
                Mode::Classify => ClassificationEngine::new(registry)
                    .classify(&image, &model)
                    .map(EngineOutput::Classified),
                Mode::Detect => DetectionEngine::new(registry)
                    .detect(&image, &model)
                    .map(EngineOutput::Detected),
            }
        })
        .await
        .map_err(|e| VisionError::Internal(format!("Inference task failed: {}", e)))??;

        let assembled = match output {
            EngineOutput::Classified(result) => {
                let enrichment = self.enrich(&result.class_name).await;
                let record = InferenceRecord::for_classification(
                    request.caller,
                    &model_id,
                    extension,
                    &result,
                    enrichment.as_ref(),
                );
                tracing::info!(
                    "Classification completed: model={}, class={}, confidence={}, time={:.3}s",
                    model_id,
                    result.class_name,
                    result.confidence_display(),
                    start_time.elapsed().as_secs_f32()
                );
                Assembled {
                    response: InferenceResponse::Classification { result, enrichment },
                    record,
                }
            }
            EngineOutput::Detected(summary) => {
                let record =
                    InferenceRecord::for_detection(request.caller, &model_id, extension, &summary);
                tracing::info!(
                    "Detection completed: model={}, weeds={}, crops={}, time={:.3}s",
                    model_id,
                    summary.weed_count,
                    summary.crop_count,
                    start_time.elapsed().as_secs_f32()
                );
                Assembled {
                    response: InferenceResponse::Detection(summary),
                    record,
                }
            }
        };

        Ok(assembled)
    }

    /// Best-effort lookup; every failure degrades to `None`
    async fn enrich(&self, class_name: &str) -> Option<Enrichment> {
        match tokio::time::timeout(self.enrichment_timeout, self.lookup.lookup(class_name)).await {
            Ok(Ok(Some(enrichment))) => Some(enrichment),
            Ok(Ok(None)) => {
                tracing::debug!("No knowledge page for '{}'", class_name);
                None
            }
            Ok(Err(e)) => {
                tracing::warn!("Enrichment for '{}' unavailable: {}", class_name, e);
                None
            }
            Err(_) => {
                let e = VisionError::EnrichmentUnavailable(format!(
                    "lookup timed out after {:?}",
                    self.enrichment_timeout
                ));
                tracing::warn!("Enrichment for '{}' unavailable: {}", class_name, e);
                None
            }
        }
    }
}
