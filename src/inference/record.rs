use crate::inference::types::{
    ClassificationResult, DetectionSummary, InferenceRecord, Mode, SUMMARY_PLACEHOLDER, UNKNOWN_CROP,
};
use crate::knowledge::Enrichment;
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

/// Receives the record of every successful inference pass
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// `annotated` is only present for detections. Errors are logged by the
    /// caller and never fail the request.
    async fn store(
        &self,
        record: &InferenceRecord,
        original: &[u8],
        annotated: Option<&[u8]>,
    ) -> Result<()>;
}

/// Logs records without storing anything
pub struct TracingRecordSink;

#[async_trait]
impl RecordSink for TracingRecordSink {
    async fn store(
        &self,
        record: &InferenceRecord,
        original: &[u8],
        annotated: Option<&[u8]>,
    ) -> Result<()> {
        tracing::info!(
            "Inference record: id={}, caller={}, model={}, mode={}, crop={}, original={} ({} bytes), processed={}",
            record.id,
            record.caller.as_deref().unwrap_or("anonymous"),
            record.model_chosen,
            record.mode,
            record.crop_name,
            record.original_image,
            original.len(),
            annotated
                .map(|bytes| format!("{} bytes", bytes.len()))
                .unwrap_or_else(|| "none".to_string())
        );
        Ok(())
    }
}

impl InferenceRecord {
    fn base(caller: Option<String>, model_id: &str, mode: Mode, extension: &str) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            caller,
            model_chosen: model_id.to_string(),
            mode,
            original_image: format!("uploaded_images/{}.{}", id, extension),
            processed_image: None,
            crop_name: String::new(),
            summary: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn for_classification(
        caller: Option<String>,
        model_id: &str,
        extension: &str,
        result: &ClassificationResult,
        enrichment: Option<&Enrichment>,
    ) -> Self {
        Self {
            crop_name: result.class_name.clone(),
            summary: enrichment
                .map(|e| e.text.clone())
                .unwrap_or_else(|| SUMMARY_PLACEHOLDER.to_string()),
            ..Self::base(caller, model_id, Mode::Classify, extension)
        }
    }

    pub fn for_detection(
        caller: Option<String>,
        model_id: &str,
        extension: &str,
        summary: &DetectionSummary,
    ) -> Self {
        let base = Self::base(caller, model_id, Mode::Detect, extension);
        Self {
            processed_image: Some(format!("processed_images/annotated_{}.png", base.id)),
            crop_name: UNKNOWN_CROP.to_string(),
            summary: format!(
                "Detected {} weed(s) and {} crop(s)",
                summary.weed_count, summary.crop_count
            ),
            ..base
        }
    }
}
