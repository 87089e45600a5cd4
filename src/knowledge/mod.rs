//! Best-effort enrichment text keyed by a predicted class name.
//!
//! Lookups never take part in inference: they run after the model call has
//! finished and released its device permit, under their own timeout.

pub mod wikipedia;

pub use wikipedia::WikipediaLookup;

use crate::config::KnowledgeConfig;
use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// Descriptive text about a class
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Enrichment {
    pub title: String,
    pub text: String,
    pub url: String,
}

#[async_trait]
pub trait KnowledgeLookup: Send + Sync {
    /// `Ok(None)` when the source has no page for `term`
    async fn lookup(&self, term: &str) -> Result<Option<Enrichment>>;
}

/// Lookup used when enrichment is switched off
pub struct DisabledLookup;

#[async_trait]
impl KnowledgeLookup for DisabledLookup {
    async fn lookup(&self, _term: &str) -> Result<Option<Enrichment>> {
        Ok(None)
    }
}

/// Build the lookup selected by `config`
pub fn from_config(config: &KnowledgeConfig) -> Result<Arc<dyn KnowledgeLookup>> {
    if !config.enabled {
        tracing::info!("Knowledge enrichment disabled");
        return Ok(Arc::new(DisabledLookup));
    }

    Ok(Arc::new(WikipediaLookup::open(config)?))
}
