use crate::config::KnowledgeConfig;
use crate::knowledge::{Enrichment, KnowledgeLookup};
use crate::utils::error::VisionError;
use crate::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;

/// Page summaries from a Wikipedia-style REST endpoint.
///
/// Owns its HTTP client; the connection pool is released by [`close`] or when
/// the lookup is dropped.
///
/// [`close`]: WikipediaLookup::close
pub struct WikipediaLookup {
    client: Client,
    endpoint: Url,
}

#[derive(Debug, Deserialize)]
struct PageSummary {
    #[serde(rename = "type", default)]
    kind: String,
    title: String,
    #[serde(default)]
    extract: String,
    content_urls: Option<ContentUrls>,
}

#[derive(Debug, Deserialize)]
struct ContentUrls {
    desktop: Option<PageUrl>,
}

#[derive(Debug, Deserialize)]
struct PageUrl {
    page: String,
}

impl WikipediaLookup {
    pub fn open(config: &KnowledgeConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            VisionError::Config(format!("Invalid knowledge endpoint {}: {}", config.endpoint, e))
        })?;

        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| VisionError::Config(format!("Failed to build HTTP client: {}", e)))?;

        tracing::info!(
            "Knowledge lookup ready: endpoint={}, timeout={:?}",
            endpoint,
            config.timeout
        );

        Ok(Self { client, endpoint })
    }

    pub fn close(self) {
        tracing::debug!("Closing knowledge lookup client for {}", self.endpoint);
        drop(self.client);
    }

    fn page_url(&self, term: &str) -> Result<Url> {
        let title = page_title(term);
        if title.is_empty() {
            return Err(VisionError::InvalidInput("Empty lookup term".to_string()));
        }

        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| VisionError::Config(format!("Endpoint {} cannot take a path", self.endpoint)))?
            .pop_if_empty()
            .push(&title);
        Ok(url)
    }
}

#[async_trait]
impl KnowledgeLookup for WikipediaLookup {
    async fn lookup(&self, term: &str) -> Result<Option<Enrichment>> {
        let url = self.page_url(term)?;
        tracing::debug!("Looking up '{}' at {}", term, url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| VisionError::EnrichmentUnavailable(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = response
            .error_for_status()
            .map_err(|e| VisionError::EnrichmentUnavailable(e.to_string()))?;

        let summary: PageSummary = response
            .json()
            .await
            .map_err(|e| VisionError::EnrichmentUnavailable(format!("Malformed summary: {}", e)))?;

        Ok(summary_to_enrichment(summary))
    }
}

/// Class names often come as `Tomato___Late_blight`; turn them into a page title
fn page_title(term: &str) -> String {
    term.split(|c: char| c == '_' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn summary_to_enrichment(summary: PageSummary) -> Option<Enrichment> {
    if summary.kind == "disambiguation" || summary.extract.trim().is_empty() {
        return None;
    }

    let url = summary
        .content_urls
        .and_then(|urls| urls.desktop)
        .map(|desktop| desktop.page)
        .unwrap_or_default();

    Some(Enrichment {
        title: summary.title,
        text: summary.extract,
        url,
    })
}
