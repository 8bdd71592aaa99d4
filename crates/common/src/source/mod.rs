//! Paper source abstraction
//!
//! Provides a unified interface over external literature feeds:
//! - arXiv Atom API
//! - Static in-process candidate lists (tests, offline runs)

mod arxiv;

pub use arxiv::ArxivSource;

use crate::config::SourceConfig;
use crate::db::NewPaper;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A paper as returned by a feed, before it is admitted to the pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePaper {
    /// `None` when the feed entry carries no usable identifier
    pub external_id: Option<String>,
    pub title: String,
    pub authors: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    /// Raw publication timestamp as the feed reported it
    pub published: String,
}

/// Why a candidate could not become a [`NewPaper`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateRejection {
    MissingExternalId,
    InvalidPublishedAt(String),
}

impl CandidatePaper {
    /// Convert into an insertable paper
    pub fn into_new_paper(self) -> std::result::Result<NewPaper, CandidateRejection> {
        let external_id = self
            .external_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(CandidateRejection::MissingExternalId)?;

        let published_at = DateTime::parse_from_rfc3339(self.published.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| CandidateRejection::InvalidPublishedAt(self.published.clone()))?;

        Ok(NewPaper {
            external_id,
            title: self.title,
            authors: self.authors,
            abstract_text: self.abstract_text,
            published_at,
        })
    }
}

/// Trait for fetching candidate papers from an external feed
#[async_trait]
pub trait PaperSource: Send + Sync {
    /// Fetch up to `max_results` candidates for a topic query.
    ///
    /// An empty vector is a successful zero-result fetch; transport and
    /// parse failures are errors.
    async fn fetch_batch(&self, topic_query: &str, max_results: usize)
        -> Result<Vec<CandidatePaper>>;

    /// Source name for logs and metrics
    fn name(&self) -> &str;
}

/// Source that serves a fixed candidate list
pub struct StaticSource {
    candidates: Vec<CandidatePaper>,
}

impl StaticSource {
    pub fn new(candidates: Vec<CandidatePaper>) -> Self {
        Self { candidates }
    }

    /// `count` synthetic candidates with keys `static-0000`, `static-0001`, ...
    pub fn generated(count: usize) -> Self {
        let candidates = (0..count)
            .map(|i| CandidatePaper {
                external_id: Some(format!("static-{i:04}")),
                title: format!("Synthetic paper {i}"),
                authors: "Ada Lovelace, Alan Turing".to_string(),
                abstract_text: format!("Abstract of synthetic paper {i}."),
                published: "2026-01-01T00:00:00Z".to_string(),
            })
            .collect();
        Self::new(candidates)
    }
}

#[async_trait]
impl PaperSource for StaticSource {
    async fn fetch_batch(
        &self,
        _topic_query: &str,
        max_results: usize,
    ) -> Result<Vec<CandidatePaper>> {
        Ok(self.candidates.iter().take(max_results).cloned().collect())
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Create a paper source based on configuration
pub fn create_source(config: &SourceConfig) -> Result<Arc<dyn PaperSource>> {
    match config.provider.as_str() {
        "arxiv" => Ok(Arc::new(ArxivSource::new(config)?)),
        "static" => Ok(Arc::new(StaticSource::generated(100))),
        other => Err(AppError::Configuration {
            message: format!("Unknown paper source provider: {}", other),
        }),
    }
}
