// Retrieval dispatcher
// Turns a user-chosen retrieval mode and parameter into a validated search configuration

#[cfg(test)]
mod tests;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::document::Metadata;
use crate::registry::Collection;
use crate::{RagError, Result};

/// Inclusive bounds for the `top_k` result count
pub const TOP_K_RANGE: (u64, u64) = (1, 100);

/// Inclusive bounds for the similarity threshold, as exposed to users
pub const SIMILARITY_THRESHOLD_RANGE: (f64, f64) = (0.0, 100.0);

/// Strategy used to pick chunks for a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMode {
    TopK,
    SimilarityThreshold,
    Mmr,
}

impl RetrievalMode {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TopK => "top_k",
            Self::SimilarityThreshold => "similarity_threshold",
            Self::Mmr => "mmr",
        }
    }
}

impl fmt::Display for RetrievalMode {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetrievalMode {
    type Err = RagError;

    #[inline]
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "top_k" | "top-k" | "topk" => Ok(Self::TopK),
            "similarity_threshold" | "similarity-threshold" | "threshold" => {
                Ok(Self::SimilarityThreshold)
            }
            "mmr" => Ok(Self::Mmr),
            _ => Err(RagError::UnknownMode(s.to_string())),
        }
    }
}

/// Fully specified search handed to the vector store
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetrievalConfig {
    /// The `k` most similar chunks, best first
    TopK { k: usize },
    /// Every chunk whose similarity is at least `min_score`, best first
    SimilarityThreshold { min_score: f32 },
    /// Diversity-aware re-ranking with the store's default trade-off
    Mmr,
}

impl RetrievalConfig {
    #[inline]
    pub fn mode(&self) -> RetrievalMode {
        match self {
            Self::TopK { .. } => RetrievalMode::TopK,
            Self::SimilarityThreshold { .. } => RetrievalMode::SimilarityThreshold,
            Self::Mmr => RetrievalMode::Mmr,
        }
    }

    /// Validate `parameter` against `mode` and build the matching configuration
    #[inline]
    pub fn for_mode(mode: RetrievalMode, parameter: Option<f64>) -> Result<Self> {
        match mode {
            RetrievalMode::TopK => {
                let value = require_parameter(mode, parameter)?;
                let (min, max) = TOP_K_RANGE;
                if value.fract() != 0.0 || !value.is_finite() {
                    return Err(invalid(mode, value, "must be a whole number"));
                }
                if value < min as f64 || value > max as f64 {
                    return Err(invalid(
                        mode,
                        value,
                        &format!("must be between {} and {}", min, max),
                    ));
                }
                Ok(Self::TopK { k: value as usize })
            }
            RetrievalMode::SimilarityThreshold => {
                let value = require_parameter(mode, parameter)?;
                let (min, max) = SIMILARITY_THRESHOLD_RANGE;
                if !value.is_finite() || value < min || value > max {
                    return Err(invalid(
                        mode,
                        value,
                        &format!("must be between {:.2} and {:.2}", min, max),
                    ));
                }
                Ok(Self::SimilarityThreshold {
                    min_score: value as f32,
                })
            }
            RetrievalMode::Mmr => {
                if let Some(value) = parameter {
                    debug!("Ignoring parameter {} for mmr retrieval", value);
                }
                Ok(Self::Mmr)
            }
        }
    }
}

fn require_parameter(mode: RetrievalMode, parameter: Option<f64>) -> Result<f64> {
    parameter.ok_or_else(|| RagError::InvalidParameter {
        mode: mode.to_string(),
        parameter: "<missing>".to_string(),
        reason: "a numeric parameter is required".to_string(),
    })
}

fn invalid(mode: RetrievalMode, value: f64, reason: &str) -> RagError {
    RagError::InvalidParameter {
        mode: mode.to_string(),
        parameter: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Parse `mode` and validate `parameter` for it
#[inline]
pub fn build_config(mode: &str, parameter: Option<f64>) -> Result<RetrievalConfig> {
    let mode: RetrievalMode = mode.parse()?;
    RetrievalConfig::for_mode(mode, parameter)
}

/// A query together with the retrieval strategy chosen for it.
///
/// The mode and parameter stay unvalidated until [`RetrievalRequest::config`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalRequest {
    pub query: String,
    pub mode: RetrievalMode,
    pub parameter: Option<f64>,
}

impl RetrievalRequest {
    #[inline]
    pub fn config(&self) -> Result<RetrievalConfig> {
        RetrievalConfig::for_mode(self.mode, self.parameter)
    }
}

/// One chunk returned by the vector store
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub content: String,
    pub metadata: Metadata,
    /// Similarity to the query when the store reports one
    pub score: Option<f32>,
}

/// Vector store seam used by [`execute`]
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Run `config` for `query` against `collection`, embedding the query with
    /// the collection's own model. Results are ordered best first.
    async fn search(
        &self,
        collection: &Collection,
        query: &str,
        config: &RetrievalConfig,
    ) -> Result<Vec<RetrievedChunk>>;
}

/// Forward a validated configuration to the store and return its results unmodified.
///
/// An empty result is a successful "no matches"; store failures propagate as-is.
#[inline]
pub async fn execute(
    backend: &dyn SearchBackend,
    config: &RetrievalConfig,
    query: &str,
    collection: &Collection,
) -> Result<Vec<RetrievedChunk>> {
    if query.trim().is_empty() {
        return Err(RagError::InvalidParameter {
            mode: config.mode().to_string(),
            parameter: "query".to_string(),
            reason: "query cannot be empty".to_string(),
        });
    }

    debug!(
        "Executing {} retrieval on collection '{}' with model {}",
        config.mode(),
        collection.name,
        collection.embedding_model
    );

    let results = backend.search(collection, query, config).await?;

    info!(
        "{} retrieval on '{}' returned {} chunks",
        config.mode(),
        collection.name,
        results.len()
    );
    Ok(results)
}
