use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("{what} not found: {name}")]
    NotFound { what: &'static str, name: String },

    #[error(
        "Collection '{collection}' already uses embedding model '{existing}' (requested '{requested}')"
    )]
    DuplicateCollection {
        collection: String,
        existing: String,
        requested: String,
    },

    #[error("Database already exists: {0}")]
    DatabaseExists(String),

    #[error("Invalid parameter for {mode}: {parameter} ({reason})")]
    InvalidParameter {
        mode: String,
        parameter: String,
        reason: String,
    },

    #[error("Unknown retrieval mode: {0} (expected top_k, similarity_threshold or mmr)")]
    UnknownMode(String),

    #[error("Corrupt state in {}: {reason}", path.display())]
    CorruptState { path: PathBuf, reason: String },

    #[error("{service} failure: {message}")]
    External {
        service: ExternalService,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Third-party collaborators whose failures are passed through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalService {
    VectorStore,
    Embedding,
    LanguageModel,
    Http,
}

impl fmt::Display for ExternalService {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::VectorStore => "Vector store",
            Self::Embedding => "Embedding service",
            Self::LanguageModel => "Language model",
            Self::Http => "HTTP",
        };
        f.write_str(name)
    }
}

impl RagError {
    #[inline]
    pub fn vector_store(message: impl fmt::Display) -> Self {
        Self::External {
            service: ExternalService::VectorStore,
            message: message.to_string(),
        }
    }

    #[inline]
    pub fn embedding(message: impl fmt::Display) -> Self {
        Self::External {
            service: ExternalService::Embedding,
            message: message.to_string(),
        }
    }

    #[inline]
    pub fn language_model(message: impl fmt::Display) -> Self {
        Self::External {
            service: ExternalService::LanguageModel,
            message: message.to_string(),
        }
    }

    #[inline]
    pub fn http(message: impl fmt::Display) -> Self {
        Self::External {
            service: ExternalService::Http,
            message: message.to_string(),
        }
    }

    /// Input problems the caller can fix and retry without operator help.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::DuplicateCollection { .. }
                | Self::DatabaseExists(_)
                | Self::InvalidParameter { .. }
                | Self::UnknownMode(_)
        )
    }
}

pub mod chat;
pub mod commands;
pub mod config;
pub mod database;
pub mod document;
pub mod embeddings;
pub mod ingest;
pub mod loaders;
pub mod registry;
pub mod retrieval;
