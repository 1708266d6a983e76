// Ingestion pipeline
// Load, split, embed and store documents into one or more collections


use std::collections::BTreeSet;
use std::fmt;

use itertools::Itertools;
use tracing::{debug, info};

use crate::database::Database;
use crate::database::lancedb::EmbeddedChunk;
use crate::database::lancedb::vector_store::VectorStore;
use crate::document::Document;
use crate::embeddings::Embedder;
use crate::embeddings::chunking::{ChunkingConfig, split_documents};
use crate::loaders::HttpFetcher;
use crate::registry::Collection;
use crate::{RagError, Result};

/// Where documents come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A single web page
    Page(String),
    /// Every page listed by a sitemap
    Sitemap(String),
}

impl fmt::Display for Source {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Page(url) => write!(f, "page {}", url),
            Self::Sitemap(url) => write!(f, "sitemap {}", url),
        }
    }
}

impl Source {
    /// Fetch the documents this source refers to
    #[inline]
    pub fn load(&self, fetcher: &HttpFetcher) -> Result<Vec<Document>> {
        match self {
            Self::Page(url) => Ok(vec![fetcher.load_page(url)?]),
            Self::Sitemap(url) => fetcher.load_sitemap(url),
        }
    }
}

/// Chunks written to one collection by an ingest run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub collection: String,
    pub embedding_model: String,
    /// Chunks stored
    pub chunks: usize,
    /// Previously stored chunks replaced because they came from the same source
    pub replaced: usize,
}

/// Stores documents into collections, embedding each with its collection's model
pub struct Ingestor<'a, E: Embedder + ?Sized> {
    store: &'a VectorStore,
    embedder: &'a E,
    chunking: &'a ChunkingConfig,
}

impl<'a, E: Embedder + ?Sized> Ingestor<'a, E> {
    #[inline]
    pub fn new(store: &'a VectorStore, embedder: &'a E, chunking: &'a ChunkingConfig) -> Self {
        Self {
            store,
            embedder,
            chunking,
        }
    }

    /// Resolve the targets, load `source`, and store it in every target collection.
    ///
    /// All collection names are resolved against the registry before anything
    /// is fetched, so an unknown collection aborts without side effects.
    #[inline]
    pub async fn ingest(
        &self,
        database: &Database,
        collections: &[String],
        source: &Source,
        fetcher: &HttpFetcher,
    ) -> Result<Vec<IngestReport>> {
        let targets = resolve_targets(database, collections)?;

        info!(
            "Ingesting {} into {} of database '{}'",
            source,
            targets.iter().map(|c| c.name.as_str()).join(", "),
            database.name()
        );

        let documents = source.load(fetcher)?;
        self.ingest_documents(&targets, &documents).await
    }

    /// Split `documents` and store the chunks in each collection.
    ///
    /// Chunks already stored for the same `source` are replaced.
    #[inline]
    pub async fn ingest_documents(
        &self,
        collections: &[Collection],
        documents: &[Document],
    ) -> Result<Vec<IngestReport>> {
        let chunks = split_documents(documents, self.chunking);
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let sources: BTreeSet<&str> = documents.iter().filter_map(Document::source).collect();

        debug!(
            "Split {} documents into {} chunks",
            documents.len(),
            chunks.len()
        );

        let mut reports = Vec::with_capacity(collections.len());
        for collection in collections {
            let vectors = if texts.is_empty() {
                Vec::new()
            } else {
                self.embedder.embed(&collection.embedding_model, &texts)?
            };

            if vectors.len() != chunks.len() {
                return Err(RagError::embedding(format!(
                    "Model '{}' returned {} embeddings for {} chunks",
                    collection.embedding_model,
                    vectors.len(),
                    chunks.len()
                )));
            }

            let mut replaced = 0;
            for source in &sources {
                replaced += self.store.delete_by_source(&collection.name, source).await?;
            }

            let records: Vec<EmbeddedChunk> = chunks
                .iter()
                .cloned()
                .zip(vectors)
                .map(|(document, vector)| EmbeddedChunk::new(document, vector))
                .collect();
            let stored = self.store.add_chunks(&collection.name, records).await?;

            info!(
                "Collection '{}': stored {} chunks with {} ({} replaced)",
                collection.name, stored, collection.embedding_model, replaced
            );
            reports.push(IngestReport {
                collection: collection.name.clone(),
                embedding_model: collection.embedding_model.clone(),
                chunks: stored,
                replaced,
            });
        }

        Ok(reports)
    }
}

/// Look up every named collection, failing on the first unknown one.
/// Duplicate names are ingested once.
#[inline]
pub fn resolve_targets(database: &Database, collections: &[String]) -> Result<Vec<Collection>> {
    if collections.is_empty() {
        return Err(RagError::InvalidParameter {
            mode: "ingest".to_string(),
            parameter: "collections".to_string(),
            reason: "at least one collection is required".to_string(),
        });
    }

    let registry = database.load_registry()?;
    collections
        .iter()
        .unique()
        .map(|name| registry.collection(name))
        .collect()
}
