
pub mod mmr;

use super::{EmbeddedChunk, collection_name, table_name};
use crate::database::Database;
use crate::document::{Metadata, MetadataValue, SOURCE_KEY};
use crate::embeddings::Embedder;
use crate::embeddings::chunking::CHUNK_INDEX_KEY;
use crate::registry::Collection;
use crate::retrieval::{RetrievalConfig, RetrievedChunk, SearchBackend};
use crate::{RagError, Result};
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType, Table,
    query::{ExecutableQuery, QueryBase},
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Vector database store using LanceDB, one table per collection
pub struct VectorStore {
    connection: Connection,
    database: String,
}

/// A stored chunk as read back from a search
#[derive(Debug, Clone)]
struct SearchHit {
    content: String,
    metadata: Metadata,
    vector: Vec<f32>,
    similarity: f32,
}

impl VectorStore {
    /// Connect to the LanceDB data that lives in the database directory
    #[inline]
    pub async fn open(database: &Database) -> Result<Self> {
        let uri = format!("file://{}", database.path().display());
        debug!("Connecting to LanceDB at {}", uri);

        let connection = lancedb::connect(&uri).execute().await.map_err(|e| {
            RagError::vector_store(format!(
                "Failed to connect to LanceDB for database '{}': {}",
                database.name(),
                e
            ))
        })?;

        Ok(Self {
            connection,
            database: database.name().to_string(),
        })
    }

    /// Collections that have a table, i.e. have had chunks ingested
    #[inline]
    pub async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .table_names()
            .await?
            .iter()
            .filter_map(|table| collection_name(table))
            .collect();
        names.sort();
        Ok(names)
    }

    #[inline]
    pub async fn has_collection(&self, collection: &str) -> Result<bool> {
        Ok(self.table_names().await?.contains(&table_name(collection)))
    }

    /// Number of stored chunks; a collection without a table has none
    #[inline]
    pub async fn count(&self, collection: &str) -> Result<usize> {
        let Some(table) = self.open_table(collection).await? else {
            return Ok(0);
        };

        table
            .count_rows(None)
            .await
            .map_err(|e| RagError::vector_store(format!("Failed to count rows: {}", e)))
    }

    /// Store embedded chunks, creating the collection's table on first insert.
    ///
    /// Every vector must have the table's dimension.
    #[inline]
    pub async fn add_chunks(&self, collection: &str, chunks: Vec<EmbeddedChunk>) -> Result<usize> {
        let Some(first) = chunks.first() else {
            debug!("No chunks to store");
            return Ok(0);
        };

        let dimension = first.vector.len();
        if dimension == 0 {
            return Err(RagError::vector_store("Refusing to store empty vectors"));
        }
        if let Some(bad) = chunks.iter().find(|c| c.vector.len() != dimension) {
            return Err(RagError::vector_store(format!(
                "Inconsistent vector dimensions in batch: {} vs {}",
                dimension,
                bad.vector.len()
            )));
        }

        let table = match self.open_table(collection).await? {
            Some(table) => {
                let existing = table_dimension(&table).await?;
                if existing != dimension {
                    return Err(RagError::vector_store(format!(
                        "Collection '{}' stores {}-dimensional vectors, got {}",
                        collection, existing, dimension
                    )));
                }
                table
            }
            None => {
                info!(
                    "Creating table for collection '{}' in database '{}' ({} dimensions)",
                    collection, self.database, dimension
                );
                self.connection
                    .create_empty_table(table_name(collection), create_schema(dimension))
                    .execute()
                    .await
                    .map_err(|e| {
                        RagError::vector_store(format!("Failed to create table: {}", e))
                    })?
            }
        };

        let record_batch = create_record_batch(&chunks, dimension)?;
        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| RagError::vector_store(format!("Failed to insert chunks: {}", e)))?;

        info!(
            "Stored {} chunks in collection '{}'",
            chunks.len(),
            collection
        );
        Ok(chunks.len())
    }

    /// Delete every chunk whose `source` matches; returns how many were removed
    #[inline]
    pub async fn delete_by_source(&self, collection: &str, source: &str) -> Result<usize> {
        let Some(table) = self.open_table(collection).await? else {
            return Ok(0);
        };

        let before = table
            .count_rows(None)
            .await
            .map_err(|e| RagError::vector_store(format!("Failed to count rows: {}", e)))?;

        let predicate = format!("source = '{}'", source.replace('\'', "''"));
        table
            .delete(&predicate)
            .await
            .map_err(|e| RagError::vector_store(format!("Failed to delete chunks: {}", e)))?;

        let after = table
            .count_rows(None)
            .await
            .map_err(|e| RagError::vector_store(format!("Failed to count rows: {}", e)))?;

        let removed = before.saturating_sub(after);
        debug!(
            "Deleted {} chunks for source {} from collection '{}'",
            removed, source, collection
        );
        Ok(removed)
    }

    /// Run a retrieval configuration against an already embedded query
    #[inline]
    pub async fn search_vector(
        &self,
        collection: &str,
        query_vector: &[f32],
        config: &RetrievalConfig,
    ) -> Result<Vec<RetrievedChunk>> {
        let Some(table) = self.open_table(collection).await? else {
            debug!("Collection '{}' has no table yet", collection);
            return Ok(Vec::new());
        };

        let dimension = table_dimension(&table).await?;
        if dimension != query_vector.len() {
            return Err(RagError::vector_store(format!(
                "Query vector has {} dimensions but collection '{}' stores {}",
                query_vector.len(),
                collection,
                dimension
            )));
        }

        let hits = match *config {
            RetrievalConfig::TopK { k } => nearest(&table, query_vector, k).await?,
            RetrievalConfig::SimilarityThreshold { min_score } => {
                let total = table
                    .count_rows(None)
                    .await
                    .map_err(|e| RagError::vector_store(format!("Failed to count rows: {}", e)))?;
                nearest(&table, query_vector, total)
                    .await?
                    .into_iter()
                    .filter(|hit| hit.similarity >= min_score)
                    .collect()
            }
            RetrievalConfig::Mmr => {
                let candidates = nearest(&table, query_vector, mmr::DEFAULT_FETCH_K).await?;
                let vectors: Vec<Vec<f32>> =
                    candidates.iter().map(|hit| hit.vector.clone()).collect();
                let order = mmr::maximal_marginal_relevance(
                    query_vector,
                    &vectors,
                    mmr::DEFAULT_LAMBDA,
                    mmr::DEFAULT_K,
                );
                order
                    .into_iter()
                    .filter_map(|index| candidates.get(index).cloned())
                    .collect()
            }
        };

        debug!(
            "{} search on collection '{}' produced {} chunks",
            config.mode(),
            collection,
            hits.len()
        );

        Ok(hits
            .into_iter()
            .map(|hit| RetrievedChunk {
                content: hit.content,
                metadata: hit.metadata,
                score: Some(hit.similarity),
            })
            .collect())
    }

    async fn table_names(&self) -> Result<Vec<String>> {
        self.connection
            .table_names()
            .execute()
            .await
            .map_err(|e| RagError::vector_store(format!("Failed to list tables: {}", e)))
    }

    async fn open_table(&self, collection: &str) -> Result<Option<Table>> {
        let name = table_name(collection);
        if !self.table_names().await?.contains(&name) {
            return Ok(None);
        }

        self.connection
            .open_table(&name)
            .execute()
            .await
            .map(Some)
            .map_err(|e| RagError::vector_store(format!("Failed to open table: {}", e)))
    }
}

/// Search backend that embeds the query with the collection's model before searching
pub struct VectorSearcher<'a, E: Embedder + ?Sized> {
    store: &'a VectorStore,
    embedder: &'a E,
}

impl<'a, E: Embedder + ?Sized> VectorSearcher<'a, E> {
    #[inline]
    pub fn new(store: &'a VectorStore, embedder: &'a E) -> Self {
        Self { store, embedder }
    }
}

#[async_trait]
impl<E: Embedder + ?Sized> SearchBackend for VectorSearcher<'_, E> {
    async fn search(
        &self,
        collection: &Collection,
        query: &str,
        config: &RetrievalConfig,
    ) -> Result<Vec<RetrievedChunk>> {
        let query_vector = self
            .embedder
            .embed(&collection.embedding_model, &[query.to_string()])?
            .pop()
            .ok_or_else(|| RagError::embedding("No embedding returned for query"))?;

        self.store
            .search_vector(&collection.name, &query_vector, config)
            .await
    }
}

/// Create schema with the specified vector dimension
fn create_schema(vector_dim: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, false)),
                vector_dim as i32,
            ),
            false,
        ),
        Field::new("source", DataType::Utf8, false),
        Field::new("content", DataType::Utf8, false),
        Field::new("metadata", DataType::Utf8, false),
        Field::new("chunk_index", DataType::UInt32, false),
        Field::new("ingested_at", DataType::Utf8, false),
    ]))
}

async fn table_dimension(table: &Table) -> Result<usize> {
    let schema = table
        .schema()
        .await
        .map_err(|e| RagError::vector_store(format!("Failed to get table schema: {}", e)))?;

    schema
        .fields()
        .iter()
        .find(|field| field.name() == "vector")
        .and_then(|field| match field.data_type() {
            DataType::FixedSizeList(_, size) => Some(*size as usize),
            _ => None,
        })
        .ok_or_else(|| RagError::vector_store("Could not determine vector dimension"))
}

/// Create a RecordBatch from embedded chunks
fn create_record_batch(chunks: &[EmbeddedChunk], vector_dim: usize) -> Result<RecordBatch> {
    let len = chunks.len();

    let mut ids = Vec::with_capacity(len);
    let mut sources = Vec::with_capacity(len);
    let mut contents = Vec::with_capacity(len);
    let mut metadata = Vec::with_capacity(len);
    let mut chunk_indices = Vec::with_capacity(len);
    let mut ingested_ats = Vec::with_capacity(len);
    let mut flat_values = Vec::with_capacity(len * vector_dim);

    for chunk in chunks {
        ids.push(chunk.id.as_str());
        sources.push(chunk.document.source().unwrap_or_default());
        contents.push(chunk.document.content.as_str());
        metadata.push(serde_json::to_string(&chunk.document.metadata).map_err(|e| {
            RagError::vector_store(format!("Failed to serialize chunk metadata: {}", e))
        })?);
        chunk_indices.push(match chunk.document.metadata.get(CHUNK_INDEX_KEY) {
            Some(MetadataValue::Integer(index)) => u32::try_from(*index).unwrap_or(0),
            _ => 0,
        });
        ingested_ats.push(chunk.ingested_at.as_str());
        flat_values.extend_from_slice(&chunk.vector);
    }

    let field = Arc::new(Field::new("item", DataType::Float32, false));
    let vector_array = FixedSizeListArray::try_new(
        field,
        vector_dim as i32,
        Arc::new(Float32Array::from(flat_values)),
        None,
    )
    .map_err(|e| RagError::vector_store(format!("Failed to create vector array: {}", e)))?;

    let arrays: Vec<Arc<dyn Array>> = vec![
        Arc::new(StringArray::from(ids)),
        Arc::new(vector_array),
        Arc::new(StringArray::from(sources)),
        Arc::new(StringArray::from(contents)),
        Arc::new(StringArray::from(metadata)),
        Arc::new(UInt32Array::from(chunk_indices)),
        Arc::new(StringArray::from(ingested_ats)),
    ];

    RecordBatch::try_new(create_schema(vector_dim), arrays)
        .map_err(|e| RagError::vector_store(format!("Failed to create record batch: {}", e)))
}

/// The `limit` nearest chunks by cosine distance, best first
async fn nearest(table: &Table, query_vector: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
    if limit == 0 {
        return Ok(Vec::new());
    }

    let mut results = table
        .vector_search(query_vector)
        .map_err(|e| RagError::vector_store(format!("Failed to create vector search: {}", e)))?
        .column("vector")
        .distance_type(DistanceType::Cosine)
        .limit(limit)
        .execute()
        .await
        .map_err(|e| RagError::vector_store(format!("Failed to execute search: {}", e)))?;

    let mut hits = Vec::new();
    while let Some(batch) = results
        .try_next()
        .await
        .map_err(|e| RagError::vector_store(format!("Failed to read result stream: {}", e)))?
    {
        hits.extend(parse_search_batch(&batch)?);
    }

    hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    Ok(hits)
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::vector_store(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| RagError::vector_store(format!("Invalid {} column type", name)))
}

/// Parse a single record batch from search results
fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<SearchHit>> {
    let contents = string_column(batch, "content")?;
    let metadata = string_column(batch, "metadata")?;
    let sources = string_column(batch, "source")?;

    let vectors = batch
        .column_by_name("vector")
        .ok_or_else(|| RagError::vector_store("Missing vector column"))?
        .as_any()
        .downcast_ref::<FixedSizeListArray>()
        .ok_or_else(|| RagError::vector_store("Invalid vector column type"))?;

    let distances = batch
        .column_by_name("_distance")
        .ok_or_else(|| RagError::vector_store("Search results have no _distance column"))?
        .as_any()
        .downcast_ref::<Float32Array>()
        .ok_or_else(|| RagError::vector_store("Invalid _distance column type"))?;

    let mut hits = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let mut row_metadata: Metadata = serde_json::from_str(metadata.value(row))
            .unwrap_or_else(|e| {
                warn!("Ignoring unreadable metadata in stored chunk: {}", e);
                Metadata::new()
            });
        row_metadata
            .entry(SOURCE_KEY.to_string())
            .or_insert_with(|| MetadataValue::from(sources.value(row)));

        let values = vectors.value(row);
        let vector = values
            .as_any()
            .downcast_ref::<Float32Array>()
            .map(|v| v.values().to_vec())
            .unwrap_or_default();

        if distances.is_null(row) {
            return Err(RagError::vector_store(format!(
                "Search result {} has no distance",
                row
            )));
        }
        let distance = distances.value(row);

        hits.push(SearchHit {
            content: contents.value(row).to_string(),
            metadata: row_metadata,
            vector,
            similarity: 1.0 - distance,
        });
    }

    Ok(hits)
}
