// LanceDB vector database module
// Handles vector storage and similarity search for embedded chunks


pub mod vector_store;

use std::fmt::Write as _;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::Document;

/// Prefix for every table that backs a collection
const TABLE_PREFIX: &str = "c_";

/// LanceDB stores a table as the directory `<table>.lance`
const TABLE_DIR_SUFFIX: &str = ".lance";

/// Longest file name most filesystems accept, in bytes
const MAX_FILE_NAME_BYTES: usize = 255;

/// Longest collection name, in UTF-8 bytes, whose table directory name still fits
/// in a single file name
pub const MAX_COLLECTION_NAME_BYTES: usize =
    (MAX_FILE_NAME_BYTES - TABLE_PREFIX.len() - TABLE_DIR_SUFFIX.len()) / 2;

/// A chunk with its embedding, ready to be stored in a collection table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    /// Unique identifier for this row
    pub id: String,
    /// The vector embedding, produced by the collection's model
    pub vector: Vec<f32>,
    /// Chunk text and metadata (including `source`)
    pub document: Document,
    /// RFC 3339 timestamp of ingestion
    pub ingested_at: String,
}

impl EmbeddedChunk {
    #[inline]
    pub fn new(document: Document, vector: Vec<f32>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            vector,
            document,
            ingested_at: Utc::now().to_rfc3339(),
        }
    }
}

/// LanceDB table name for a collection.
///
/// Collection names are free text, so the table name is a lowercase hex
/// encoding of the UTF-8 bytes, which is always a valid table identifier.
#[inline]
pub fn table_name(collection: &str) -> String {
    let mut name = String::with_capacity(TABLE_PREFIX.len() + collection.len() * 2);
    name.push_str(TABLE_PREFIX);
    for byte in collection.bytes() {
        // Writing to a String cannot fail
        let _ = write!(name, "{:02x}", byte);
    }
    name
}

/// Collection name encoded by `table`, or `None` if it is not a collection table
#[inline]
pub fn collection_name(table: &str) -> Option<String> {
    let hex = table.strip_prefix(TABLE_PREFIX)?;
    if hex.is_empty() || hex.len() % 2 != 0 {
        return None;
    }

    let bytes = (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;

    String::from_utf8(bytes).ok()
}
