// Collection registry
// Tracks which embedding model produced the vectors of each collection in a database


use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::{RagError, Result};

/// Name of the registry file inside every database directory
pub const REGISTRY_FILE_NAME: &str = "collection_embedding_map.json";

pub use crate::database::lancedb::MAX_COLLECTION_NAME_BYTES;

/// A collection together with the embedding model that owns its vectors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub name: String,
    pub embedding_model: String,
}

/// Mapping from collection name to the embedding model identifier used for it.
///
/// Embeddings are not self-describing: querying a collection with a different
/// model than the one that indexed it yields meaningless scores rather than an
/// error, so every query path goes through [`CollectionRegistry::resolve`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionRegistry {
    entries: BTreeMap<String, String>,
}

impl CollectionRegistry {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn contains(&self, collection: &str) -> bool {
        self.entries.contains_key(collection)
    }

    /// Collection names and their models, sorted by collection name
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, model)| (name.as_str(), model.as_str()))
    }

    /// Return a registry with `collection` bound to `embedding_model`.
    ///
    /// Re-assigning the model a collection already has is a no-op. Binding a
    /// collection to a different model fails with
    /// [`RagError::DuplicateCollection`] and leaves `self` untouched.
    #[inline]
    pub fn assign(&self, collection: &str, embedding_model: &str) -> Result<Self> {
        validate_collection_name(collection)?;

        let model = embedding_model.trim();
        if model.is_empty() {
            return Err(RagError::InvalidParameter {
                mode: "embedding model".to_string(),
                parameter: format!("'{}'", embedding_model),
                reason: format!("collection '{}' needs a non-empty model name", collection),
            });
        }

        match self.entries.get(collection) {
            Some(existing) if existing == model => Ok(self.clone()),
            Some(existing) => Err(RagError::DuplicateCollection {
                collection: collection.to_string(),
                existing: existing.clone(),
                requested: model.to_string(),
            }),
            None => {
                let mut entries = self.entries.clone();
                entries.insert(collection.to_string(), model.to_string());
                Ok(Self { entries })
            }
        }
    }

    /// Look up the embedding model of `collection`.
    #[inline]
    pub fn resolve(&self, collection: &str) -> Result<&str> {
        self.entries
            .get(collection)
            .map(String::as_str)
            .ok_or_else(|| RagError::NotFound {
                what: "Embedding model for collection",
                name: collection.to_string(),
            })
    }

    /// Resolve `name` into a [`Collection`] handle usable for queries and ingestion
    #[inline]
    pub fn collection(&self, name: &str) -> Result<Collection> {
        let embedding_model = self.resolve(name)?;
        Ok(Collection {
            name: name.to_string(),
            embedding_model: embedding_model.to_string(),
        })
    }
}

impl FromIterator<(String, String)> for CollectionRegistry {
    #[inline]
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Path of the registry file for a database directory
#[inline]
pub fn registry_path(database_path: &Path) -> PathBuf {
    database_path.join(REGISTRY_FILE_NAME)
}

/// Load the registry of a database.
///
/// A missing file is the first-use case and yields an empty registry. A file
/// that exists but cannot be read or parsed is reported as
/// [`RagError::CorruptState`] and never replaced.
#[inline]
pub fn load(database_path: &Path) -> Result<CollectionRegistry> {
    let path = registry_path(database_path);

    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("No registry at {}, starting empty", path.display());
            return Ok(CollectionRegistry::new());
        }
        Err(e) => {
            return Err(RagError::CorruptState {
                path,
                reason: format!("unreadable: {}", e),
            });
        }
    };

    let registry: CollectionRegistry =
        serde_json::from_str(&content).map_err(|e| RagError::CorruptState {
            path: path.clone(),
            reason: format!("not a JSON object of collection names to model names: {}", e),
        })?;

    debug!(
        "Loaded registry with {} collections from {}",
        registry.len(),
        path.display()
    );
    Ok(registry)
}

/// Persist the registry of a database.
///
/// Writes to a temporary file in the same directory and renames it over the
/// target, so concurrent readers see either the old or the new registry.
#[inline]
pub fn save(database_path: &Path, registry: &CollectionRegistry) -> Result<()> {
    let path = registry_path(database_path);
    let content = serde_json::to_string_pretty(registry)
        .map_err(|e| RagError::Other(anyhow::anyhow!("Failed to serialize registry: {}", e)))?;

    let mut temp = NamedTempFile::new_in(database_path)?;
    temp.write_all(content.as_bytes())?;
    temp.write_all(b"\n")?;
    temp.as_file().sync_all()?;
    temp.persist(&path).map_err(|e| RagError::Io(e.error))?;

    info!(
        "Saved registry with {} collections to {}",
        registry.len(),
        path.display()
    );
    Ok(())
}

/// Check that a collection name is usable as a registry key
#[inline]
pub fn validate_collection_name(name: &str) -> Result<()> {
    let reason = if name.trim().is_empty() {
        Some("collection name cannot be empty".to_string())
    } else if name.trim() != name {
        Some("collection name cannot start or end with whitespace".to_string())
    } else if name.len() > MAX_COLLECTION_NAME_BYTES {
        Some(format!(
            "collection name is {} bytes long, the limit is {} UTF-8 bytes",
            name.len(),
            MAX_COLLECTION_NAME_BYTES
        ))
    } else if name.chars().any(char::is_control) {
        Some("collection name cannot contain control characters".to_string())
    } else {
        None
    };

    match reason {
        Some(reason) => Err(RagError::InvalidParameter {
            mode: "collection name".to_string(),
            parameter: format!("'{}'", name),
            reason,
        }),
        None => Ok(()),
    }
}
