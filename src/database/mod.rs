// Database module
// A database is a `data_<name>` directory holding LanceDB tables and the collection registry


pub mod lancedb;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::registry::{self, CollectionRegistry};
use crate::{RagError, Result};

/// Directory name prefix that marks a database
pub const DATABASE_PREFIX: &str = "data_";

/// Handle to a directory-backed database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Database {
    name: String,
    path: PathBuf,
}

impl Database {
    /// Create a new, empty database under `root`.
    ///
    /// Fails with [`RagError::DatabaseExists`] if the directory is already there.
    #[inline]
    #[expect(
        clippy::create_dir,
        reason = "the parent is created separately; an existing database must fail"
    )]
    pub fn create(root: &Path, name: &str) -> Result<Self> {
        let name = normalize_name(name);
        validate_database_name(name)?;

        fs::create_dir_all(root)?;
        let path = root.join(format!("{}{}", DATABASE_PREFIX, name));

        match fs::create_dir(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(RagError::DatabaseExists(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        let database = Self {
            name: name.to_string(),
            path,
        };
        database.save_registry(&CollectionRegistry::new())?;

        info!(
            "Created database '{}' at {}",
            database.name,
            database.path.display()
        );
        Ok(database)
    }

    /// Open an existing database by name; `docs` and `data_docs` are equivalent
    #[inline]
    pub fn open(root: &Path, name: &str) -> Result<Self> {
        let name = normalize_name(name);
        validate_database_name(name)?;

        let path = root.join(format!("{}{}", DATABASE_PREFIX, name));
        if !path.is_dir() {
            return Err(RagError::NotFound {
                what: "Database",
                name: name.to_string(),
            });
        }

        debug!("Opened database '{}' at {}", name, path.display());
        Ok(Self {
            name: name.to_string(),
            path,
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn load_registry(&self) -> Result<CollectionRegistry> {
        registry::load(&self.path)
    }

    #[inline]
    pub fn save_registry(&self, registry: &CollectionRegistry) -> Result<()> {
        registry::save(&self.path, registry)
    }
}

fn normalize_name(name: &str) -> &str {
    let name = name.trim();
    name.strip_prefix(DATABASE_PREFIX).unwrap_or(name)
}

/// Database names become directory names, so only portable characters are allowed
#[inline]
pub fn validate_database_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !name.starts_with('.');

    if valid {
        Ok(())
    } else {
        Err(RagError::InvalidParameter {
            mode: "database name".to_string(),
            parameter: format!("'{}'", name),
            reason: "use 1-64 ASCII letters, digits, '-', '_' or '.', not starting with '.'"
                .to_string(),
        })
    }
}

/// All databases under `root`, sorted by name. A missing root has no databases.
#[inline]
pub fn list_databases(root: &Path) -> Result<Vec<Database>> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut databases = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let file_name = entry.file_name();
        let Some(name) = file_name
            .to_str()
            .and_then(|n| n.strip_prefix(DATABASE_PREFIX))
        else {
            continue;
        };
        if validate_database_name(name).is_ok() {
            databases.push(Database {
                name: name.to_string(),
                path: entry.path(),
            });
        }
    }

    databases.sort_by(|a, b| a.name.cmp(&b.name));
    debug!("Found {} databases under {}", databases.len(), root.display());
    Ok(databases)
}
