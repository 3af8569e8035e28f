pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::keymap::ObjectPath;

/// Metadata index configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IndexConfig {
    /// Index kept in process memory; lost on exit
    #[default]
    Memory,
    /// Index persisted in a SQLite database file
    Sqlite { path: String },
}

/// One row of the index: a known file or a synthesized directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub uri: String,
    pub size: u64,
    /// Creation/modification instant in unix seconds
    pub timestamp: u64,
    pub is_dir: bool,
    /// Backend version token; empty for directories or unversioned buckets
    pub version: String,
}

impl FileRecord {
    pub fn file(uri: impl Into<String>, size: u64, timestamp: u64, version: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            size,
            timestamp,
            is_dir: false,
            version: version.into(),
        }
    }

    pub fn directory(uri: impl Into<String>, timestamp: u64) -> Self {
        Self {
            uri: uri.into(),
            size: 0,
            timestamp,
            is_dir: true,
            version: String::new(),
        }
    }
}

/// Persistent path → record index
///
/// The index is the only source of truth for whether a path exists and
/// whether it is a file or a directory. Every method takes URIs in any
/// form accepted by `ObjectPath::parse` and normalizes them first.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Exact-match lookup
    async fn get(&self, uri: &str) -> Result<Option<FileRecord>>;

    /// Insert or replace the record keyed by its `uri`
    async fn upsert(&self, record: FileRecord) -> Result<()>;

    /// Remove a record; removing a missing uri succeeds
    async fn delete(&self, uri: &str) -> Result<()>;

    /// Remove several records
    ///
    /// Default implementation deletes one uri at a time
    async fn delete_many(&self, uris: &[String]) -> Result<()> {
        for uri in uris {
            self.delete(uri).await?;
        }
        Ok(())
    }

    /// Direct children of `uri`
    async fn list_children(&self, uri: &str) -> Result<Vec<FileRecord>>;

    /// Number of records anywhere below `uri`
    async fn count_descendants(&self, uri: &str) -> Result<u64>;

    /// Swap the whole index for `records`
    async fn replace_all(&self, records: Vec<FileRecord>) -> Result<()>;

    /// Total number of records
    async fn len(&self) -> Result<u64>;
}

/// Prefix that every descendant uri of `path` starts with
pub(crate) fn descendant_prefix(path: &ObjectPath) -> String {
    if path.is_root() {
        path.root_uri()
    } else {
        format!("{}/", path.uri())
    }
}

/// Canonicalize a record's uri before storing it
pub(crate) fn normalize_record(mut record: FileRecord) -> Result<FileRecord> {
    record.uri = ObjectPath::parse(&record.uri)?.uri();
    Ok(record)
}

/// Open the index selected by configuration
pub fn open_store(config: &IndexConfig) -> Result<Arc<dyn MetadataStore>> {
    match config {
        IndexConfig::Memory => {
            info!("Using in-memory metadata index");
            Ok(Arc::new(memory::MemoryMetadataStore::new()))
        }
        IndexConfig::Sqlite { path } => {
            info!("Using SQLite metadata index at {}", path);
            Ok(Arc::new(sqlite::SqliteMetadataStore::open(path)?))
        }
    }
}
