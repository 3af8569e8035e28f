//! Common test utilities and fixtures
//!
//! `TestHarness` wires the engine, flush coordinator and URL policy to an
//! in-memory backend, so every test gets a private bucket. The index is
//! in memory by default; `HarnessBuilder::sqlite` swaps in a SQLite file
//! in a temporary directory.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use s3fs::backend::memory::MemoryBackend;
use s3fs::config::Config;
use s3fs::flush::FlushCoordinator;
use s3fs::fs::DirectoryEngine;
use s3fs::store::memory::MemoryMetadataStore;
use s3fs::store::sqlite::SqliteMetadataStore;
use s3fs::store::{FileRecord, MetadataStore};
use s3fs::url::UrlPolicy;
use tempfile::TempDir;

pub const BUCKET: &str = "test-bucket";

/// Base URL of objects in the memory backend
pub const BUCKET_URL: &str = "https://test-bucket.s3.memory.test";

/// Config with a short wait policy so timeouts don't slow tests down
pub fn test_config(extra: &str) -> String {
    format!(
        "bucket: {}\nwait:\n  max_attempts: 3\n  delay: 1ms\n{}",
        BUCKET, extra
    )
}

/// Which metadata index a harness is built on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IndexKind {
    #[default]
    Memory,
    Sqlite,
}

pub struct TestHarness {
    pub config: Arc<Config>,
    pub backend: Arc<MemoryBackend>,
    pub store: Arc<dyn MetadataStore>,
    pub engine: Arc<DirectoryEngine>,
    /// Holds the SQLite index file alive for the harness lifetime
    index_dir: Option<TempDir>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    pub fn flush(&self) -> FlushCoordinator {
        FlushCoordinator::new(self.engine.clone())
    }

    pub fn urls(&self) -> UrlPolicy {
        UrlPolicy::new(
            self.config.clone(),
            self.backend.clone(),
            self.store.clone(),
        )
    }

    /// Record count in the index
    pub async fn index_len(&self) -> u64 {
        self.store.len().await.expect("index len failed")
    }

    pub async fn record(&self, uri: &str) -> Option<FileRecord> {
        self.store.get(uri).await.expect("index get failed")
    }

    /// Path of the SQLite index file, if the harness uses one
    pub fn index_path(&self) -> Option<PathBuf> {
        self.index_dir.as_ref().map(|dir| dir.path().join(INDEX_FILE))
    }
}

const INDEX_FILE: &str = "index.db";

#[derive(Default)]
pub struct HarnessBuilder {
    extra_config: String,
    versioning: bool,
    visibility_lag: u32,
    index: IndexKind,
}

impl HarnessBuilder {
    /// Extra YAML appended to the base test config
    pub fn config(mut self, yaml: &str) -> Self {
        self.extra_config.push_str(yaml);
        self.extra_config.push('\n');
        self
    }

    pub fn versioned(mut self) -> Self {
        self.versioning = true;
        self
    }

    pub fn visibility_lag(mut self, heads: u32) -> Self {
        self.visibility_lag = heads;
        self
    }

    pub fn index(mut self, kind: IndexKind) -> Self {
        self.index = kind;
        self
    }

    /// Back the engine with a SQLite index in a temporary directory
    pub fn sqlite(self) -> Self {
        self.index(IndexKind::Sqlite)
    }

    pub fn build(self) -> TestHarness {
        let config = Arc::new(
            Config::from_str(&test_config(&self.extra_config)).expect("invalid test config"),
        );

        let mut backend = MemoryBackend::new(BUCKET).with_visibility_lag(self.visibility_lag);
        if self.versioning {
            backend = backend.with_versioning();
        }
        let backend = Arc::new(backend);
        let (store, index_dir): (Arc<dyn MetadataStore>, Option<TempDir>) = match self.index {
            IndexKind::Memory => (Arc::new(MemoryMetadataStore::new()), None),
            IndexKind::Sqlite => {
                let dir = tempfile::tempdir().expect("failed to create index dir");
                let path = dir.path().join(INDEX_FILE);
                let store = SqliteMetadataStore::open(path.to_str().expect("non-UTF-8 temp path"))
                    .expect("failed to open SQLite index");
                (Arc::new(store), Some(dir))
            }
        };
        let engine = Arc::new(DirectoryEngine::new(
            config.clone(),
            backend.clone(),
            store.clone(),
        ));

        TestHarness {
            config,
            backend,
            store,
            engine,
            index_dir,
        }
    }
}

// ============================================================================
// Assertions
// ============================================================================

/// Assert that `uri` is a directory
pub async fn assert_dir_exists(engine: &DirectoryEngine, uri: &str) {
    let record = engine.stat(uri).await.expect("stat failed");
    assert!(
        record.as_ref().is_some_and(|r| r.is_dir),
        "Expected directory at {}, got {:?}",
        uri,
        record
    );
}

/// Assert that `uri` is a file
pub async fn assert_file_exists(engine: &DirectoryEngine, uri: &str) {
    let record = engine.stat(uri).await.expect("stat failed");
    assert!(
        record.as_ref().is_some_and(|r| !r.is_dir),
        "Expected file at {}, got {:?}",
        uri,
        record
    );
}

/// Assert that `uri` does not exist
pub async fn assert_not_exists(engine: &DirectoryEngine, uri: &str) {
    let record = engine.stat(uri).await.expect("stat failed");
    assert!(record.is_none(), "Expected {} to not exist, got {:?}", uri, record);
}

/// Assert that a directory lists exactly `expected` (any order)
pub async fn assert_dir_contains_exactly(engine: &DirectoryEngine, uri: &str, expected: &[&str]) {
    let listing = engine
        .readdir(uri)
        .await
        .expect("readdir failed")
        .unwrap_or_else(|| panic!("{} is not a directory", uri));
    let mut actual: Vec<String> = listing.collect();
    actual.sort();
    let mut expected: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
    expected.sort();
    assert_eq!(actual, expected, "Unexpected entries in {}", uri);
}
