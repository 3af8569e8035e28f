//! In-memory metadata index
//!
//! Records live in a `DashMap`, so upserts and deletes on different uris
//! proceed in parallel and same-uri writes are last-write-wins. Nothing
//! survives the process.

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

use crate::error::Result;
use crate::keymap::ObjectPath;
use crate::store::{descendant_prefix, normalize_record, FileRecord, MetadataStore};

#[derive(Default)]
pub struct MemoryMetadataStore {
    records: DashMap<String, FileRecord>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn get(&self, uri: &str) -> Result<Option<FileRecord>> {
        let uri = ObjectPath::parse(uri)?.uri();
        Ok(self.records.get(&uri).map(|r| r.clone()))
    }

    async fn upsert(&self, record: FileRecord) -> Result<()> {
        let record = normalize_record(record)?;
        trace!("memory index upsert: {}", record.uri);
        self.records.insert(record.uri.clone(), record);
        Ok(())
    }

    async fn delete(&self, uri: &str) -> Result<()> {
        let uri = ObjectPath::parse(uri)?.uri();
        self.records.remove(&uri);
        Ok(())
    }

    async fn list_children(&self, uri: &str) -> Result<Vec<FileRecord>> {
        let prefix = descendant_prefix(&ObjectPath::parse(uri)?);
        let mut children: Vec<FileRecord> = self
            .records
            .iter()
            .filter(|entry| {
                entry
                    .key()
                    .strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
            })
            .map(|entry| entry.value().clone())
            .collect();
        children.sort_by(|a, b| a.uri.cmp(&b.uri));
        Ok(children)
    }

    async fn count_descendants(&self, uri: &str) -> Result<u64> {
        let prefix = descendant_prefix(&ObjectPath::parse(uri)?);
        let count = self
            .records
            .iter()
            .filter(|entry| entry.key().len() > prefix.len() && entry.key().starts_with(&prefix))
            .count();
        Ok(count as u64)
    }

    async fn replace_all(&self, records: Vec<FileRecord>) -> Result<()> {
        let records = records
            .into_iter()
            .map(normalize_record)
            .collect::<Result<Vec<_>>>()?;

        self.records.clear();
        for record in records {
            self.records.insert(record.uri.clone(), record);
        }
        Ok(())
    }

    async fn len(&self) -> Result<u64> {
        Ok(self.records.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio_test::block_on(f)
    }

    #[test]
    fn test_get_normalizes_uri() {
        let store = MemoryMetadataStore::new();
        block_on(store.upsert(FileRecord::file("public://a/b.txt", 3, 10, ""))).unwrap();

        let record = block_on(store.get("public:///a//b.txt")).unwrap().unwrap();
        assert_eq!(record.uri, "public://a/b.txt");
        assert_eq!(record.size, 3);
        assert!(block_on(store.get("public://a/c.txt")).unwrap().is_none());
    }

    #[test]
    fn test_upsert_replaces() {
        let store = MemoryMetadataStore::new();
        block_on(store.upsert(FileRecord::file("public://a", 1, 1, "v1"))).unwrap();
        block_on(store.upsert(FileRecord::file("public://a", 2, 2, "v2"))).unwrap();

        let record = block_on(store.get("public://a")).unwrap().unwrap();
        assert_eq!(record.version, "v2");
        assert_eq!(block_on(store.len()).unwrap(), 1);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let store = MemoryMetadataStore::new();
        block_on(store.upsert(FileRecord::directory("public://d", 1))).unwrap();
        block_on(store.delete("public://d")).unwrap();
        block_on(store.delete("public://d")).unwrap();
        assert!(block_on(store.get("public://d")).unwrap().is_none());
    }

    #[test]
    fn test_children_and_descendants() {
        let store = MemoryMetadataStore::new();
        for record in [
            FileRecord::directory("public://a", 1),
            FileRecord::directory("public://a/b", 1),
            FileRecord::file("public://a/b/c.txt", 1, 1, ""),
            FileRecord::file("public://a/d.txt", 1, 1, ""),
            FileRecord::file("public://ab.txt", 1, 1, ""),
            FileRecord::file("private://a/e.txt", 1, 1, ""),
        ] {
            block_on(store.upsert(record)).unwrap();
        }

        let children: Vec<String> = block_on(store.list_children("public://a"))
            .unwrap()
            .into_iter()
            .map(|r| r.uri)
            .collect();
        assert_eq!(children, vec!["public://a/b", "public://a/d.txt"]);

        let top: Vec<String> = block_on(store.list_children("public://"))
            .unwrap()
            .into_iter()
            .map(|r| r.uri)
            .collect();
        assert_eq!(top, vec!["public://a", "public://ab.txt"]);

        assert_eq!(block_on(store.count_descendants("public://a")).unwrap(), 3);
        assert_eq!(block_on(store.count_descendants("public://a/b/c.txt")).unwrap(), 0);
    }

    #[test]
    fn test_replace_all() {
        let store = MemoryMetadataStore::new();
        block_on(store.upsert(FileRecord::file("public://old", 1, 1, ""))).unwrap();
        block_on(store.replace_all(vec![FileRecord::directory("public://new/", 1)])).unwrap();

        assert!(block_on(store.get("public://old")).unwrap().is_none());
        assert!(block_on(store.get("public://new")).unwrap().unwrap().is_dir);
    }

    #[tokio::test]
    async fn test_concurrent_disjoint_upserts() {
        let store = Arc::new(MemoryMetadataStore::new());
        let mut handles = Vec::new();
        for i in 0..32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .upsert(FileRecord::file(format!("public://f{}", i), i, i, ""))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(store.len().await.unwrap(), 32);
    }
}
