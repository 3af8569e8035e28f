//! Directory emulation over the metadata index
//!
//! The object store only knows flat keys. Directories exist solely as
//! records in the index: they are synthesized by `mkdir` and by the
//! ancestor cascade that runs whenever a file record is written. Every
//! operation here is a short sequence of independent index and backend
//! calls; none of them is atomic, and a failure part-way leaves the
//! earlier steps committed.

mod listing;

pub use listing::DirListing;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::TryStreamExt;
use tracing::{debug, info, trace, warn};

use crate::backend::{ObjectBackend, ObjectMetadata};
use crate::config::Config;
use crate::error::{S3fsError, Result};
use crate::keymap::{key_to_uri, map_to_object_key, prepend_root, ObjectPath};
use crate::store::{FileRecord, MetadataStore};
use crate::waiter::wait_until_visible;

/// Current time in unix seconds
pub(crate) fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// File record for `uri` built from backend metadata
pub(crate) fn record_from_metadata(uri: String, meta: &ObjectMetadata) -> FileRecord {
    FileRecord::file(
        uri,
        meta.size,
        meta.last_modified,
        meta.version.clone().unwrap_or_default(),
    )
}

/// stat / mkdir / rmdir / rename / unlink / readdir against the index
pub struct DirectoryEngine {
    config: Arc<Config>,
    backend: Arc<dyn ObjectBackend>,
    store: Arc<dyn MetadataStore>,
}

impl DirectoryEngine {
    pub fn new(
        config: Arc<Config>,
        backend: Arc<dyn ObjectBackend>,
        store: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            config,
            backend,
            store,
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn ObjectBackend> {
        &self.backend
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    /// Backend key for a parsed path
    pub fn object_key(&self, path: &ObjectPath) -> String {
        prepend_root(&path.relative_key(&self.config), &self.config)
    }

    /// Look up a path.
    ///
    /// The scheme root is always a directory. With `ignore_cache` set,
    /// anything that isn't a cached directory is re-read from the backend
    /// and the backend answer wins.
    pub async fn stat(&self, uri: &str) -> Result<Option<FileRecord>> {
        let path = ObjectPath::parse(uri)?;
        trace!("stat: uri={}", path.uri());

        if path.is_root() {
            return Ok(Some(FileRecord::directory(path.uri(), now_secs())));
        }

        let cached = self.store.get(&path.uri()).await?;
        if !self.config.ignore_cache || cached.as_ref().is_some_and(|r| r.is_dir) {
            return Ok(cached);
        }

        let key = self.object_key(&path);
        debug!("stat: bypassing index for {} (key={})", path.uri(), key);
        let meta = self.backend.head_object(&key).await?;
        Ok(meta.map(|m| record_from_metadata(path.uri(), &m)))
    }

    /// Create a directory record.
    ///
    /// Returns `true` if `uri` is (now) a directory and `false` if it or
    /// one of its ancestors is a file; in that case nothing is written.
    ///
    /// Missing ancestors are created bottom-up up to the scheme root, the
    /// same cascade every index write runs, so `recursive` only changes
    /// how the call is logged.
    pub async fn mkdir(&self, uri: &str, recursive: bool) -> Result<bool> {
        let path = ObjectPath::parse(uri)?;
        if path.is_root() {
            return Ok(true);
        }

        if let Some(existing) = self.store.get(&path.uri()).await? {
            return Ok(existing.is_dir);
        }

        let missing = match self.missing_ancestors(&path).await? {
            Some(missing) => missing,
            None => return Ok(false),
        };
        if !recursive && !missing.is_empty() {
            debug!(
                "mkdir: {} missing ancestor(s) of {} created as well",
                missing.len(),
                path.uri()
            );
        }

        let timestamp = now_secs();
        trace!("mkdir: creating {}", path.uri());
        self.store
            .upsert(FileRecord::directory(path.uri(), timestamp))
            .await?;
        self.create_directories(missing, timestamp).await?;
        Ok(true)
    }

    /// Remove an empty directory record.
    ///
    /// Returns `false` without touching anything if `uri` is not a cached
    /// directory or still has descendants.
    pub async fn rmdir(&self, uri: &str) -> Result<bool> {
        let path = ObjectPath::parse(uri)?;
        if path.is_root() {
            return Ok(false);
        }

        match self.store.get(&path.uri()).await? {
            Some(record) if record.is_dir => {}
            _ => {
                debug!("rmdir: {} is not a directory", path.uri());
                return Ok(false);
            }
        }

        let descendants = self.store.count_descendants(&path.uri()).await?;
        if descendants > 0 {
            debug!("rmdir: {} has {} descendant(s)", path.uri(), descendants);
            return Ok(false);
        }

        let marker = format!("{}/", self.object_key(&path));
        self.backend.delete_object(&marker).await?;
        self.store.delete(&path.uri()).await?;
        Ok(true)
    }

    /// Move a file.
    ///
    /// The backend copy happens first and must become visible before the
    /// source object is deleted; only then is the record re-keyed (new
    /// record written with ancestor cascade, old key deleted). If the copy
    /// never shows up within the wait policy the call returns `false` with
    /// the source object and its record intact. Directories cannot be
    /// renamed.
    pub async fn rename(&self, from: &str, to: &str) -> Result<bool> {
        let from_path = ObjectPath::parse(from)?;
        let to_path = ObjectPath::parse(to)?;

        if from_path.is_root() || to_path.is_root() {
            return Err(S3fsError::InvalidArgument(format!(
                "cannot rename {} to {}",
                from_path.uri(),
                to_path.uri()
            )));
        }
        if from_path == to_path {
            return Ok(self.stat(&from_path.uri()).await?.is_some());
        }

        let record = match self.stat(&from_path.uri()).await? {
            Some(record) => record,
            None => {
                debug!("rename: source {} not found", from_path.uri());
                return Ok(false);
            }
        };
        if record.is_dir {
            return Err(S3fsError::NotSupported(format!(
                "renaming directory {}",
                record.uri
            )));
        }
        if let Some(existing) = self.store.get(&to_path.uri()).await? {
            if existing.is_dir {
                return Err(S3fsError::IsADirectory(existing.uri));
            }
        }

        let source = map_to_object_key(&from_path.uri(), &self.config, true)?;
        let target = self.object_key(&to_path);
        debug!("rename: {} -> {}", source, target);

        self.backend
            .copy_object(&source, &target, Some(to_path.class().default_acl()))
            .await?;

        if !wait_until_visible(self.backend.as_ref(), &target, self.config.wait).await {
            warn!(
                "rename: copy {} not visible yet; source and index left in place",
                target
            );
            return Ok(false);
        }

        let mut moved = record;
        moved.uri = to_path.uri();
        if !moved.version.is_empty() {
            // The copy is a new object version under the target key
            moved.version = match self.backend.head_object(&target).await? {
                Some(meta) => meta.version.unwrap_or_default(),
                None => {
                    warn!("rename: copy {} disappeared after becoming visible", target);
                    return Ok(false);
                }
            };
        }

        self.backend.delete_object(&self.object_key(&from_path)).await?;
        self.write_record(moved).await?;
        self.store.delete(&from_path.uri()).await?;
        Ok(true)
    }

    /// Delete a file object and its record; `false` for directories and
    /// missing paths.
    pub async fn unlink(&self, uri: &str) -> Result<bool> {
        let path = ObjectPath::parse(uri)?;

        match self.stat(&path.uri()).await? {
            Some(record) if !record.is_dir => {}
            _ => return Ok(false),
        }

        self.backend.delete_object(&self.object_key(&path)).await?;
        self.store.delete(&path.uri()).await?;
        Ok(true)
    }

    /// Snapshot of the direct children of a directory, or `None` if `uri`
    /// is not a directory.
    pub async fn readdir(&self, uri: &str) -> Result<Option<DirListing>> {
        let path = ObjectPath::parse(uri)?;

        match self.stat(&path.uri()).await? {
            Some(record) if record.is_dir => {}
            _ => return Ok(None),
        }

        let names = self
            .store
            .list_children(&path.uri())
            .await?
            .into_iter()
            .filter_map(|record| {
                ObjectPath::parse(&record.uri)
                    .ok()
                    .map(|p| p.base_name().to_string())
            })
            .collect();

        Ok(Some(DirListing::new(names)))
    }

    /// Upsert a record and make sure its ancestors exist as directories.
    ///
    /// Every ancestor up to the scheme root is checked; existing
    /// directories are skipped, missing ones are created. A file ancestor
    /// leaves the ancestors untouched and is only logged.
    pub async fn write_record(&self, record: FileRecord) -> Result<()> {
        let path = ObjectPath::parse(&record.uri)?;
        self.store.upsert(record).await?;

        match self.missing_ancestors(&path).await? {
            Some(missing) => self.create_directories(missing, now_secs()).await,
            None => {
                warn!("write_record: an ancestor of {} is a file", path.uri());
                Ok(())
            }
        }
    }

    /// Ancestors of `path` below the scheme root that have no record,
    /// nearest first. `None` if any ancestor is a file.
    async fn missing_ancestors(&self, path: &ObjectPath) -> Result<Option<Vec<ObjectPath>>> {
        let mut missing = Vec::new();
        let mut ancestor = path.parent();
        while let Some(dir) = ancestor.filter(|d| !d.is_root()) {
            match self.store.get(&dir.uri()).await? {
                Some(existing) if existing.is_dir => {}
                Some(existing) => {
                    debug!("{} is a file, not a directory", existing.uri);
                    return Ok(None);
                }
                None => missing.push(dir.clone()),
            }
            ancestor = dir.parent();
        }
        Ok(Some(missing))
    }

    async fn create_directories(&self, dirs: Vec<ObjectPath>, timestamp: u64) -> Result<()> {
        for dir in dirs {
            trace!("creating ancestor directory {}", dir.uri());
            self.store
                .upsert(FileRecord::directory(dir.uri(), timestamp))
                .await?;
        }
        Ok(())
    }

    /// Rebuild the whole index from a listing of the bucket.
    ///
    /// Objects whose key ends in `/` are folder markers. Ancestors of every
    /// listed key are synthesized as directories; where a key is listed
    /// both as a file and as a directory, the directory wins. Returns the
    /// number of records in the new index.
    pub async fn refresh_cache(&self) -> Result<u64> {
        let prefix = if self.config.root_folder.is_empty() {
            String::new()
        } else {
            format!("{}/", self.config.root_folder)
        };
        info!("Refreshing metadata index from bucket listing (prefix '{}')", prefix);

        let timestamp = now_secs();
        let mut files: HashMap<String, FileRecord> = HashMap::new();
        let mut dirs: HashSet<String> = HashSet::new();

        let mut listing = self.backend.list_objects(&prefix);
        while let Some(summary) = listing.try_next().await? {
            let uri = match key_to_uri(&summary.key, &self.config) {
                Some(uri) => uri,
                None => continue,
            };
            let path = ObjectPath::parse(&uri)?;

            let mut ancestor = if summary.key.ends_with('/') {
                Some(path.clone())
            } else if path.is_root() {
                None
            } else {
                files.insert(
                    path.uri(),
                    FileRecord::file(path.uri(), summary.size, summary.last_modified, ""),
                );
                path.parent()
            };

            while let Some(dir) = ancestor.filter(|d| !d.is_root()) {
                if !dirs.insert(dir.uri()) {
                    break;
                }
                ancestor = dir.parent();
            }
        }

        let mut records: Vec<FileRecord> = Vec::with_capacity(files.len() + dirs.len());
        for dir in dirs {
            if files.remove(&dir).is_some() {
                warn!("refresh_cache: {} is both a file and a directory", dir);
            }
            records.push(FileRecord::directory(dir, timestamp));
        }
        records.extend(files.into_values());

        let count = records.len() as u64;
        self.store.replace_all(records).await?;
        info!("Metadata index rebuilt with {} record(s)", count);
        Ok(count)
    }
}
