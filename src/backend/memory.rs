//! In-memory object backend
//!
//! Keeps objects in a `DashMap` and can imitate the behaviour of a real
//! object store that matters to the engine: object versions, a
//! read-after-write lag on HEAD, and injected failures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::stream;
use tracing::trace;

use crate::backend::{
    encode_key_path, ObjectAcl, ObjectBackend, ObjectMetadata, ObjectStream, ObjectSummary,
    PresignOptions, PutObjectRequest,
};
use crate::error::{S3fsError, Result};

/// A stored object with the attributes it was uploaded with
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Bytes,
    pub last_modified: u64,
    pub version: Option<String>,
    pub content_type: Option<String>,
    pub acl: Option<ObjectAcl>,
    pub cache_control: Option<String>,
    pub server_side_encryption: Option<String>,
    pub metadata: HashMap<String, String>,
}

pub struct MemoryBackend {
    bucket: String,
    base_url: String,
    objects: DashMap<String, StoredObject>,
    versioning: bool,
    next_version: AtomicU64,
    /// Number of HEADs a freshly written key stays invisible for
    visibility_lag: u32,
    invisible_for: DashMap<String, u32>,
    head_calls: DashMap<String, u32>,
    failing_heads: AtomicU32,
    fail_writes: AtomicBool,
}

impl MemoryBackend {
    pub fn new(bucket: impl Into<String>) -> Self {
        let bucket = bucket.into();
        let base_url = format!("https://{}.s3.memory.test", bucket);
        Self {
            bucket,
            base_url,
            objects: DashMap::new(),
            versioning: false,
            next_version: AtomicU64::new(1),
            visibility_lag: 0,
            invisible_for: DashMap::new(),
            head_calls: DashMap::new(),
            failing_heads: AtomicU32::new(0),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Assign `v1`, `v2`, ... to every write
    pub fn with_versioning(mut self) -> Self {
        self.versioning = true;
        self
    }

    /// Hide each written object from the next `heads` HEAD requests
    pub fn with_visibility_lag(mut self, heads: u32) -> Self {
        self.visibility_lag = heads;
        self
    }

    /// Fail the next `count` HEAD requests with a backend error
    pub fn fail_heads(&self, count: u32) {
        self.failing_heads.store(count, Ordering::SeqCst);
    }

    /// Make puts, copies and deletes fail until reset
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of HEAD requests issued for `key`
    pub fn head_calls(&self, key: &str) -> u32 {
        self.head_calls.get(key).map(|c| *c).unwrap_or(0)
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.get(key).map(|o| o.clone())
    }

    /// All stored keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Store an object directly, bypassing lag and failure injection
    pub fn insert(&self, key: impl Into<String>, body: Bytes) {
        let version = self.assign_version();
        self.objects.insert(
            key.into(),
            StoredObject {
                body,
                last_modified: now_secs(),
                version,
                content_type: None,
                acl: None,
                cache_control: None,
                server_side_encryption: None,
                metadata: HashMap::new(),
            },
        );
    }

    fn assign_version(&self) -> Option<String> {
        self.versioning
            .then(|| format!("v{}", self.next_version.fetch_add(1, Ordering::SeqCst)))
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(S3fsError::Backend("injected write failure".to_string()))
        } else {
            Ok(())
        }
    }

    fn mark_written(&self, key: &str) {
        if self.visibility_lag > 0 {
            self.invisible_for
                .insert(key.to_string(), self.visibility_lag);
        }
    }
}

fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectMetadata>> {
        *self.head_calls.entry(key.to_string()).or_insert(0) += 1;

        let failing = self
            .failing_heads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(S3fsError::Backend(format!(
                "injected HEAD failure for {}",
                key
            )));
        }

        if let Some(mut remaining) = self.invisible_for.get_mut(key) {
            if *remaining > 0 {
                *remaining -= 1;
                trace!("memory head: key={} still invisible", key);
                return Ok(None);
            }
        }

        Ok(self.objects.get(key).map(|o| ObjectMetadata {
            size: o.body.len() as u64,
            last_modified: o.last_modified,
            version: o.version.clone(),
            content_type: o.content_type.clone(),
        }))
    }

    async fn put_object(&self, request: PutObjectRequest) -> Result<()> {
        self.check_writable()?;
        let version = self.assign_version();
        self.objects.insert(
            request.key.clone(),
            StoredObject {
                body: request.body,
                last_modified: now_secs(),
                version,
                content_type: request.content_type,
                acl: request.acl,
                cache_control: request.cache_control,
                server_side_encryption: request.server_side_encryption,
                metadata: request.metadata,
            },
        );
        self.mark_written(&request.key);
        Ok(())
    }

    async fn copy_object(
        &self,
        copy_source: &str,
        key: &str,
        acl: Option<ObjectAcl>,
    ) -> Result<()> {
        self.check_writable()?;
        let source_key = copy_source
            .strip_prefix(&self.bucket)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| {
                S3fsError::Backend(format!("copy source {} is not in this bucket", copy_source))
            })?;

        let mut copy = self
            .objects
            .get(source_key)
            .map(|o| o.clone())
            .ok_or_else(|| S3fsError::Backend(format!("NoSuchKey: {}", source_key)))?;
        copy.version = self.assign_version();
        copy.last_modified = now_secs();
        copy.acl = acl;

        self.objects.insert(key.to_string(), copy);
        self.mark_written(key);
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.check_writable()?;
        self.objects.remove(key);
        self.invisible_for.remove(key);
        Ok(())
    }

    fn list_objects(&self, prefix: &str) -> ObjectStream {
        let mut listing: Vec<ObjectSummary> = self
            .objects
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| ObjectSummary {
                key: e.key().clone(),
                size: e.body.len() as u64,
                last_modified: e.last_modified,
            })
            .collect();
        listing.sort_by(|a, b| a.key.cmp(&b.key));

        Box::pin(stream::iter(listing.into_iter().map(Ok)))
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, encode_key_path(key))
    }

    async fn presigned_get_url(&self, key: &str, options: PresignOptions) -> Result<String> {
        let mut url = format!(
            "{}?X-Amz-Expires={}",
            self.object_url(key),
            options.expires.as_secs()
        );
        if let Some(disposition) = &options.response_content_disposition {
            url.push_str("&response-content-disposition=");
            url.push_str(&urlencoding::encode(disposition));
        }
        if let Some(version) = &options.version_id {
            url.push_str("&versionId=");
            url.push_str(&urlencoding::encode(version));
        }
        url.push_str("&X-Amz-Signature=memory");
        Ok(url)
    }
}
