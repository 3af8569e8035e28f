pub mod memory;
pub mod s3;

use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use crate::error::Result;

/// Metadata returned by a HEAD request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub size: u64,
    /// Last-modified instant in unix seconds
    pub last_modified: u64,
    /// Object version, when the bucket is versioned
    pub version: Option<String>,
    pub content_type: Option<String>,
}

/// One entry of a bucket listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: u64,
}

/// Canned ACLs the engine applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectAcl {
    Private,
    PublicRead,
}

/// Upload parameters; hooks may rewrite any field before submission
#[derive(Debug, Clone)]
pub struct PutObjectRequest {
    pub key: String,
    pub body: Bytes,
    pub content_type: Option<String>,
    pub acl: Option<ObjectAcl>,
    pub cache_control: Option<String>,
    pub server_side_encryption: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl PutObjectRequest {
    pub fn new(key: impl Into<String>, body: Bytes) -> Self {
        Self {
            key: key.into(),
            body,
            content_type: None,
            acl: None,
            cache_control: None,
            server_side_encryption: None,
            metadata: HashMap::new(),
        }
    }
}

/// Parameters signed into a presigned GET URL
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresignOptions {
    pub expires: Duration,
    /// `response-content-disposition` override
    pub response_content_disposition: Option<String>,
    pub version_id: Option<String>,
}

/// Stream type for bucket listings
pub type ObjectStream = Pin<Box<dyn Stream<Item = Result<ObjectSummary>> + Send>>;

/// Narrow object-store client consumed by the engine
///
/// Keys passed here never include the bucket name; the only exception is
/// the `copy_source` of `copy_object`, which is `bucket/key` as S3 expects.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Bucket this backend operates on
    fn bucket(&self) -> &str;

    /// HEAD an object; `None` if it doesn't exist
    async fn head_object(&self, key: &str) -> Result<Option<ObjectMetadata>>;

    /// Check if an object exists
    ///
    /// Default implementation uses head_object()
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.head_object(key).await?.is_some())
    }

    /// Upload a whole object
    async fn put_object(&self, request: PutObjectRequest) -> Result<()>;

    /// Server-side copy of `copy_source` (`bucket/key`) to `key`
    async fn copy_object(&self, copy_source: &str, key: &str, acl: Option<ObjectAcl>)
        -> Result<()>;

    /// Delete an object; deleting a missing key succeeds
    async fn delete_object(&self, key: &str) -> Result<()>;

    /// Delete several objects
    ///
    /// Default implementation deletes one key at a time
    async fn delete_objects(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.delete_object(key).await?;
        }
        Ok(())
    }

    /// List every object under `prefix`, following pagination
    fn list_objects(&self, prefix: &str) -> ObjectStream;

    /// Plain (unsigned) URL of an object; no network access
    fn object_url(&self, key: &str) -> String;

    /// Presigned GET URL
    async fn presigned_get_url(&self, key: &str, options: PresignOptions) -> Result<String>;
}

/// Percent-encode each segment of a key, keeping the `/` separators
pub fn encode_key_path(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
