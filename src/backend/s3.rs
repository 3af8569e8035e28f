//! S3 backend implementation
//!
//! This backend talks to Amazon S3 or S3-compatible storage
//! (MinIO, LocalStack, etc.) through `aws-sdk-s3`.

use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectCannedAcl, ObjectIdentifier, ServerSideEncryption};
use aws_sdk_s3::Client;
use tracing::{debug, trace};

use crate::backend::{
    encode_key_path, ObjectAcl, ObjectBackend, ObjectMetadata, ObjectStream, ObjectSummary,
    PresignOptions, PutObjectRequest,
};
use crate::config::Config;
use crate::error::{S3fsError, Result};

/// Longest expiry SigV4 accepts for a presigned request
pub const MAX_PRESIGN_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// DeleteObjects accepts at most this many keys per request
const DELETE_BATCH_SIZE: usize = 1000;

const DEFAULT_REGION: &str = "us-east-1";

/// S3 backend for Amazon S3 and S3-compatible storage
pub struct S3Backend {
    client: Client,
    bucket: String,
    region: String,
    endpoint: Option<String>,
    force_path_style: bool,
    scheme: &'static str,
}

impl S3Backend {
    /// Create a new S3 backend from configuration
    pub async fn new(config: &Config) -> Result<Self> {
        let mut sdk_config_builder = aws_config::defaults(BehaviorVersion::latest());

        if let Some(region) = &config.region {
            sdk_config_builder = sdk_config_builder.region(Region::new(region.clone()));
        }

        if let Some(creds) = &config.credentials {
            sdk_config_builder = sdk_config_builder.credentials_provider(Credentials::new(
                creds.access_key.clone(),
                creds.secret_key.clone(),
                None,
                None,
                "s3fs-config",
            ));
        }

        let sdk_config = sdk_config_builder.load().await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = Client::from_conf(s3_config_builder.build());

        let region = sdk_config
            .region()
            .map(|r| r.to_string())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            region,
            endpoint: config
                .endpoint
                .as_ref()
                .map(|e| e.trim_end_matches('/').to_string()),
            force_path_style: config.force_path_style,
            scheme: config.url_scheme(),
        })
    }

    fn canned_acl(acl: ObjectAcl) -> ObjectCannedAcl {
        match acl {
            ObjectAcl::Private => ObjectCannedAcl::Private,
            ObjectAcl::PublicRead => ObjectCannedAcl::PublicRead,
        }
    }

    /// Bucket base URL without a trailing slash
    fn bucket_base_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) if self.force_path_style => format!("{}/{}", endpoint, self.bucket),
            Some(endpoint) => match endpoint.split_once("://") {
                Some((scheme, host)) => format!("{}://{}.{}", scheme, self.bucket, host),
                None => format!("{}://{}.{}", self.scheme, self.bucket, endpoint),
            },
            None if self.force_path_style => format!(
                "{}://s3.{}.amazonaws.com/{}",
                self.scheme, self.region, self.bucket
            ),
            None => format!(
                "{}://{}.s3.{}.amazonaws.com",
                self.scheme, self.bucket, self.region
            ),
        }
    }
}

fn unix_secs(dt: Option<&aws_sdk_s3::primitives::DateTime>) -> u64 {
    dt.map(|d| d.secs().max(0) as u64).unwrap_or(0)
}

#[async_trait]
impl ObjectBackend for S3Backend {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn head_object(&self, key: &str) -> Result<Option<ObjectMetadata>> {
        trace!("head_object: key={}", key);

        let head_result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match head_result {
            Ok(output) => Ok(Some(ObjectMetadata {
                size: output.content_length().unwrap_or(0).max(0) as u64,
                last_modified: unix_secs(output.last_modified()),
                version: output.version_id().map(|v| v.to_string()),
                content_type: output.content_type().map(|c| c.to_string()),
            })),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(None)
                } else {
                    Err(S3fsError::Backend(format!(
                        "S3 HeadObject error for '{}': {}",
                        key, service_error
                    )))
                }
            }
        }
    }

    async fn put_object(&self, request: PutObjectRequest) -> Result<()> {
        debug!("put_object: key={} size={}", request.key, request.body.len());

        let metadata = if request.metadata.is_empty() {
            None
        } else {
            Some(request.metadata)
        };

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&request.key)
            .body(ByteStream::from(request.body))
            .set_content_type(request.content_type)
            .set_acl(request.acl.map(Self::canned_acl))
            .set_cache_control(request.cache_control)
            .set_server_side_encryption(
                request
                    .server_side_encryption
                    .as_deref()
                    .map(ServerSideEncryption::from),
            )
            .set_metadata(metadata)
            .send()
            .await
            .map_err(|e| {
                S3fsError::Backend(format!(
                    "S3 PutObject error for '{}': {}",
                    request.key,
                    e.into_service_error()
                ))
            })?;

        Ok(())
    }

    async fn copy_object(
        &self,
        copy_source: &str,
        key: &str,
        acl: Option<ObjectAcl>,
    ) -> Result<()> {
        debug!("copy_object: source={} key={}", copy_source, key);

        self.client
            .copy_object()
            .bucket(&self.bucket)
            .key(key)
            .copy_source(encode_key_path(copy_source))
            .set_acl(acl.map(Self::canned_acl))
            .send()
            .await
            .map_err(|e| {
                S3fsError::Backend(format!(
                    "S3 CopyObject error for '{}': {}",
                    copy_source,
                    e.into_service_error()
                ))
            })?;

        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        debug!("delete_object: key={}", key);

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                S3fsError::Backend(format!(
                    "S3 DeleteObject error for '{}': {}",
                    key,
                    e.into_service_error()
                ))
            })?;

        Ok(())
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<()> {
        debug!("delete_objects: {} key(s)", keys.len());

        for chunk in keys.chunks(DELETE_BATCH_SIZE) {
            let objects = chunk
                .iter()
                .map(|k| ObjectIdentifier::builder().key(k).build())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| {
                    S3fsError::Backend(format!("Failed to build delete request: {}", e))
                })?;

            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(|e| S3fsError::Backend(format!("Failed to build delete: {}", e)))?;

            self.client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| {
                    S3fsError::Backend(format!(
                        "S3 DeleteObjects error: {}",
                        e.into_service_error()
                    ))
                })?;
        }

        Ok(())
    }

    fn list_objects(&self, prefix: &str) -> ObjectStream {
        let prefix = prefix.to_string();
        let client = self.client.clone();
        let bucket = self.bucket.clone();

        Box::pin(try_stream! {
            let mut continuation_token: Option<String> = None;

            loop {
                let mut request = client
                    .list_objects_v2()
                    .bucket(&bucket)
                    .prefix(&prefix);

                if let Some(token) = continuation_token.take() {
                    request = request.continuation_token(token);
                }

                let result = request.send().await.map_err(|e| {
                    S3fsError::Backend(format!(
                        "S3 ListObjectsV2 error for prefix '{}': {}",
                        prefix,
                        e.into_service_error()
                    ))
                })?;

                for obj in result.contents() {
                    if let Some(key) = obj.key() {
                        yield ObjectSummary {
                            key: key.to_string(),
                            size: obj.size().unwrap_or(0).max(0) as u64,
                            last_modified: unix_secs(obj.last_modified()),
                        };
                    }
                }

                continuation_token = result
                    .next_continuation_token()
                    .filter(|_| result.is_truncated().unwrap_or(false))
                    .map(|s| s.to_string());
                if continuation_token.is_none() {
                    break;
                }
            }
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.bucket_base_url(), encode_key_path(key))
    }

    async fn presigned_get_url(&self, key: &str, options: PresignOptions) -> Result<String> {
        let expires = options.expires.min(MAX_PRESIGN_EXPIRY);
        trace!("presigned_get_url: key={} expires={:?}", key, expires);

        let presigning = PresigningConfig::expires_in(expires)
            .map_err(|e| S3fsError::InvalidArgument(format!("Invalid presign expiry: {}", e)))?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .set_response_content_disposition(options.response_content_disposition)
            .set_version_id(options.version_id)
            .presigned(presigning)
            .await
            .map_err(|e| {
                S3fsError::Backend(format!(
                    "S3 presign error for '{}': {}",
                    key,
                    e.into_service_error()
                ))
            })?;

        Ok(request.uri().to_string())
    }
}
