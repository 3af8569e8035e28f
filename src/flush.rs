//! Upload completion
//!
//! A flush uploads the whole buffered body, waits until the object is
//! visible, then records the backend's own metadata in the index. The
//! index is not touched unless the object was both written and observed.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::backend::PutObjectRequest;
use crate::error::{S3fsError, Result};
use crate::fs::{record_from_metadata, DirectoryEngine};
use crate::keymap::ObjectPath;
use crate::waiter::wait_until_visible;

/// Picks a content type for an upload
pub trait MimeGuesser: Send + Sync {
    fn guess(&self, path: &str) -> Option<String>;
}

/// Content type by file extension; unknown or missing extensions are
/// `application/octet-stream`
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtensionMimeGuesser;

impl MimeGuesser for ExtensionMimeGuesser {
    fn guess(&self, path: &str) -> Option<String> {
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        Some(mime.essence_str().to_string())
    }
}

/// Lets the host adjust upload parameters before submission.
///
/// Everything but `request.key` may be changed; the key is derived from
/// the uri being flushed and a rewritten key is refused.
pub trait UploadHook: Send + Sync {
    fn alter(&self, path: &ObjectPath, request: &mut PutObjectRequest);
}

pub struct FlushCoordinator {
    engine: Arc<DirectoryEngine>,
    mime: Arc<dyn MimeGuesser>,
    hook: Option<Arc<dyn UploadHook>>,
}

impl FlushCoordinator {
    pub fn new(engine: Arc<DirectoryEngine>) -> Self {
        Self {
            engine,
            mime: Arc::new(ExtensionMimeGuesser),
            hook: None,
        }
    }

    pub fn with_mime_guesser(mut self, mime: Arc<dyn MimeGuesser>) -> Self {
        self.mime = mime;
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn UploadHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Upload `body` as the content of `uri`.
    ///
    /// Returns `Ok(true)` once the object is visible and indexed, and
    /// `Ok(false)` if it never became visible within the wait policy (the
    /// index is left alone). A failed upload is an error and also leaves
    /// the index alone.
    pub async fn flush(&self, uri: &str, body: Bytes) -> Result<bool> {
        let path = ObjectPath::parse(uri)?;
        if path.is_root() {
            return Err(S3fsError::IsADirectory(path.uri()));
        }
        if let Some(existing) = self.engine.store().get(&path.uri()).await? {
            if existing.is_dir {
                return Err(S3fsError::IsADirectory(existing.uri));
            }
        }

        let config = self.engine.config();
        let key = self.engine.object_key(&path);
        let mut request = PutObjectRequest::new(key.clone(), body);
        request.content_type = self.mime.guess(&path.path);
        request.acl = Some(path.class().default_acl());
        request.cache_control = config.cache_control.clone();
        request.server_side_encryption = config.encryption.clone();

        if let Some(hook) = &self.hook {
            hook.alter(&path, &mut request);
            if request.key != key {
                return Err(S3fsError::InvalidArgument(format!(
                    "upload hook changed the key of {} from {} to {}",
                    path.uri(),
                    key,
                    request.key
                )));
            }
        }

        debug!(
            "flush: uploading {} bytes to {} ({:?})",
            request.body.len(),
            key,
            request.content_type
        );
        self.engine.backend().put_object(request).await?;

        let backend = self.engine.backend().as_ref();
        if !wait_until_visible(backend, &key, config.wait).await {
            warn!("flush: {} uploaded but never became visible", path.uri());
            return Ok(false);
        }

        let meta = match backend.head_object(&key).await? {
            Some(meta) => meta,
            None => {
                warn!("flush: {} disappeared after becoming visible", key);
                return Ok(false);
            }
        };

        self.engine
            .write_record(record_from_metadata(path.uri(), &meta))
            .await?;
        info!("Flushed {} ({} bytes)", path.uri(), meta.size);
        Ok(true)
    }
}
