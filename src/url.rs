//! External URL derivation
//!
//! Turns a URI into the URL a browser should fetch it from. Private files
//! go through the access-controlled delivery path; public CSS/JS can be
//! routed through proxy prefixes; everything else points at the bucket
//! (plain, presigned or through a CNAME) with pattern rules deciding
//! about presigning, forced download and torrent delivery.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::backend::{encode_key_path, ObjectBackend, PresignOptions};
use crate::config::Config;
use crate::error::Result;
use crate::keymap::{prepend_root, ObjectPath, SchemeClass};
use crate::store::{FileRecord, MetadataStore};

/// Expiry used when request parameters have to be signed but the path is
/// not presigned
pub const FORCED_DOWNLOAD_EXPIRY: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Query argument carrying the object version
pub const VERSION_QUERY_ARG: &str = "versionId";

/// Query marker asking the store to serve a torrent
pub const TORRENT_QUERY_ARG: &str = "torrent";

/// Per-request URL settings, built from the pattern rules
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlSettings {
    pub presign: bool,
    pub expires: Duration,
    pub forced_download: bool,
    /// `response-content-disposition` override signed into the URL
    pub response_disposition: Option<String>,
    /// Appended to the final URL in order; `None` values give a bare key
    pub query_args: Vec<(String, Option<String>)>,
}

/// Lets the host adjust the settings for a path before the URL is built
pub trait UrlSettingsHook: Send + Sync {
    fn alter(&self, path: &ObjectPath, settings: &mut UrlSettings);
}

pub struct UrlPolicy {
    config: Arc<Config>,
    backend: Arc<dyn ObjectBackend>,
    store: Arc<dyn MetadataStore>,
    hook: Option<Arc<dyn UrlSettingsHook>>,
}

impl UrlPolicy {
    pub fn new(
        config: Arc<Config>,
        backend: Arc<dyn ObjectBackend>,
        store: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            config,
            backend,
            store,
            hook: None,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn UrlSettingsHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// External URL for `uri`, using the index record for its version
    pub async fn external_url_cached(&self, uri: &str) -> Result<String> {
        let record = self.store.get(uri).await?;
        self.external_url(uri, record.as_ref()).await
    }

    /// External URL for `uri`.
    ///
    /// `record` is only consulted for its version token.
    pub async fn external_url(&self, uri: &str, record: Option<&FileRecord>) -> Result<String> {
        let path = ObjectPath::parse(uri)?;
        let version = record
            .map(|r| r.version.as_str())
            .filter(|v| !v.is_empty());
        trace!("external_url: uri={} version={:?}", path.uri(), version);

        if path.class() == SchemeClass::Private {
            let url = self.delivery_url(&self.config.delivery.private_prefix, &path);
            return Ok(with_version(url, version));
        }

        if path.class() == SchemeClass::Public && self.config.delivery.proxy_css_js {
            let prefix = match extension(&path.path) {
                Some("css") => Some(&self.config.delivery.css_prefix),
                Some("js") => Some(&self.config.delivery.js_prefix),
                _ => None,
            };
            if let Some(prefix) = prefix {
                let url = self.delivery_url(prefix, &path);
                return Ok(with_version(url, version));
            }
        }

        let relative = path.relative_key(&self.config);
        let mut settings = self.settings_for(&relative, &path);
        if let Some(hook) = &self.hook {
            hook.alter(&path, &mut settings);
        }

        let key = prepend_root(&relative, &self.config);
        let mut url = match &self.config.cname {
            Some(domain) => {
                if settings.presign || settings.response_disposition.is_some() {
                    debug!("external_url: CNAME mode, {} is served unsigned", key);
                }
                with_version(
                    format!(
                        "{}://{}/{}",
                        self.config.url_scheme(),
                        domain,
                        encode_key_path(&key)
                    ),
                    version,
                )
            }
            None => {
                let expires = if settings.presign {
                    Some(settings.expires)
                } else if settings.response_disposition.is_some() {
                    Some(FORCED_DOWNLOAD_EXPIRY)
                } else {
                    None
                };

                match expires {
                    Some(expires) => {
                        let options = PresignOptions {
                            expires,
                            response_content_disposition: settings.response_disposition.clone(),
                            version_id: version.map(str::to_string),
                        };
                        self.backend.presigned_get_url(&key, options).await?
                    }
                    None => with_version(self.backend.object_url(&key), version),
                }
            }
        };

        if !settings.presign
            && !settings.forced_download
            && self.config.torrent_rules.first_match(&relative).is_some()
        {
            url = append_query(url, TORRENT_QUERY_ARG, None);
        }

        for (name, value) in &settings.query_args {
            url = append_query(url, name, value.as_deref());
        }

        Ok(url)
    }

    fn settings_for(&self, relative: &str, path: &ObjectPath) -> UrlSettings {
        let mut settings = UrlSettings::default();

        if let Some(rule) = self.config.presign_rules.first_match(relative) {
            trace!("presign rule '{}' matched {}", rule.pattern(), relative);
            settings.presign = true;
            settings.expires = rule.value;
        }

        if let Some(rule) = self.config.saveas_rules.first_match(relative) {
            trace!("saveas rule '{}' matched {}", rule.pattern(), relative);
            settings.forced_download = true;
            settings.response_disposition =
                Some(format!("attachment; filename=\"{}\"", path.base_name()));
        }

        settings
    }

    fn delivery_url(&self, prefix: &str, path: &ObjectPath) -> String {
        format!(
            "{}{}/{}",
            self.config.delivery.base_url.trim_end_matches('/'),
            prefix.trim_end_matches('/'),
            encode_key_path(&path.path)
        )
    }
}

fn extension(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next()?;
    name.rsplit_once('.').map(|(_, ext)| ext)
}

fn with_version(url: String, version: Option<&str>) -> String {
    match version {
        Some(version) => append_query(url, VERSION_QUERY_ARG, Some(version)),
        None => url,
    }
}

/// Append `name[=value]` to a URL's query string
pub fn append_query(mut url: String, name: &str, value: Option<&str>) -> String {
    url.push(if url.contains('?') { '&' } else { '?' });
    url.push_str(&urlencoding::encode(name));
    if let Some(value) = value {
        url.push('=');
        url.push_str(&urlencoding::encode(value));
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::store::memory::MemoryMetadataStore;

    fn policy(yaml: &str) -> UrlPolicy {
        let config = Arc::new(Config::from_str(yaml).unwrap());
        UrlPolicy::new(
            config,
            Arc::new(MemoryBackend::new("media")),
            Arc::new(MemoryMetadataStore::new()),
        )
    }

    #[test]
    fn test_append_query() {
        assert_eq!(append_query("http://a/b".into(), "torrent", None), "http://a/b?torrent");
        assert_eq!(
            append_query("http://a/b?x=1".into(), "k", Some("a b")),
            "http://a/b?x=1&k=a%20b"
        );
    }

    #[test]
    fn test_extension() {
        assert_eq!(extension("css/site.min.css"), Some("css"));
        assert_eq!(extension("a.b/noext"), None);
    }

    #[tokio::test]
    async fn test_plain_url() {
        let policy = policy("bucket: media");
        let url = policy.external_url("public://images/a b.jpg", None).await.unwrap();
        assert_eq!(url, "https://media.s3.memory.test/s3fs-public/images/a%20b.jpg");
    }

    #[tokio::test]
    async fn test_presign_rule() {
        let policy = policy("bucket: media\npresigned_urls: \"120|secure/\"");
        let url = policy.external_url("public://secure/f.pdf", None).await.unwrap();
        assert!(url.contains("X-Amz-Expires=120"), "{}", url);
        assert!(url.contains("X-Amz-Signature="));
    }

    #[tokio::test]
    async fn test_forced_download_uses_long_expiry() {
        let policy = policy("bucket: media\nsaveas: \"downloads/\"");
        let url = policy
            .external_url("public://downloads/report.pdf", None)
            .await
            .unwrap();
        assert!(url.contains(&format!("X-Amz-Expires={}", FORCED_DOWNLOAD_EXPIRY.as_secs())));
        assert!(url.contains("response-content-disposition=attachment"));
        assert!(url.contains("report.pdf"));
    }

    #[tokio::test]
    async fn test_private_delivery_path() {
        let policy = policy("bucket: media\ndelivery:\n  base_url: https://example.com/");
        let url = policy.external_url("private://docs/x.pdf", None).await.unwrap();
        assert_eq!(url, "https://example.com/system/files/docs/x.pdf");
    }

    #[tokio::test]
    async fn test_css_js_proxy() {
        let policy = policy("bucket: media\ndelivery:\n  proxy_css_js: true");
        assert_eq!(
            policy.external_url("public://css/a.css", None).await.unwrap(),
            "/s3fs-css/css/a.css"
        );
        assert_eq!(
            policy.external_url("public://js/a.js", None).await.unwrap(),
            "/s3fs-js/js/a.js"
        );
        assert!(policy
            .external_url("public://img/a.png", None)
            .await
            .unwrap()
            .starts_with("https://media.s3.memory.test/"));
    }

    #[tokio::test]
    async fn test_cname_with_root() {
        let policy = policy("bucket: media\nroot_folder: site\nuse_cname: true\ndomain: cdn.example.com");
        let url = policy.external_url("public://a.jpg", None).await.unwrap();
        assert_eq!(url, "https://cdn.example.com/site/s3fs-public/a.jpg");
    }

    #[tokio::test]
    async fn test_torrent_only_when_unsigned() {
        let policy = policy(
            "bucket: media\ntorrents: \"*.iso\"\nsaveas: \"forced/\"",
        );
        let url = policy.external_url("public://big.iso", None).await.unwrap();
        assert!(url.ends_with("?torrent"), "{}", url);

        let url = policy.external_url("public://forced/big.iso", None).await.unwrap();
        assert!(!url.contains("torrent"), "{}", url);
    }

    #[tokio::test]
    async fn test_hook_can_presign_and_add_args() {
        struct Hook;
        impl UrlSettingsHook for Hook {
            fn alter(&self, path: &ObjectPath, settings: &mut UrlSettings) {
                if path.path.starts_with("hooked") {
                    settings.presign = true;
                    settings.expires = Duration::from_secs(30);
                    settings.query_args.push(("itok".into(), Some("abc".into())));
                }
            }
        }

        let policy = policy("bucket: media").with_hook(Arc::new(Hook));
        let url = policy.external_url("public://hooked/a.jpg", None).await.unwrap();
        assert!(url.contains("X-Amz-Expires=30"));
        assert!(url.ends_with("&itok=abc"), "{}", url);
    }

    #[tokio::test]
    async fn test_cached_version_lookup() {
        let policy = policy("bucket: media");
        policy
            .store
            .upsert(FileRecord::file("public://a.jpg", 1, 1, "v7"))
            .await
            .unwrap();
        let url = policy.external_url_cached("public://a.jpg").await.unwrap();
        assert!(url.ends_with("?versionId=v7"), "{}", url);
    }
}
