//! Configuration parsing and structures

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::env::expand_env_refs;
use crate::rules::RuleSet;
use crate::store::IndexConfig;
use crate::waiter::WaitPolicy;

/// Default subfolder for `public://` paths
pub const DEFAULT_PUBLIC_FOLDER: &str = "s3fs-public";
/// Default subfolder for `private://` paths
pub const DEFAULT_PRIVATE_FOLDER: &str = "s3fs-private";

// =============================================================================
// Raw Config (Deserialized from YAML)
// =============================================================================

/// Raw configuration as deserialized from YAML.
/// This is converted to `Config` via `resolve()`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// S3 bucket name
    pub bucket: Option<String>,

    /// AWS region
    pub region: Option<String>,

    /// Custom endpoint URL (for S3-compatible stores)
    pub endpoint: Option<String>,

    /// Force path-style addressing (for MinIO, LocalStack, etc.)
    #[serde(default)]
    pub force_path_style: bool,

    /// Static credentials; the default AWS provider chain is used when absent
    pub credentials: Option<CredentialsConfig>,

    /// Key prefix under which everything is stored
    pub root_folder: Option<String>,

    /// Subfolder for `public://` paths
    pub public_folder: Option<String>,

    /// Subfolder for `private://` paths
    pub private_folder: Option<String>,

    /// Serve objects through `domain` instead of the bucket URL
    #[serde(default)]
    pub use_cname: bool,

    /// CNAME domain, required when `use_cname` is set
    pub domain: Option<String>,

    #[serde(default = "default_true")]
    pub use_https: bool,

    /// Cache-Control header applied to uploads
    pub cache_control: Option<String>,

    /// Server-side encryption mode (e.g. "AES256", "aws:kms")
    pub encryption: Option<String>,

    /// Re-probe the backend for files instead of trusting the index
    #[serde(default)]
    pub ignore_cache: bool,

    /// Newline-delimited patterns served as torrents
    #[serde(default)]
    pub torrents: String,

    /// Newline-delimited `timeout|pattern` lines served presigned
    #[serde(default)]
    pub presigned_urls: String,

    /// Newline-delimited patterns forced to download
    #[serde(default)]
    pub saveas: String,

    #[serde(default)]
    pub delivery: DeliveryConfig,

    #[serde(default)]
    pub wait: WaitPolicy,

    #[serde(default)]
    pub index: IndexConfig,
}

fn default_true() -> bool {
    true
}

/// Static AWS credentials
#[derive(Clone, Deserialize, Serialize)]
pub struct CredentialsConfig {
    pub access_key: String,
    pub secret_key: String,
}

impl fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Where URLs that don't point at the bucket are served from
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeliveryConfig {
    /// Prepended to every delivery path (e.g. "https://example.com")
    #[serde(default)]
    pub base_url: String,

    /// Access-controlled delivery path for `private://` files
    #[serde(default = "default_private_prefix")]
    pub private_prefix: String,

    /// Route public CSS/JS through the proxy prefixes below
    #[serde(default)]
    pub proxy_css_js: bool,

    #[serde(default = "default_css_prefix")]
    pub css_prefix: String,

    #[serde(default = "default_js_prefix")]
    pub js_prefix: String,
}

fn default_private_prefix() -> String {
    "/system/files".to_string()
}

fn default_css_prefix() -> String {
    "/s3fs-css".to_string()
}

fn default_js_prefix() -> String {
    "/s3fs-js".to_string()
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            private_prefix: default_private_prefix(),
            proxy_css_js: false,
            css_prefix: default_css_prefix(),
            js_prefix: default_js_prefix(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// =============================================================================
// Resolved Config (Ready for use)
// =============================================================================

/// Fully resolved, immutable configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub bucket: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub force_path_style: bool,
    pub credentials: Option<CredentialsConfig>,
    /// Root prefix without surrounding slashes; empty when unset
    pub root_folder: String,
    pub public_folder: String,
    pub private_folder: String,
    /// CNAME domain when CNAME mode is on
    pub cname: Option<String>,
    pub use_https: bool,
    pub cache_control: Option<String>,
    pub encryption: Option<String>,
    pub ignore_cache: bool,
    pub presign_rules: RuleSet<Duration>,
    pub saveas_rules: RuleSet<()>,
    pub torrent_rules: RuleSet<()>,
    pub delivery: DeliveryConfig,
    pub wait: WaitPolicy,
    pub index: IndexConfig,
    identity: String,
}

// =============================================================================
// Resolution Logic
// =============================================================================

impl RawConfig {
    /// Parse YAML after expanding `${VAR}` references
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let content = expand_env_refs(content)?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Canonical serialized form; equal settings give equal identities
    /// regardless of key order, comments or whitespace in the source.
    pub fn identity(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Resolve raw config into final config, validating required settings
    pub fn resolve(self) -> Result<Config, ConfigError> {
        let identity = self.identity()?;

        let bucket = self
            .bucket
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .ok_or_else(|| ConfigError::ValidationError("No bucket specified".to_string()))?;

        let public_folder = resolve_folder(self.public_folder, DEFAULT_PUBLIC_FOLDER);
        let private_folder = resolve_folder(self.private_folder, DEFAULT_PRIVATE_FOLDER);
        if public_folder == private_folder {
            return Err(ConfigError::ValidationError(format!(
                "public_folder and private_folder must differ (both are '{}')",
                public_folder
            )));
        }

        let cname = if self.use_cname {
            let domain = self
                .domain
                .map(|d| d.trim().trim_end_matches('/').to_string())
                .filter(|d| !d.is_empty())
                .ok_or_else(|| {
                    ConfigError::ValidationError(
                        "use_cname is set but no domain specified".to_string(),
                    )
                })?;
            Some(domain)
        } else {
            None
        };

        if self.wait.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "wait.max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(Config {
            logging: self.logging,
            bucket,
            region: self.region,
            endpoint: self.endpoint,
            force_path_style: self.force_path_style,
            credentials: self.credentials,
            root_folder: self
                .root_folder
                .map(|r| r.trim_matches('/').to_string())
                .unwrap_or_default(),
            public_folder,
            private_folder,
            cname,
            use_https: self.use_https,
            cache_control: self.cache_control.filter(|c| !c.trim().is_empty()),
            encryption: self.encryption.filter(|e| !e.trim().is_empty()),
            ignore_cache: self.ignore_cache,
            presign_rules: RuleSet::parse_presign(&self.presigned_urls)?,
            saveas_rules: RuleSet::parse_patterns(&self.saveas)?,
            torrent_rules: RuleSet::parse_patterns(&self.torrents)?,
            delivery: self.delivery,
            wait: self.wait,
            index: self.index,
            identity,
        })
    }
}

fn resolve_folder(value: Option<String>, default: &str) -> String {
    value
        .map(|v| v.trim_matches('/').to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Process-wide configurations keyed by settings identity
static SHARED: Lazy<DashMap<String, Arc<Config>>> = Lazy::new(DashMap::new);

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.clone(), e.to_string()))?;

        Self::from_str(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        RawConfig::parse(content)?.resolve()
    }

    /// Shared configuration for these settings.
    ///
    /// The first caller with a given settings identity builds the
    /// `Config`; later callers get the same `Arc`.
    pub fn shared(content: &str) -> Result<Arc<Self>, ConfigError> {
        let raw = RawConfig::parse(content)?;
        let identity = raw.identity()?;

        if let Some(existing) = SHARED.get(&identity) {
            return Ok(Arc::clone(existing.value()));
        }

        let entry = SHARED
            .entry(identity)
            .or_try_insert_with(|| raw.resolve().map(Arc::new))?;
        debug!("Built shared configuration for bucket {}", entry.bucket);
        Ok(Arc::clone(entry.value()))
    }

    /// Shared configuration loaded from a YAML file
    pub fn shared_from_file(path: &PathBuf) -> Result<Arc<Self>, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.clone(), e.to_string()))?;
        Self::shared(&content)
    }

    /// Drop every shared configuration so the next `shared()` rebuilds
    pub fn clear_shared() {
        SHARED.clear();
    }

    /// Logical identity of the settings this config was built from
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// URL scheme for generated links
    pub fn url_scheme(&self) -> &'static str {
        if self.use_https {
            "https"
        } else {
            "http"
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::IndexConfig;

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
logging:
  level: debug

bucket: media-bucket
region: eu-west-1
root_folder: "/site-a/"
public_folder: pub
private_folder: priv
use_cname: true
domain: "cdn.example.com/"
use_https: false
cache_control: "public, max-age=300"
encryption: AES256
ignore_cache: true
presigned_urls: |
  120|secure/
  reports/
saveas: |
  downloads/
torrents: |
  *.iso
wait:
  max_attempts: 5
  delay: 250ms
index:
  type: sqlite
  path: /var/lib/s3fs/index.db
"#;

        let config = Config::from_str(yaml).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.bucket, "media-bucket");
        assert_eq!(config.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.root_folder, "site-a");
        assert_eq!(config.public_folder, "pub");
        assert_eq!(config.private_folder, "priv");
        assert_eq!(config.cname.as_deref(), Some("cdn.example.com"));
        assert_eq!(config.url_scheme(), "http");
        assert!(config.ignore_cache);
        assert_eq!(config.presign_rules.len(), 2);
        assert_eq!(config.saveas_rules.len(), 1);
        assert_eq!(config.torrent_rules.len(), 1);
        assert_eq!(config.wait.max_attempts, 5);
        assert_eq!(config.wait.delay, Duration::from_millis(250));
        match &config.index {
            IndexConfig::Sqlite { path } => assert_eq!(path, "/var/lib/s3fs/index.db"),
            _ => panic!("Expected sqlite index"),
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_str("bucket: b").unwrap();
        assert_eq!(config.public_folder, DEFAULT_PUBLIC_FOLDER);
        assert_eq!(config.private_folder, DEFAULT_PRIVATE_FOLDER);
        assert_eq!(config.root_folder, "");
        assert!(config.cname.is_none());
        assert!(config.use_https);
        assert!(!config.ignore_cache);
        assert!(config.presign_rules.is_empty());
        assert_eq!(config.wait.max_attempts, 10);
        assert_eq!(config.wait.delay, Duration::from_secs(1));
        assert!(matches!(config.index, IndexConfig::Memory));
        assert_eq!(config.delivery.private_prefix, "/system/files");
    }

    #[test]
    fn test_missing_bucket_error() {
        let err = Config::from_str("region: us-east-1").unwrap_err();
        assert!(
            err.to_string().contains("No bucket specified"),
            "Error should mention missing bucket: {}",
            err
        );
    }

    #[test]
    fn test_cname_requires_domain() {
        let err = Config::from_str("bucket: b\nuse_cname: true").unwrap_err();
        assert!(err.to_string().contains("no domain"));
    }

    #[test]
    fn test_folders_must_differ() {
        let yaml = "bucket: b\npublic_folder: files\nprivate_folder: /files/";
        assert!(Config::from_str(yaml).is_err());
    }

    #[test]
    fn test_bad_rule_is_config_error() {
        let err = Config::from_str("bucket: b\npresigned_urls: \"x|secure/\"").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_credentials_are_redacted() {
        let config =
            Config::from_str("bucket: b\ncredentials:\n  access_key: AK\n  secret_key: SK")
                .unwrap();
        let printed = format!("{:?}", config.credentials);
        assert!(printed.contains("AK"));
        assert!(!printed.contains("SK\""));
    }

    #[test]
    fn test_shared_is_deduplicated_by_identity() {
        let a = Config::shared("bucket: shared-dedup\nregion: us-east-1\n").unwrap();
        // Same settings, different formatting and key order
        let b = Config::shared("# comment\nregion:   us-east-1\nbucket: shared-dedup").unwrap();
        let c = Config::shared("bucket: shared-dedup\nregion: us-west-2").unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_shared_errors_are_not_cached() {
        assert!(Config::shared("region: nowhere-shared").is_err());
        assert!(Config::shared("region: nowhere-shared").is_err());
    }
}
