//! URI ↔ object key mapping
//!
//! URIs look like `public://images/a.jpg`. The scheme selects a subfolder
//! in the bucket (`public` and `private` get their configured folders,
//! anything else such as `s3` maps straight onto the bucket) and the root
//! folder, when set, is prepended to everything:
//!
//! ```text
//! public://images/a.jpg  ->  [bucket/][root/]s3fs-public/images/a.jpg
//! ```
//!
//! Everything here is pure: no I/O and no state beyond the `Config`.

use crate::backend::ObjectAcl;
use crate::config::Config;
use crate::error::{S3fsError, Result};

/// Scheme that maps directly onto the bucket
pub const BUCKET_SCHEME: &str = "s3";

const SCHEME_SEPARATOR: &str = "://";

/// Storage class of a URI, derived from its scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemeClass {
    Public,
    Private,
    /// Any other scheme; no subfolder
    Bucket,
}

impl SchemeClass {
    pub fn from_scheme(scheme: &str) -> Self {
        match scheme {
            "public" => SchemeClass::Public,
            "private" => SchemeClass::Private,
            _ => SchemeClass::Bucket,
        }
    }

    /// Subfolder this class lives under, if any
    pub fn folder(self, config: &Config) -> Option<&str> {
        match self {
            SchemeClass::Public => Some(&config.public_folder),
            SchemeClass::Private => Some(&config.private_folder),
            SchemeClass::Bucket => None,
        }
    }

    /// ACL given to objects written under this class
    pub fn default_acl(self) -> ObjectAcl {
        match self {
            SchemeClass::Private => ObjectAcl::Private,
            SchemeClass::Public | SchemeClass::Bucket => ObjectAcl::PublicRead,
        }
    }
}

/// A URI split into scheme and normalized path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectPath {
    pub scheme: String,
    /// Path below the scheme root; no leading, trailing or doubled `/`
    pub path: String,
}

impl ObjectPath {
    pub fn parse(uri: &str) -> Result<Self> {
        let (scheme, rest) = uri
            .split_once(SCHEME_SEPARATOR)
            .ok_or_else(|| S3fsError::MalformedPath(format!("missing '://' in '{}'", uri)))?;

        if scheme.is_empty() {
            return Err(S3fsError::MalformedPath(format!("missing scheme in '{}'", uri)));
        }

        Ok(Self {
            scheme: scheme.to_string(),
            path: normalize_segments(rest),
        })
    }

    pub fn class(&self) -> SchemeClass {
        SchemeClass::from_scheme(&self.scheme)
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    /// Canonical `scheme://path` form
    pub fn uri(&self) -> String {
        format!("{}{}{}", self.scheme, SCHEME_SEPARATOR, self.path)
    }

    /// Scheme root, e.g. `public://`
    pub fn root_uri(&self) -> String {
        format!("{}{}", self.scheme, SCHEME_SEPARATOR)
    }

    /// Parent path; the parent of a top-level entry is the scheme root
    pub fn parent(&self) -> Option<ObjectPath> {
        if self.is_root() {
            return None;
        }
        let parent = match self.path.rfind('/') {
            Some(idx) => self.path[..idx].to_string(),
            None => String::new(),
        };
        Some(ObjectPath {
            scheme: self.scheme.clone(),
            path: parent,
        })
    }

    /// Last path segment (empty for the root)
    pub fn base_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or("")
    }

    /// Key relative to the root folder (folder prefix included)
    pub fn relative_key(&self, config: &Config) -> String {
        join_key(self.class().folder(config), &self.path)
    }
}

/// Collapse the path below the scheme into `a/b/c` form.
///
/// Backslashes count as separators; empty segments are dropped.
fn normalize_segments(path: &str) -> String {
    path.split(['/', '\\'])
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn join_key(prefix: Option<&str>, rest: &str) -> String {
    match prefix {
        Some(prefix) if !prefix.is_empty() => {
            if rest.is_empty() {
                prefix.to_string()
            } else {
                format!("{}/{}", prefix, rest)
            }
        }
        _ => rest.to_string(),
    }
}

/// Map a URI to the backend object key.
///
/// `include_bucket` prepends the bucket name, as needed for S3 copy sources.
pub fn map_to_object_key(uri: &str, config: &Config, include_bucket: bool) -> Result<String> {
    let path = ObjectPath::parse(uri)?;
    let key = prepend_root(&path.relative_key(config), config);

    if include_bucket {
        Ok(join_key(Some(&config.bucket), &key))
    } else {
        Ok(key)
    }
}

/// Prepend the configured root folder to a key
pub fn prepend_root(key: &str, config: &Config) -> String {
    join_key(Some(&config.root_folder), key)
}

/// Reverse mapping from a key (without bucket) to a canonical URI.
///
/// Returns `None` for keys outside the root folder. Keys under the public
/// or private folder map to those schemes, everything else to `s3://`.
pub fn key_to_uri(key: &str, config: &Config) -> Option<String> {
    let key = key.trim_matches('/');
    let relative = if config.root_folder.is_empty() {
        key
    } else if key == config.root_folder {
        ""
    } else {
        key.strip_prefix(config.root_folder.as_str())?.strip_prefix('/')?
    };

    let classes = [
        ("public", &config.public_folder),
        ("private", &config.private_folder),
    ];
    for (scheme, folder) in classes {
        if relative == folder.as_str() {
            return Some(format!("{}{}", scheme, SCHEME_SEPARATOR));
        }
        if let Some(rest) = relative
            .strip_prefix(folder.as_str())
            .and_then(|r| r.strip_prefix('/'))
        {
            return Some(format!("{}{}{}", scheme, SCHEME_SEPARATOR, normalize_segments(rest)));
        }
    }

    Some(format!(
        "{}{}{}",
        BUCKET_SCHEME,
        SCHEME_SEPARATOR,
        normalize_segments(relative)
    ))
}

/// Canonical form of a URI: `public:///a//b/` becomes `public://a/b`
pub fn normalize_uri(uri: &str) -> Result<String> {
    Ok(ObjectPath::parse(uri)?.uri())
}

/// Canonical parent URI, or `None` for a scheme root
pub fn parent_uri(uri: &str) -> Result<Option<String>> {
    Ok(ObjectPath::parse(uri)?.parent().map(|p| p.uri()))
}

pub fn is_root(uri: &str) -> Result<bool> {
    Ok(ObjectPath::parse(uri)?.is_root())
}
