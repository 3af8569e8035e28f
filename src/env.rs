//! `${VAR}` substitution for configuration files
//!
//! Credentials and bucket names are usually injected through the
//! environment rather than written into the YAML file. References use the
//! `${NAME}` form; `$NAME` and `{NAME}` are left alone.

use std::env;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::config::ConfigError;

static VAR_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex"));

/// Expand every `${NAME}` reference in `input`.
///
/// All unset variables are reported together so a misconfigured deployment
/// sees the full list in one error.
pub fn expand_env_refs(input: &str) -> Result<String, ConfigError> {
    let mut unset: Vec<String> = Vec::new();

    let expanded = VAR_REFERENCE.replace_all(input, |caps: &Captures<'_>| {
        let name = &caps[1];
        match env::var(name) {
            Ok(value) => value,
            Err(_) => {
                if !unset.iter().any(|n| n == name) {
                    unset.push(name.to_string());
                }
                String::new()
            }
        }
    });

    if unset.is_empty() {
        Ok(expanded.into_owned())
    } else {
        Err(ConfigError::ValidationError(format!(
            "Missing environment variables: {}",
            unset.join(", ")
        )))
    }
}
