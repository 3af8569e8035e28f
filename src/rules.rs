//! Ordered path pattern rules
//!
//! The presign, forced-download and torrent policies are each configured
//! as a newline-delimited list of path fragments. A fragment is literal
//! text in which `*` stands for any run of characters; it matches anywhere
//! inside the key (substring semantics). Rules are tried in declared order
//! and the first match wins.

use std::time::Duration;

use regex::Regex;

use crate::config::ConfigError;

/// Timeout applied to presign lines that don't carry a `timeout|` prefix
pub const DEFAULT_PRESIGN_TIMEOUT: Duration = Duration::from_secs(60);

/// A single compiled rule
#[derive(Debug, Clone)]
pub struct PatternRule<V> {
    pattern: String,
    matcher: Regex,
    pub value: V,
}

impl<V> PatternRule<V> {
    pub fn new(pattern: &str, value: V) -> Result<Self, ConfigError> {
        let matcher = compile_fragment(pattern)?;
        Ok(Self {
            pattern: pattern.to_string(),
            matcher,
            value,
        })
    }

    /// The pattern as written in the configuration
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.matcher.is_match(path)
    }
}

/// Rules evaluated in declared order
#[derive(Debug, Clone)]
pub struct RuleSet<V> {
    rules: Vec<PatternRule<V>>,
}

impl<V> Default for RuleSet<V> {
    fn default() -> Self {
        Self { rules: Vec::new() }
    }
}

impl<V> RuleSet<V> {
    pub fn from_rules(rules: Vec<PatternRule<V>>) -> Self {
        Self { rules }
    }

    /// First rule matching `path`, if any
    pub fn first_match(&self, path: &str) -> Option<&PatternRule<V>> {
        self.rules.iter().find(|rule| rule.is_match(path))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl RuleSet<()> {
    /// Parse a plain newline-delimited pattern list (torrent, forced download)
    pub fn parse_patterns(text: &str) -> Result<Self, ConfigError> {
        let rules = non_blank_lines(text)
            .map(|line| PatternRule::new(line, ()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_rules(rules))
    }
}

impl RuleSet<Duration> {
    /// Parse presign lines of the form `timeout|pattern` or `pattern`
    pub fn parse_presign(text: &str) -> Result<Self, ConfigError> {
        let mut rules = Vec::new();
        for line in non_blank_lines(text) {
            let (timeout, pattern) = match line.split_once('|') {
                Some((secs, pattern)) => {
                    let secs: u64 = secs.trim().parse().map_err(|_| {
                        ConfigError::ValidationError(format!(
                            "Invalid presign timeout in line '{}'",
                            line
                        ))
                    })?;
                    (Duration::from_secs(secs), pattern.trim())
                }
                None => (DEFAULT_PRESIGN_TIMEOUT, line),
            };
            rules.push(PatternRule::new(pattern, timeout)?);
        }
        Ok(Self::from_rules(rules))
    }
}

fn non_blank_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim).filter(|line| !line.is_empty())
}

/// Compile a fragment into an unanchored regex, escaping everything but `*`
fn compile_fragment(pattern: &str) -> Result<Regex, ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::ValidationError(
            "Empty path pattern".to_string(),
        ));
    }

    let expr = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");

    Regex::new(&expr).map_err(|e| {
        ConfigError::ValidationError(format!("Invalid path pattern '{}': {}", pattern, e))
    })
}
