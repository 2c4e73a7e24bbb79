//! Glob patterns over logical keys.
//!
//! Only `*` is special: it matches any run of characters, including the empty
//! run and runs containing newlines. Every other character is literal.

use crate::error::{Error, Result};
use regex::Regex;

/// A compiled glob pattern.
#[derive(Debug, Clone)]
pub struct KeyPattern {
    source: String,
    regex: Regex,
}

impl KeyPattern {
    /// Compile a glob pattern.
    pub fn new(pattern: impl Into<String>) -> Result<Self> {
        let source = pattern.into();
        let expr = to_regex(&source);
        let regex = Regex::new(&expr).map_err(|e| Error::InvalidPattern {
            pattern: source.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self { source, regex })
    }

    /// The pattern text this matcher was compiled from.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the whole key matches.
    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }
}

impl PartialEq for KeyPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for KeyPattern {}

/// Escape the literal runs between `*`s and join them with a capturing
/// wildcard, anchored at both ends.
fn to_regex(pattern: &str) -> String {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("(.*)");
    format!("(?s)^{}$", body)
}
