//! Fact keys - dotted paths naming a piece of world truth.

use serde::{Deserialize, Serialize};

/// A fact key such as `jane.is_having_affair`.
///
/// The first segment names the subject the fact is about; the remainder is
/// the attribute. Keys compare and hash by their full string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactKey(String);

impl FactKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The segment before the first dot (the whole key when undotted).
    pub fn subject(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }

    /// Everything after the subject, if any.
    pub fn attribute(&self) -> Option<&str> {
        self.0.split_once('.').map(|(_, rest)| rest)
    }

    /// Whether this key lies under `prefix` (segment-wise).
    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0 == prefix
            || (self.0.starts_with(prefix) && self.0[prefix.len()..].starts_with('.'))
    }
}

impl From<&str> for FactKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for FactKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl std::fmt::Display for FactKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
