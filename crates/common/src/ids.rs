//! Type-safe identifier newtypes for certbind.
//!
//! These types provide compile-time safety for identifiers, preventing
//! accidental mixing of different ID types (e.g., passing a SiteId
//! where a RenewalId is expected).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Persisted renewal identifier.
///
/// Stable across runs; used as the file name of the stored renewal
/// record and as the log field that ties every message of one pass together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RenewalId(String);

impl RenewalId {
    /// Create a new random renewal ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Wrap an existing renewal ID, e.g. one read back from storage
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RenewalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RenewalId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Web server site identifier.
///
/// Identifies one site of the web server whose bindings the
/// reconciliation engine may touch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(String);

impl SiteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SiteId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
