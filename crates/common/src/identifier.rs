//! Proof-of-control subjects.
//!
//! An [`Identifier`] is one value a certificate must cover. DNS names are
//! compared case-insensitively; IP addresses and emails compare exactly.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;

/// Wildcard label prefix
pub const WILDCARD_PREFIX: &str = "*.";

/// Kind of value an identifier carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    Dns,
    Ip,
    Email,
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dns => write!(f, "dns"),
            Self::Ip => write!(f, "ip"),
            Self::Email => write!(f, "email"),
        }
    }
}

/// A value subject to proof-of-control
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    kind: IdentifierKind,
    value: String,
}

impl Identifier {
    /// DNS name, stored as given
    ///
    /// Names compare case-insensitively wherever identifiers are matched,
    /// so no normalization happens here. A leading `*.` makes it a wildcard.
    pub fn dns(value: impl Into<String>) -> Self {
        Self {
            kind: IdentifierKind::Dns,
            value: value.into(),
        }
    }

    /// IP literal, stored in its canonical text form
    pub fn ip(addr: IpAddr) -> Self {
        Self {
            kind: IdentifierKind::Ip,
            value: addr.to_string(),
        }
    }

    pub fn email(value: impl Into<String>) -> Self {
        Self {
            kind: IdentifierKind::Email,
            value: value.into(),
        }
    }

    /// Classify a free-form value: IP literal, email address, or DNS name
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if let Ok(addr) = value.parse::<IpAddr>() {
            Self::ip(addr)
        } else if value.contains('@') {
            Self::email(value)
        } else {
            Self::dns(value)
        }
    }

    pub fn kind(&self) -> IdentifierKind {
        self.kind
    }

    /// Name, address or mailbox exactly as requested
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Whether this is a wildcard DNS name (`*.example.com`)
    pub fn is_wildcard(&self) -> bool {
        self.kind == IdentifierKind::Dns && self.value.starts_with(WILDCARD_PREFIX)
    }

    /// The value with any wildcard prefix removed
    ///
    /// Authorizations for `*.example.com` are issued against `example.com`,
    /// so this is the form used when matching authorizations to targets.
    pub fn without_wildcard(&self) -> &str {
        if self.is_wildcard() {
            &self.value[WILDCARD_PREFIX.len()..]
        } else {
            &self.value
        }
    }

    /// Compare against a raw value using this identifier's equality rules
    pub fn matches_value(&self, other: &str) -> bool {
        match self.kind {
            IdentifierKind::Dns => self.value.eq_ignore_ascii_case(other),
            _ => self.value == other,
        }
    }

    /// Canonical form: lower-cased for DNS, verbatim otherwise
    pub fn normalized(&self) -> String {
        match self.kind {
            IdentifierKind::Dns => self.value.to_ascii_lowercase(),
            _ => self.value.clone(),
        }
    }
}

impl PartialEq for Identifier {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.matches_value(&other.value)
    }
}

impl Eq for Identifier {}

impl Hash for Identifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.normalized().hash(state);
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}
