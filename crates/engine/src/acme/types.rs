//! Issuance protocol resources
//!
//! Orders, authorizations and challenges as reported by the CA. These are
//! created per attempt and never persisted.

use serde::{Deserialize, Serialize};
use std::fmt;

use certbind_common::Identifier;

/// Problem document reported by the CA
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    /// Problem type URN, e.g. `urn:ietf:params:acme:error:unauthorized`
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
}

impl Problem {
    /// Problem with a type URN and detail, as an ACME server reports them
    pub fn new(kind: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            detail: Some(detail.into()),
            status: None,
        }
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.detail, &self.kind) {
            (Some(detail), Some(kind)) => write!(f, "{} ({})", detail, kind),
            (Some(detail), None) => write!(f, "{}", detail),
            (None, Some(kind)) => write!(f, "{}", kind),
            (None, None) => write!(f, "unspecified problem"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Processing => "processing",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

/// An order for one certificate covering a set of identifiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub url: String,
    pub status: OrderStatus,
    pub identifiers: Vec<Identifier>,
    /// One authorization URL per identifier
    pub authorizations: Vec<String>,
    pub finalize: String,
    #[serde(default)]
    pub certificate: Option<String>,
    #[serde(default)]
    pub error: Option<Problem>,
}

/// Authorization status; only `pending` can still change by answering a challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Expired,
    Deactivated,
    Revoked,
}

impl fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Expired => "expired",
            Self::Deactivated => "deactivated",
            Self::Revoked => "revoked",
        };
        f.write_str(s)
    }
}

/// Proof-of-control record for one identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Authorization {
    pub url: String,
    pub identifier: Identifier,
    pub status: AuthorizationStatus,
    /// Set when the authorization covers `*.<identifier>`
    #[serde(default)]
    pub wildcard: bool,
    pub challenges: Vec<Challenge>,
}

impl Authorization {
    /// Find the challenge offered for a proof method
    pub fn challenge(&self, kind: &ChallengeType) -> Option<&Challenge> {
        self.challenges.iter().find(|c| &c.kind == kind)
    }

    /// Identifier as requested in the order (wildcard restored)
    pub fn requested_identifier(&self) -> Identifier {
        if self.wildcard {
            Identifier::dns(format!("*.{}", self.identifier.value()))
        } else {
            self.identifier.clone()
        }
    }
}

/// Proof method
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeType {
    #[serde(rename = "http-01")]
    Http01,
    #[serde(rename = "dns-01")]
    Dns01,
    #[serde(rename = "tls-alpn-01")]
    TlsAlpn01,
    #[serde(untagged)]
    Other(String),
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http01 => write!(f, "http-01"),
            Self::Dns01 => write!(f, "dns-01"),
            Self::TlsAlpn01 => write!(f, "tls-alpn-01"),
            Self::Other(kind) => write!(f, "{}", kind),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

impl ChallengeStatus {
    /// Still waiting on the CA
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

impl fmt::Display for ChallengeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

/// One proof method and its status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    #[serde(rename = "type")]
    pub kind: ChallengeType,
    pub url: String,
    pub token: String,
    pub status: ChallengeStatus,
    /// Token joined with the account key thumbprint, filled in by the client
    #[serde(default)]
    pub key_authorization: Option<String>,
    #[serde(default)]
    pub error: Option<Problem>,
}

/// PEM certificate chain returned on finalization, leaf first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateChain {
    pub pem: String,
}
