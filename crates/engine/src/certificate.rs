//! Issued certificates and thumbprints

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use thiserror::Error;
use x509_parser::extensions::GeneralName;

/// An issued chain or stored thumbprint could not be read
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CertificateError {
    #[error("invalid PEM: {0}")]
    Pem(String),

    #[error("PEM contains no certificate")]
    NoCertificate,

    #[error("invalid X.509 certificate: {0}")]
    X509(String),

    #[error("invalid thumbprint '{0}'")]
    Thumbprint(String),
}

/// SHA-256 digest of a certificate's DER encoding
///
/// Displayed and serialized as upper-case hex; parsing accepts either case.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Thumbprint(Vec<u8>);

impl Thumbprint {
    /// Thumbprint of a DER-encoded certificate
    pub fn from_der(der: &[u8]) -> Self {
        Self(Sha256::digest(der).to_vec())
    }

    /// Wrap an already computed digest
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode_upper(&self.0)
    }
}

impl FromStr for Thumbprint {
    type Err = CertificateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(CertificateError::Thumbprint(s.to_string()));
        }
        hex::decode(trimmed)
            .map(Self)
            .map_err(|_| CertificateError::Thumbprint(s.to_string()))
    }
}

impl fmt::Display for Thumbprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Thumbprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thumbprint({})", self.to_hex())
    }
}

impl Serialize for Thumbprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Thumbprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A freshly issued certificate with its private key
#[derive(Clone)]
pub struct IssuedCertificate {
    /// Leaf followed by intermediates
    pub chain_pem: String,
    pub private_key_pem: String,
    pub thumbprint: Thumbprint,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// DNS names from the subject alternative name extension
    pub names: Vec<String>,
}

impl IssuedCertificate {
    /// Parse a PEM chain; the first certificate is the leaf
    pub fn from_pem(
        chain_pem: &str,
        private_key_pem: impl Into<String>,
    ) -> Result<Self, CertificateError> {
        let blocks = pem::parse_many(chain_pem).map_err(|e| CertificateError::Pem(e.to_string()))?;
        let leaf = blocks
            .iter()
            .find(|block| block.tag() == "CERTIFICATE")
            .ok_or(CertificateError::NoCertificate)?;

        let (_, cert) = x509_parser::parse_x509_certificate(leaf.contents())
            .map_err(|e| CertificateError::X509(e.to_string()))?;
        let validity = cert.validity();
        let not_before = DateTime::from_timestamp(validity.not_before.timestamp(), 0)
            .ok_or_else(|| CertificateError::X509("notBefore out of range".to_string()))?;
        let not_after = DateTime::from_timestamp(validity.not_after.timestamp(), 0)
            .ok_or_else(|| CertificateError::X509("notAfter out of range".to_string()))?;

        let names = match cert.subject_alternative_name() {
            Ok(Some(san)) => san
                .value
                .general_names
                .iter()
                .filter_map(|name| match name {
                    GeneralName::DNSName(dns) => Some(dns.to_string()),
                    _ => None,
                })
                .collect(),
            Ok(None) => Vec::new(),
            Err(e) => return Err(CertificateError::X509(e.to_string())),
        };

        Ok(Self {
            chain_pem: chain_pem.to_string(),
            private_key_pem: private_key_pem.into(),
            thumbprint: Thumbprint::from_der(leaf.contents()),
            not_before,
            not_after,
            names,
        })
    }
}

impl fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("thumbprint", &self.thumbprint)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .field("names", &self.names)
            .finish_non_exhaustive()
    }
}
