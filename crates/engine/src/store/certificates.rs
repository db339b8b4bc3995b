//! Certificate store
//!
//! Certificates are keyed by thumbprint, so a renewed certificate never
//! overwrites the one it replaces.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use super::{create_private_dir, write_private, StorageError};
use crate::certificate::{IssuedCertificate, Thumbprint};

/// Metadata stored alongside the certificate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateMeta {
    pub thumbprint: Thumbprint,
    pub not_before: DateTime<Utc>,
    pub expires: DateTime<Utc>,
    /// When the certificate was put in the store
    pub stored: DateTime<Utc>,
    #[serde(default)]
    pub names: Vec<String>,
}

/// A stored certificate with its metadata
#[derive(Debug, Clone)]
pub struct StoredCertificate {
    pub cert_pem: String,
    pub key_pem: String,
    pub meta: CertificateMeta,
}

/// Where issued certificates are kept
pub trait CertificateStore: Send + Sync {
    /// Store name recorded on bindings
    fn name(&self) -> &str;

    fn install(&self, certificate: &IssuedCertificate) -> Result<(), StorageError>;

    fn remove(&self, thumbprint: &Thumbprint) -> Result<(), StorageError>;

    fn find(&self, thumbprint: &Thumbprint) -> Result<Option<StoredCertificate>, StorageError>;
}

/// PEM files under `<root>/<THUMBPRINT>/`
#[derive(Debug)]
pub struct FileCertificateStore {
    name: String,
    base_path: PathBuf,
}

impl FileCertificateStore {
    /// Open the store, creating the directory with owner-only permissions
    pub fn new(name: impl Into<String>, base_path: &Path) -> Result<Self, StorageError> {
        create_private_dir(base_path)?;
        debug!(path = %base_path.display(), "Opened certificate store");
        Ok(Self {
            name: name.into(),
            base_path: base_path.to_path_buf(),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn certificate_path(&self, thumbprint: &Thumbprint) -> PathBuf {
        self.base_path.join(thumbprint.to_hex())
    }

    /// Thumbprints of every stored certificate
    pub fn list(&self) -> Result<Vec<Thumbprint>, StorageError> {
        let mut thumbprints = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match entry.file_name().to_str().map(str::parse::<Thumbprint>) {
                Some(Ok(thumbprint)) => thumbprints.push(thumbprint),
                _ => trace!(entry = ?entry.file_name(), "Ignoring unknown store entry"),
            }
        }
        thumbprints.sort();
        Ok(thumbprints)
    }
}

impl CertificateStore for FileCertificateStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn install(&self, certificate: &IssuedCertificate) -> Result<(), StorageError> {
        let path = self.certificate_path(&certificate.thumbprint);
        create_private_dir(&path)?;

        fs::write(path.join("cert.pem"), &certificate.chain_pem)?;
        write_private(&path.join("key.pem"), &certificate.private_key_pem)?;

        let meta = CertificateMeta {
            thumbprint: certificate.thumbprint.clone(),
            not_before: certificate.not_before,
            expires: certificate.not_after,
            stored: Utc::now(),
            names: certificate.names.clone(),
        };
        fs::write(path.join("meta.json"), serde_json::to_string_pretty(&meta)?)?;

        info!(
            thumbprint = %certificate.thumbprint,
            expires = %certificate.not_after,
            "Saved certificate to store"
        );
        Ok(())
    }

    fn remove(&self, thumbprint: &Thumbprint) -> Result<(), StorageError> {
        let path = self.certificate_path(thumbprint);
        if !path.exists() {
            return Err(StorageError::CertificateNotFound(thumbprint.clone()));
        }
        fs::remove_dir_all(&path)?;
        info!(thumbprint = %thumbprint, "Removed certificate from store");
        Ok(())
    }

    fn find(&self, thumbprint: &Thumbprint) -> Result<Option<StoredCertificate>, StorageError> {
        let path = self.certificate_path(thumbprint);
        let cert_path = path.join("cert.pem");
        if !cert_path.exists() {
            trace!(thumbprint = %thumbprint, "Certificate not in store");
            return Ok(None);
        }

        let cert_pem = fs::read_to_string(&cert_path)?;
        let key_pem = fs::read_to_string(path.join("key.pem"))?;
        let meta: CertificateMeta =
            serde_json::from_str(&fs::read_to_string(path.join("meta.json"))?)?;
        Ok(Some(StoredCertificate {
            cert_pem,
            key_pem,
            meta,
        }))
    }
}
