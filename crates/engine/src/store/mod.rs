//! Persistent storage
//!
//! # Directory Structure
//!
//! ```text
//! storage/
//! ├── renewals/
//! │   └── <renewal-id>.json     # Renewal configuration and result history
//! └── certificates/
//!     └── <THUMBPRINT>/
//!         ├── cert.pem          # Certificate chain
//!         ├── key.pem           # Private key
//!         └── meta.json         # Expiry, issue date, names
//! ```

mod certificates;
mod renewals;

pub use certificates::{CertificateMeta, CertificateStore, FileCertificateStore, StoredCertificate};
pub use renewals::{JsonRenewalStore, RenewalStore};

use std::fs;
use std::path::Path;

use thiserror::Error;

use certbind_common::RenewalId;

use crate::certificate::Thumbprint;

/// Certificate or renewal persistence failures
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Certificate {0} not found in store")]
    CertificateNotFound(Thumbprint),

    #[error("Invalid renewal id '{0}'")]
    InvalidRenewalId(RenewalId),
}

/// Create `path` (and parents) readable only by the owner
fn create_private_dir(path: &Path) -> Result<(), StorageError> {
    fs::create_dir_all(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Write `contents` to `path` readable only by the owner
fn write_private(path: &Path, contents: &str) -> Result<(), StorageError> {
    fs::write(path, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}
