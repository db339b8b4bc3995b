//! Renewal store
//!
//! One pretty-printed JSON file per renewal. Results are appended to the
//! record's history and the whole record rewritten.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::{create_private_dir, write_private, StorageError};
use crate::renewal::{RenewResult, Renewal};

/// Persisted renewal configurations
pub trait RenewalStore: Send + Sync {
    fn load_all(&self) -> Result<Vec<Renewal>, StorageError>;

    /// Append `result` to the renewal's history and persist it
    fn save(&self, renewal: &mut Renewal, result: RenewResult) -> Result<(), StorageError>;
}

/// `<root>/<id>.json` per renewal
#[derive(Debug)]
pub struct JsonRenewalStore {
    base_path: PathBuf,
}

impl JsonRenewalStore {
    /// Open the store, creating the directory with owner-only permissions
    pub fn new(base_path: &Path) -> Result<Self, StorageError> {
        create_private_dir(base_path)?;
        Ok(Self {
            base_path: base_path.to_path_buf(),
        })
    }

    fn renewal_path(&self, renewal: &Renewal) -> Result<PathBuf, StorageError> {
        let id = renewal.id.as_str();
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StorageError::InvalidRenewalId(renewal.id.clone()));
        }
        Ok(self.base_path.join(format!("{id}.json")))
    }

    /// Write the renewal as it is, without adding a result
    pub fn write(&self, renewal: &Renewal) -> Result<(), StorageError> {
        let path = self.renewal_path(renewal)?;
        write_private(&path, &serde_json::to_string_pretty(renewal)?)?;
        debug!(renewal = %renewal.id, path = %path.display(), "Saved renewal");
        Ok(())
    }
}

impl RenewalStore for JsonRenewalStore {
    /// Unreadable files are skipped with a warning
    fn load_all(&self) -> Result<Vec<Renewal>, StorageError> {
        let mut renewals = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .map_err(StorageError::from)
                .and_then(|content| {
                    serde_json::from_str::<Renewal>(&content).map_err(StorageError::from)
                });
            match parsed {
                Ok(renewal) => renewals.push(renewal),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable renewal"),
            }
        }
        renewals.sort_by(|a, b| a.friendly_name.cmp(&b.friendly_name));
        info!(count = renewals.len(), "Loaded renewals");
        Ok(renewals)
    }

    fn save(&self, renewal: &mut Renewal, result: RenewResult) -> Result<(), StorageError> {
        renewal.history.push(result);
        self.write(renewal)
    }
}
