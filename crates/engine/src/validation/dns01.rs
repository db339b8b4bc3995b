//! DNS-01 validation
//!
//! Record publishing is delegated to a [`DnsProvider`]; concrete providers
//! live outside this crate.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use certbind_common::{IdentifierKind, Target};

use super::{ChallengeDetails, ValidationError, ValidationPlugin};
use crate::acme::ChallengeType;

/// TXT record management for one DNS zone host
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Provider name for logs and errors
    fn name(&self) -> &str;

    async fn create_record(&self, name: &str, value: &str) -> Result<(), ValidationError>;

    async fn delete_record(&self, name: &str, value: &str) -> Result<(), ValidationError>;
}

/// Validation plugin answering `dns-01` challenges
pub struct Dns01Validation {
    provider: Arc<dyn DnsProvider>,
    /// (name, value) pairs created and not yet deleted
    created: Mutex<Vec<(String, String)>>,
}

impl Dns01Validation {
    pub fn new(provider: Arc<dyn DnsProvider>) -> Self {
        Self {
            provider,
            created: Mutex::new(Vec::new()),
        }
    }

    /// `_acme-challenge.<domain>` for the authorized domain
    pub fn record_name(domain: &str) -> String {
        format!("_acme-challenge.{}", domain.trim_start_matches("*."))
    }

    /// base64url(SHA-256(key authorization)), unpadded
    pub fn record_value(key_authorization: &str) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(key_authorization.as_bytes()))
    }
}

impl std::fmt::Debug for Dns01Validation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dns01Validation")
            .field("provider", &self.provider.name())
            .field("created", &self.created.lock().len())
            .finish()
    }
}

#[async_trait]
impl ValidationPlugin for Dns01Validation {
    fn challenge_type(&self) -> ChallengeType {
        ChallengeType::Dns01
    }

    /// Only DNS names have a zone to publish into
    fn can_validate(&self, target: &Target) -> bool {
        target
            .identifiers()
            .iter()
            .all(|id| id.kind() == IdentifierKind::Dns)
    }

    async fn prepare_challenge(&self, details: &ChallengeDetails) -> Result<(), ValidationError> {
        let name = Self::record_name(details.authorized.value());
        let value = Self::record_value(details.key_authorization()?);

        self.provider.create_record(&name, &value).await?;
        info!(
            provider = %self.provider.name(),
            record = %name,
            "Created DNS-01 validation record"
        );
        self.created.lock().push((name, value));
        Ok(())
    }

    async fn cleanup(&self, details: &ChallengeDetails) -> Result<(), ValidationError> {
        let Some(key_authorization) = details.key_authorization.as_deref() else {
            return Ok(());
        };
        let record = (
            Self::record_name(details.authorized.value()),
            Self::record_value(key_authorization),
        );
        {
            let mut created = self.created.lock();
            let Some(index) = created.iter().position(|r| *r == record) else {
                return Ok(());
            };
            created.swap_remove(index);
        }

        let (name, value) = record;
        match self.provider.delete_record(&name, &value).await {
            Ok(()) => {
                debug!(record = %name, "Deleted DNS-01 validation record");
                Ok(())
            }
            Err(e) => {
                warn!(record = %name, error = %e, "Failed to delete DNS-01 validation record");
                Err(e)
            }
        }
    }
}
