//! Proof-of-control plugins
//!
//! A validation plugin puts the proof for one challenge in place when asked
//! and removes whatever it created when the order is done with it.
//!
//! - [`Http01Validation`] registers tokens with an [`Http01Tokens`] registry
//!   that the web tier serves from `/.well-known/acme-challenge/<token>`
//! - [`Dns01Validation`] publishes TXT records through a [`DnsProvider`]

mod dns01;
mod http01;

pub use dns01::{Dns01Validation, DnsProvider};
pub use http01::{Http01Tokens, Http01Validation, ACME_CHALLENGE_PREFIX};

use async_trait::async_trait;
use thiserror::Error;

use certbind_common::{Identifier, SiteId, Target};

use crate::acme::{Authorization, Challenge, ChallengeType};

/// Validation plugin errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("no key authorization supplied for {0}")]
    MissingKeyAuthorization(Identifier),

    #[error("DNS provider {provider} failed: {message}")]
    Dns { provider: String, message: String },

    #[error("{0}")]
    Other(String),
}

/// Everything a plugin needs to prove one identifier
#[derive(Debug, Clone, PartialEq)]
pub struct ChallengeDetails {
    /// Identifier as it appears in the target (may be a wildcard)
    pub identifier: Identifier,
    /// Identifier the CA authorizes (wildcard stripped)
    pub authorized: Identifier,
    /// Site the identifier belongs to
    pub site: Option<SiteId>,
    pub challenge_type: ChallengeType,
    pub token: String,
    pub key_authorization: Option<String>,
}

impl ChallengeDetails {
    /// Details for `challenge`, one of the challenges offered by `authorization`
    pub fn new(authorization: &Authorization, challenge: &Challenge, site: Option<SiteId>) -> Self {
        Self {
            identifier: authorization.requested_identifier(),
            authorized: authorization.identifier.clone(),
            site,
            challenge_type: challenge.kind.clone(),
            token: challenge.token.clone(),
            key_authorization: challenge.key_authorization.clone(),
        }
    }

    /// # Errors
    ///
    /// Returns [`ValidationError::MissingKeyAuthorization`] when the CA
    /// client did not supply one.
    pub fn key_authorization(&self) -> Result<&str, ValidationError> {
        self.key_authorization
            .as_deref()
            .ok_or_else(|| ValidationError::MissingKeyAuthorization(self.identifier.clone()))
    }
}

/// Proof-of-control capability
#[async_trait]
pub trait ValidationPlugin: Send + Sync {
    /// Challenge type this plugin answers
    fn challenge_type(&self) -> ChallengeType;

    /// Whether every identifier in `target` can be proven by this plugin
    fn can_validate(&self, target: &Target) -> bool;

    /// Put the proof for one challenge in place
    ///
    /// On error the plugin must not leave anything behind that
    /// [`cleanup`](Self::cleanup) would not remove.
    async fn prepare_challenge(&self, details: &ChallengeDetails) -> Result<(), ValidationError>;

    /// Remove whatever [`prepare_challenge`](Self::prepare_challenge) put in
    /// place for `details`
    ///
    /// Called after every authorization attempt, including attempts that
    /// never prepared anything; there is nothing to remove in that case.
    async fn cleanup(&self, _details: &ChallengeDetails) -> Result<(), ValidationError> {
        Ok(())
    }
}
