//! Per-identifier authorization
//!
//! Drives one authorization from unproven to proven: pick the challenge,
//! have the validation plugin put the proof in place, answer, then poll at a
//! fixed interval until the CA reaches a verdict or the poll budget runs out.

use std::time::Duration;

use tracing::{debug, info, trace, warn};

use certbind_common::SiteId;
use certbind_config::ChallengeSettings;

use super::client::IssuanceClient;
use super::error::AuthorizationError;
use super::types::{Authorization, AuthorizationStatus, ChallengeStatus};
use crate::validation::{ChallengeDetails, ValidationPlugin};

/// Default wait between polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default polls after the answer before giving up
pub const DEFAULT_MAX_POLLS: u32 = 4;

/// Poll budget for one authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengePolicy {
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl Default for ChallengePolicy {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        }
    }
}

impl From<&ChallengeSettings> for ChallengePolicy {
    fn from(settings: &ChallengeSettings) -> Self {
        Self {
            poll_interval: settings.poll_interval(),
            max_polls: settings.max_polls,
        }
    }
}

/// Proves individual authorizations
///
/// Holds no state between calls. A retried call after a failure answers the
/// challenge again.
pub struct ChallengeAuthorizer<'a> {
    client: &'a dyn IssuanceClient,
    validation: &'a dyn ValidationPlugin,
    policy: &'a ChallengePolicy,
}

impl<'a> ChallengeAuthorizer<'a> {
    pub fn new(
        client: &'a dyn IssuanceClient,
        validation: &'a dyn ValidationPlugin,
        policy: &'a ChallengePolicy,
    ) -> Self {
        Self {
            client,
            validation,
            policy,
        }
    }

    /// Drive `authorization` to valid
    ///
    /// Already-valid authorizations (or challenges) are accepted without
    /// touching the validation plugin unless `force` is set.
    ///
    /// # Arguments
    ///
    /// * `authorization` - The authorization as last fetched from the CA
    /// * `site` - Site the target belongs to, passed on to the validation plugin
    /// * `force` - Answer again even when the CA already considers it valid
    ///
    /// # Errors
    ///
    /// Returns [`AuthorizationError::Invalid`] straight away for an
    /// authorization that is invalid, expired, deactivated or revoked, and
    /// otherwise when the challenge is rejected or the poll budget runs out.
    pub async fn authorize(
        &self,
        authorization: &Authorization,
        site: Option<&SiteId>,
        force: bool,
    ) -> Result<(), AuthorizationError> {
        let identifier = authorization.requested_identifier();
        let challenge_type = self.validation.challenge_type();

        if !force && authorization.status == AuthorizationStatus::Valid {
            debug!(identifier = %identifier, "Authorization already valid, skipping validation");
            return Ok(());
        }

        if !matches!(
            authorization.status,
            AuthorizationStatus::Pending | AuthorizationStatus::Valid
        ) {
            // A final status cannot be changed by answering again
            let problem = authorization.challenges.iter().find_map(|c| c.error.clone());
            warn!(
                identifier = %identifier,
                status = %authorization.status,
                error = ?problem,
                "Authorization already failed"
            );
            return Err(AuthorizationError::Invalid {
                identifier,
                problem,
            });
        }

        let challenge = authorization.challenge(&challenge_type).ok_or_else(|| {
            AuthorizationError::ChallengeUnavailable {
                identifier: identifier.clone(),
                challenge_type: challenge_type.clone(),
            }
        })?;

        if !force && challenge.status == ChallengeStatus::Valid {
            debug!(
                identifier = %identifier,
                challenge_type = %challenge_type,
                "Challenge already valid, skipping validation"
            );
            return Ok(());
        }

        let details = ChallengeDetails::new(authorization, challenge, site.cloned());
        self.validation
            .prepare_challenge(&details)
            .await
            .map_err(|source| AuthorizationError::Preparation {
                identifier: identifier.clone(),
                source,
            })?;

        debug!(
            identifier = %identifier,
            challenge_type = %challenge_type,
            "Submitting challenge answer"
        );
        let mut current = self
            .client
            .answer_challenge(challenge)
            .await
            .map_err(|source| AuthorizationError::Client {
                identifier: identifier.clone(),
                source,
            })?;

        let mut polls = 0;
        while current.status.is_pending() {
            if polls >= self.policy.max_polls {
                warn!(
                    identifier = %identifier,
                    polls = polls,
                    "Authorization still pending after poll budget"
                );
                return Err(AuthorizationError::TimedOut { identifier, polls });
            }

            tokio::time::sleep(self.policy.poll_interval).await;
            current = self
                .client
                .get_challenge(&challenge.url)
                .await
                .map_err(|source| AuthorizationError::Client {
                    identifier: identifier.clone(),
                    source,
                })?;
            polls += 1;

            trace!(
                identifier = %identifier,
                status = %current.status,
                poll = polls,
                "Polled challenge status"
            );
        }

        if current.status == ChallengeStatus::Valid {
            info!(identifier = %identifier, "Authorization valid");
            Ok(())
        } else {
            warn!(
                identifier = %identifier,
                status = %current.status,
                error = ?current.error,
                "Authorization failed"
            );
            Err(AuthorizationError::Invalid {
                identifier,
                problem: current.error,
            })
        }
    }
}
