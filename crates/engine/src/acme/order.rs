//! Order orchestration
//!
//! Turns a target into an issued certificate: one order, every
//! authorization proven in turn, then finalization. The first failure ends
//! the attempt; nothing is retried within a pass.

use tracing::{debug, info, warn};

use certbind_common::Target;

use super::authorization::{ChallengeAuthorizer, ChallengePolicy};
use super::client::IssuanceClient;
use super::error::OrderError;
use super::types::{Order, OrderStatus};
use crate::certificate::IssuedCertificate;
use crate::csr::CsrPlugin;
use crate::renewal::RenewResult;
use crate::validation::{ChallengeDetails, ValidationPlugin};

/// Sequences one issuance attempt
pub struct OrderOrchestrator<'a> {
    client: &'a dyn IssuanceClient,
    validation: &'a dyn ValidationPlugin,
    csr: &'a dyn CsrPlugin,
    policy: &'a ChallengePolicy,
}

impl<'a> OrderOrchestrator<'a> {
    /// Create an orchestrator for one issuance attempt
    ///
    /// # Arguments
    ///
    /// * `client` - CA client
    /// * `validation` - Proves every authorization of the order
    /// * `csr` - Generates the key and signing request at finalization
    /// * `policy` - Poll budget for each authorization
    pub fn new(
        client: &'a dyn IssuanceClient,
        validation: &'a dyn ValidationPlugin,
        csr: &'a dyn CsrPlugin,
        policy: &'a ChallengePolicy,
    ) -> Self {
        Self {
            client,
            validation,
            csr,
            policy,
        }
    }

    /// Obtain a certificate for `target`
    ///
    /// `force_validation` re-proves authorizations the CA already
    /// considers valid.
    pub async fn issue(
        &self,
        target: &Target,
        force_validation: bool,
    ) -> Result<IssuedCertificate, OrderError> {
        target.validate()?;

        if !self.validation.can_validate(target) {
            return Err(OrderError::ValidationUnsupported(
                self.validation.challenge_type(),
            ));
        }

        let identifiers = target.identifiers();
        info!(
            common_name = %target.common_name,
            identifiers = identifiers.len(),
            "Creating order"
        );
        let order = self
            .client
            .create_order(&identifiers)
            .await
            .map_err(OrderError::Create)?;

        if !matches!(order.status, OrderStatus::Ready | OrderStatus::Pending) {
            warn!(status = %order.status, error = ?order.error, "Order created in unusable state");
            return Err(OrderError::OrderStatus {
                status: order.status,
                problem: order.error.clone(),
            });
        }

        self.authorize_all(target, &order, force_validation).await?;

        let request = self.csr.generate(target)?;
        let chain = self
            .client
            .request_certificate(&request, &order)
            .await
            .map_err(OrderError::Issuance)?;

        let certificate = IssuedCertificate::from_pem(&chain.pem, request.private_key_pem)?;
        info!(
            common_name = %target.common_name,
            thumbprint = %certificate.thumbprint,
            expires = %certificate.not_after,
            "Certificate issued"
        );
        Ok(certificate)
    }

    async fn authorize_all(
        &self,
        target: &Target,
        order: &Order,
        force_validation: bool,
    ) -> Result<(), OrderError> {
        let authorizer = ChallengeAuthorizer::new(self.client, self.validation, self.policy);
        let challenge_type = self.validation.challenge_type();

        for url in &order.authorizations {
            let authorization = self
                .client
                .get_authorization(url)
                .await
                .map_err(|source| OrderError::FetchAuthorization {
                    url: url.clone(),
                    source,
                })?;

            let part = target.part_for(&authorization.identifier).ok_or_else(|| {
                OrderError::UnmatchedAuthorization(authorization.identifier.clone())
            })?;

            debug!(
                identifier = %authorization.identifier,
                status = %authorization.status,
                site = ?part.site,
                "Processing authorization"
            );
            let result = authorizer
                .authorize(&authorization, part.site.as_ref(), force_validation)
                .await;
            if let Some(challenge) = authorization.challenge(&challenge_type) {
                let details = ChallengeDetails::new(&authorization, challenge, part.site.clone());
                if let Err(e) = self.validation.cleanup(&details).await {
                    warn!(
                        identifier = %authorization.identifier,
                        error = %e,
                        "Validation cleanup failed"
                    );
                }
            }
            result?;
        }
        Ok(())
    }
}

impl From<OrderError> for RenewResult {
    fn from(err: OrderError) -> Self {
        let problem = err.problem().cloned();
        RenewResult::failure(err.to_string()).with_problem(problem)
    }
}
