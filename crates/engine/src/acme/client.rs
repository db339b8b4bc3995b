//! Issuance protocol client seam
//!
//! Account-key management and request signing live behind this trait; the
//! engine only sequences the calls.

use async_trait::async_trait;

use certbind_common::Identifier;

use super::error::ClientError;
use super::types::{Authorization, CertificateChain, Challenge, Order};
use crate::csr::SigningRequest;

/// Order, authorization and challenge operations against a CA
#[async_trait]
pub trait IssuanceClient: Send + Sync {
    /// Create an order covering `identifiers`
    async fn create_order(&self, identifiers: &[Identifier]) -> Result<Order, ClientError>;

    /// Fetch an authorization by URL
    async fn get_authorization(&self, url: &str) -> Result<Authorization, ClientError>;

    /// Tell the CA the proof for `challenge` is in place
    async fn answer_challenge(&self, challenge: &Challenge) -> Result<Challenge, ClientError>;

    /// Re-fetch a challenge by URL
    async fn get_challenge(&self, url: &str) -> Result<Challenge, ClientError>;

    /// Finalize `order` with `csr` and download the issued chain
    async fn request_certificate(
        &self,
        csr: &SigningRequest,
        order: &Order,
    ) -> Result<CertificateChain, ClientError>;
}
