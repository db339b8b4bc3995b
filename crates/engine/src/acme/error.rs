//! Error types for issuance

use std::fmt;

use thiserror::Error;

use certbind_common::{Identifier, TargetError};

use super::types::{ChallengeType, OrderStatus, Problem};
use crate::certificate::CertificateError;
use crate::csr::CsrError;
use crate::validation::ValidationError;

/// Failures talking to the CA
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Connection to CA failed: {0}")]
    Connection(String),

    #[error("CA rejected request: {0}")]
    Rejected(Problem),

    #[error("Unexpected response from CA: {0}")]
    Protocol(String),
}

/// Why one identifier could not be proven
#[derive(Debug, Error)]
pub enum AuthorizationError {
    #[error("Challenge type {challenge_type} unavailable for {identifier}")]
    ChallengeUnavailable {
        identifier: Identifier,
        challenge_type: ChallengeType,
    },

    #[error("Preparation error for {identifier}: {source}")]
    Preparation {
        identifier: Identifier,
        #[source]
        source: ValidationError,
    },

    #[error("Authorization timed out for {identifier} after {polls} polls")]
    TimedOut { identifier: Identifier, polls: u32 },

    #[error("Authorization failed for {identifier}: {}", OptionalProblem(.problem))]
    Invalid {
        identifier: Identifier,
        problem: Option<Problem>,
    },

    #[error("Authorization for {identifier} failed: {source}")]
    Client {
        identifier: Identifier,
        #[source]
        source: ClientError,
    },
}

/// Why an order did not produce a certificate
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Invalid target: {0}")]
    InvalidTarget(#[from] TargetError),

    #[error("Validation plugin {0} cannot validate this target")]
    ValidationUnsupported(ChallengeType),

    #[error("Failed to create order: {0}")]
    Create(#[source] ClientError),

    #[error("Order has status {status}: {}", OptionalProblem(.problem))]
    OrderStatus {
        status: OrderStatus,
        problem: Option<Problem>,
    },

    #[error("Failed to fetch authorization {url}: {source}")]
    FetchAuthorization {
        url: String,
        #[source]
        source: ClientError,
    },

    #[error("Unable to match challenge to target for {0}")]
    UnmatchedAuthorization(Identifier),

    #[error(transparent)]
    Authorization(#[from] AuthorizationError),

    #[error("Failed to create signing request: {0}")]
    SigningRequest(#[from] CsrError),

    #[error("Failed to request certificate: {0}")]
    Issuance(#[source] ClientError),

    #[error("Issued certificate is unusable: {0}")]
    Certificate(#[from] CertificateError),
}

impl OrderError {
    /// Protocol-reported detail, when the CA supplied one
    pub fn problem(&self) -> Option<&Problem> {
        match self {
            Self::OrderStatus { problem, .. } => problem.as_ref(),
            Self::Authorization(AuthorizationError::Invalid { problem, .. }) => problem.as_ref(),
            Self::Create(ClientError::Rejected(problem))
            | Self::Issuance(ClientError::Rejected(problem)) => Some(problem),
            _ => None,
        }
    }
}

struct OptionalProblem<'a>(&'a Option<Problem>);

impl fmt::Display for OptionalProblem<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(problem) => write!(f, "{}", problem),
            None => write!(f, "no error reported by CA"),
        }
    }
}
