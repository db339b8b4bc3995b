//! Certificate issuance over ACME
//!
//! # Architecture
//!
//! - [`IssuanceClient`] - Order, authorization and challenge RPCs (supplied by the caller)
//! - [`ChallengeAuthorizer`] - Drives one authorization to valid or a precise failure
//! - [`OrderOrchestrator`] - Sequences every authorization of a target, then finalizes
//!
//! # Issuance Flow
//!
//! 1. [`OrderOrchestrator`] checks the target and that the validation plugin can prove it
//! 2. An order is created for every identifier in the target
//! 3. Each authorization is matched back to the target part it came from
//! 4. [`ChallengeAuthorizer`] prepares the proof, answers, and polls at a fixed interval
//! 5. Once all authorizations are valid, a CSR is generated and the order finalized
//! 6. The returned chain is parsed into an
//!    [`IssuedCertificate`](crate::certificate::IssuedCertificate)

mod authorization;
mod client;
mod error;
mod order;
mod types;

pub use authorization::{
    ChallengeAuthorizer, ChallengePolicy, DEFAULT_MAX_POLLS, DEFAULT_POLL_INTERVAL,
};
pub use client::IssuanceClient;
pub use error::{AuthorizationError, ClientError, OrderError};
pub use order::OrderOrchestrator;
pub use types::{
    Authorization, AuthorizationStatus, CertificateChain, Challenge, ChallengeStatus,
    ChallengeType, Order, OrderStatus, Problem,
};
