//! Common types shared across certbind components
//!
//! This crate holds the plain data every other crate agrees on: what a
//! certificate must cover and how logging is brought up.
//!
//! # Module Organization
//!
//! - [`ids`]: Type-safe identifier newtypes (RenewalId, SiteId)
//! - [`identifier`]: Proof-of-control subjects (DNS names, IPs, emails)
//! - [`target`]: Targets and target parts, including drift fingerprints
//! - [`observability`]: Tracing subscriber initialisation

pub mod identifier;
pub mod ids;
pub mod observability;
pub mod target;

// Re-export identifier types
pub use ids::{RenewalId, SiteId};

pub use identifier::{Identifier, IdentifierKind};
pub use observability::{init_tracing, LogFormat};
pub use target::{Target, TargetError, TargetPart};
