//! TLS binding management
//!
//! # Architecture
//!
//! - [`WebServer`] / [`ServerSession`] - The server being configured (supplied by the caller)
//! - [`ConfigSession`] - Scoped session guard, discards unless committed
//! - [`fits()`] - Scores how well a binding's host serves a target host
//! - [`BindingReconciler`] - Decides which bindings to add or update
//! - [`MemoryWebServer`] - In-process server for dry runs

mod fits;
mod memory;
mod model;
mod reconcile;
mod server;

pub use fits::fits;
pub use memory::MemoryWebServer;
pub use model::{binding_information, BindingOptions, ExistingBinding, Protocol, SslFlags};
pub use reconcile::{BindingReconciler, ReconcileOutcome};
pub use server::{ConfigSession, ServerCapabilities, ServerSession, Site, WebServer};

use thiserror::Error;

use certbind_common::SiteId;

/// Server-side failures while reading or changing bindings
#[derive(Debug, Error)]
pub enum BindingError {
    #[error("No site to install bindings into")]
    MissingSite,

    #[error("Site {0} not found")]
    UnknownSite(SiteId),

    #[error("Binding {0} not found")]
    NotFound(String),

    #[error("No certificate thumbprint to bind")]
    MissingCertificate,

    #[error("Server configuration error: {0}")]
    Server(String),
}
