//! Certificate renewal and TLS binding engine
//!
//! Keeps certificates for web sites current: it obtains certificates from an
//! ACME CA, stores them, and reconciles the server's HTTPS bindings so every
//! host in the certificate is served with it.
//!
//! # Module Organization
//!
//! - [`acme`]: Order, authorization and challenge sequencing
//! - [`validation`]: Proof-of-control plugins (HTTP-01, DNS-01)
//! - [`csr`]: Key generation and signing requests
//! - [`certificate`]: Parsed certificates and thumbprints
//! - [`store`]: Certificate and renewal persistence
//! - [`bindings`]: Binding scoring and reconciliation against a web server
//! - [`resolver`]: Turns stored renewal options into plugins
//! - [`renewal`]: Renewal records and the renewal loop
//!
//! # Example
//!
//! ```ignore
//! let settings = Settings::from_file("certbind.toml")?;
//! settings.logging.init_tracing()?;
//! let resolver = PluginResolver::new(&settings).with_web_server(server);
//! let renewals = Arc::new(JsonRenewalStore::new(&settings.storage.renewals_path())?);
//! let manager = RenewalManager::new(client, resolver, renewals, &settings);
//! let summary = manager.renew_all(RunLevel::unattended()).await?;
//! ```

pub mod acme;
pub mod bindings;
pub mod certificate;
pub mod csr;
pub mod renewal;
pub mod resolver;
pub mod store;
pub mod validation;

#[cfg(test)]
pub(crate) mod testing;

pub use acme::{IssuanceClient, OrderOrchestrator};
pub use bindings::{BindingReconciler, WebServer};
pub use certificate::{IssuedCertificate, Thumbprint};
pub use renewal::{RenewResult, Renewal, RenewalManager, RenewalSummary, RunLevel};
pub use resolver::PluginResolver;
