//! Plugin resolution
//!
//! Turns the stored option variants of a renewal into working plugins. The
//! set of plugins is closed; the only things registered at runtime are the
//! collaborators that live outside this crate (DNS providers, the web server).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use certbind_common::{Identifier, IdentifierKind, SiteId, Target, TargetError, TargetPart};
use certbind_config::{BindingSettings, Settings};

use crate::bindings::{BindingError, BindingOptions, WebServer};
use crate::csr::{CsrPlugin, RcgenCsr};
use crate::renewal::{
    CsrOptions, InstallationOptions, StoreOptions, TargetOptions, ValidationOptions,
};
use crate::store::{CertificateStore, FileCertificateStore, StorageError};
use crate::validation::{
    Dns01Validation, DnsProvider, Http01Tokens, Http01Validation, ValidationPlugin,
};

/// A renewal's options refer to something that is not available
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("DNS provider '{0}' is not registered")]
    UnknownDnsProvider(String),

    #[error("Site {0} not found")]
    UnknownSite(SiteId),

    #[error("No web server configured")]
    NoWebServer,

    #[error("Invalid target: {0}")]
    Target(#[from] TargetError),

    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Binding installation resolved for one renewal
pub struct Installation<'a> {
    pub server: &'a dyn WebServer,
    /// Site, ip, port and flags for new bindings; thumbprint filled in later
    pub template: BindingOptions,
}

/// Registry of collaborators and the factory for per-renewal plugins
///
/// DNS providers and the web server are registered once at startup; each
/// renewal's stored options then select among them.
pub struct PluginResolver {
    tokens: Http01Tokens,
    dns_providers: HashMap<String, Arc<dyn DnsProvider>>,
    server: Option<Arc<dyn WebServer>>,
    bindings: BindingSettings,
    certificates_path: PathBuf,
}

impl PluginResolver {
    /// Create a resolver with no DNS providers and no web server
    ///
    /// # Arguments
    ///
    /// * `settings` - Binding defaults and the default certificate directory
    pub fn new(settings: &Settings) -> Self {
        Self {
            tokens: Http01Tokens::new(),
            dns_providers: HashMap::new(),
            server: None,
            bindings: settings.bindings.clone(),
            certificates_path: settings.storage.certificates_path(),
        }
    }

    /// Share an existing token registry with HTTP-01 validation
    pub fn with_http01_tokens(mut self, tokens: Http01Tokens) -> Self {
        self.tokens = tokens;
        self
    }

    /// Register a DNS provider under its [`DnsProvider::name`]
    pub fn with_dns_provider(mut self, provider: Arc<dyn DnsProvider>) -> Self {
        self.dns_providers
            .insert(provider.name().to_string(), provider);
        self
    }

    pub fn with_web_server(mut self, server: Arc<dyn WebServer>) -> Self {
        self.server = Some(server);
        self
    }

    /// Registry the HTTP listener answers challenges from
    pub fn http01_tokens(&self) -> &Http01Tokens {
        &self.tokens
    }

    fn server(&self) -> Result<&dyn WebServer, ResolveError> {
        self.server.as_deref().ok_or(ResolveError::NoWebServer)
    }

    /// Build the target for this run
    ///
    /// Site targets read the server's bindings each time, so hosts added
    /// or removed since the last run change the target's fingerprint.
    pub fn target(&self, options: &TargetOptions) -> Result<Target, ResolveError> {
        match options {
            TargetOptions::Manual {
                common_name,
                identifiers,
                site,
            } => {
                let identifiers: Vec<Identifier> =
                    identifiers.iter().map(|v| Identifier::parse(v.trim())).collect();
                let common_name = match common_name {
                    Some(name) => Identifier::parse(name.trim()),
                    None => identifiers
                        .iter()
                        .find(|id| id.kind() != IdentifierKind::Email)
                        .cloned()
                        .ok_or(TargetError::NoIdentifiers)?,
                };
                Ok(Target::new(
                    common_name,
                    vec![TargetPart::new(site.clone(), identifiers)],
                ))
            }
            TargetOptions::Site {
                site,
                common_name,
                exclude,
            } => {
                let sites = self.server()?.sites()?;
                let found = sites
                    .iter()
                    .find(|s| &s.id == site)
                    .ok_or_else(|| ResolveError::UnknownSite(site.clone()))?;

                let mut identifiers: Vec<Identifier> = Vec::new();
                for binding in &found.bindings {
                    let host = binding.host.trim();
                    if host.is_empty() || exclude.iter().any(|e| e.eq_ignore_ascii_case(host)) {
                        continue;
                    }
                    let identifier = Identifier::dns(host);
                    if !identifiers.contains(&identifier) {
                        identifiers.push(identifier);
                    }
                }

                let first = identifiers.first().cloned().ok_or(TargetError::NoIdentifiers)?;
                let common_name = match common_name {
                    Some(name) if identifiers.contains(&Identifier::dns(name.as_str())) => {
                        Identifier::dns(name.as_str())
                    }
                    Some(name) => {
                        warn!(
                            site = %site,
                            common_name = %name,
                            fallback = %first,
                            "Common name no longer bound on site"
                        );
                        first
                    }
                    None => first,
                };
                debug!(site = %site, hosts = identifiers.len(), "Resolved site target");
                Ok(Target::new(
                    common_name,
                    vec![TargetPart::new(Some(site.clone()), identifiers)],
                ))
            }
        }
    }

    /// Validation plugin for a renewal
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::UnknownDnsProvider`] when DNS-01 names a
    /// provider that was never registered.
    pub fn validation(
        &self,
        options: &ValidationOptions,
    ) -> Result<Box<dyn ValidationPlugin>, ResolveError> {
        match options {
            ValidationOptions::Http01 => Ok(Box::new(Http01Validation::new(self.tokens.clone()))),
            ValidationOptions::Dns01 { provider } => {
                let provider = self
                    .dns_providers
                    .get(provider)
                    .cloned()
                    .ok_or_else(|| ResolveError::UnknownDnsProvider(provider.clone()))?;
                Ok(Box::new(Dns01Validation::new(provider)))
            }
        }
    }

    pub fn csr(&self, options: &CsrOptions) -> Box<dyn CsrPlugin> {
        match options {
            CsrOptions::Rcgen { algorithm } => Box::new(RcgenCsr::new(*algorithm)),
        }
    }

    /// Certificate store, rooted at the configured directory unless the
    /// options name another one
    ///
    /// # Errors
    ///
    /// Fails when the store directory cannot be created.
    pub fn store(&self, options: &StoreOptions) -> Result<Box<dyn CertificateStore>, ResolveError> {
        match options {
            StoreOptions::File { path } => {
                let path = path.as_ref().unwrap_or(&self.certificates_path);
                Ok(Box::new(FileCertificateStore::new(
                    self.bindings.default_store.clone(),
                    path,
                )?))
            }
        }
    }

    /// `None` when the renewal only stores the certificate
    pub fn installation(
        &self,
        options: &InstallationOptions,
    ) -> Result<Option<Installation<'_>>, ResolveError> {
        match options {
            InstallationOptions::None => Ok(None),
            InstallationOptions::Bindings {
                site,
                ip,
                port,
                flags,
            } => {
                let mut template = BindingOptions::from(&self.bindings).with_flags(*flags);
                if let Some(site) = site {
                    template = template.with_site(site.clone());
                }
                if let Some(ip) = ip {
                    template = template.with_ip(ip.clone());
                }
                if let Some(port) = port {
                    template = template.with_port(*port);
                }
                Ok(Some(Installation {
                    server: self.server()?,
                    template,
                }))
            }
        }
    }
}
