//! Binding reconciliation
//!
//! One pass over the server's bindings makes the new certificate serve every
//! host of a target:
//!
//! 1. HTTPS bindings still carrying the replaced certificate are updated
//! 2. Each host not yet covered updates the best-fitting group of bindings in
//!    its site (HTTP members get an HTTPS sibling on the same ip and host)
//! 3. Hosts nothing fits get a new HTTPS binding of their own
//!
//! Updates that would not change anything are not counted, so running the
//! same pass twice changes nothing the second time.

use tracing::{debug, info, warn};

use certbind_common::{IdentifierKind, SiteId, Target};

use super::fits::fits;
use super::model::{BindingOptions, ExistingBinding, Protocol, SslFlags};
use super::server::{ConfigSession, ServerCapabilities, WebServer};
use super::BindingError;
use crate::certificate::Thumbprint;

/// Result of one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Bindings added or updated
    pub changed: usize,
    /// Whether the session was committed
    pub committed: bool,
}

impl ReconcileOutcome {
    pub fn is_unchanged(&self) -> bool {
        self.changed == 0
    }
}

/// Why a new binding was not created
#[derive(Debug, Clone, PartialEq, Eq)]
enum Refusal {
    Duplicate,
    SniUnsupported,
    WildcardUnsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Update {
    Changed,
    Unchanged,
    Refused,
}

/// Installs a certificate onto a web server's bindings
pub struct BindingReconciler<'a> {
    server: &'a dyn WebServer,
}

impl<'a> BindingReconciler<'a> {
    /// Reconciler for `server`; each install opens its own session
    pub fn new(server: &'a dyn WebServer) -> Self {
        Self { server }
    }

    /// Make `template`'s certificate serve every DNS host in `target`
    ///
    /// `template` supplies the thumbprint, store, flags and the ip/port for
    /// new bindings. Its site is used for target parts without one.
    /// `replaced` is the certificate being renewed, if any.
    pub fn install(
        &self,
        target: &Target,
        template: &BindingOptions,
        replaced: Option<&Thumbprint>,
    ) -> Result<ReconcileOutcome, BindingError> {
        let thumbprint = template
            .thumbprint()
            .cloned()
            .ok_or(BindingError::MissingCertificate)?;
        let capabilities = self.server.capabilities();
        let mut pass = Pass {
            session: ConfigSession::open(self.server)?,
            capabilities,
            thumbprint,
            owned: None,
        };

        let mut found: Vec<String> = Vec::new();

        if let Some(old) = replaced.filter(|old| **old != pass.thumbprint) {
            let mut stale: Vec<ExistingBinding> = pass
                .session
                .bindings()
                .into_iter()
                .filter(|b| b.is_https() && b.thumbprint.as_ref() == Some(old))
                .collect();
            // Host bindings before the default binding
            stale.sort_by_key(|b| (b.host.is_empty(), b.binding_information()));

            // Bindings on the replaced certificate all move together
            pass.owned = Some(old.clone());
            for binding in stale {
                debug!(
                    site = %binding.site,
                    binding = %binding.binding_information(),
                    "Updating binding with replaced certificate"
                );
                if pass.update(&binding, template)? != Update::Refused {
                    found.push(binding.host.clone());
                }
            }
            pass.owned = None;
        }

        for part in &target.parts {
            let site = match part.site.as_ref().or(template.site()) {
                Some(site) => site.clone(),
                None => return Err(BindingError::MissingSite),
            };
            let desired = template.with_site(site.clone());

            for identifier in &part.identifiers {
                if identifier.kind() != IdentifierKind::Dns {
                    debug!(identifier = %identifier, "Skipping identifier without a host binding");
                    continue;
                }
                let host = identifier.value();
                if found.iter().any(|f| fits(f, host, template.flags()) > 0) {
                    debug!(host = %host, "Host already covered");
                    continue;
                }
                // Refused hosts are not retried within the pass
                found.extend(pass.cover(&site, host, &desired)?);
            }
        }

        let changed = pass.session.changes();
        let committed = pass.session.commit()?;
        if changed > 0 {
            info!(changed = changed, "Bindings reconciled");
        } else {
            debug!("Bindings already up to date");
        }
        Ok(ReconcileOutcome { changed, committed })
    }
}

struct Pass<'a> {
    session: ConfigSession<'a>,
    capabilities: ServerCapabilities,
    thumbprint: Thumbprint,
    /// Replaced certificate while its bindings are being moved; those
    /// bindings never conflict with each other
    owned: Option<Thumbprint>,
}

impl Pass<'_> {
    /// Serve `host` from the best-fitting bindings of `site`, or a new one
    ///
    /// Returns the hosts of the bindings now serving the certificate.
    fn cover(
        &mut self,
        site: &SiteId,
        host: &str,
        desired: &BindingOptions,
    ) -> Result<Vec<String>, BindingError> {
        let candidates: Vec<(ExistingBinding, i32)> = self
            .session
            .bindings()
            .into_iter()
            .filter(|b| &b.site == site)
            .map(|b| {
                let score = fits(&b.host, host, desired.flags());
                (b, score)
            })
            .filter(|(_, score)| *score > 0)
            .collect();

        let mut best: Option<&(ExistingBinding, i32)> = None;
        for candidate in &candidates {
            if best.map_or(true, |(_, score)| candidate.1 > *score) {
                best = Some(candidate);
            }
        }

        let mut touched = Vec::new();
        if let Some((best, score)) = best {
            debug!(
                host = %host,
                binding_host = %best.host,
                score = score,
                "Best matching bindings"
            );
            let group: Vec<&ExistingBinding> = candidates
                .iter()
                .map(|(b, _)| b)
                .filter(|b| b.host.eq_ignore_ascii_case(&best.host))
                .collect();

            for binding in group {
                match binding.protocol {
                    Protocol::Https => {
                        if self.update(binding, desired)? != Update::Refused {
                            touched.push(binding.host.clone());
                        }
                    }
                    Protocol::Http => {
                        let options = desired
                            .with_host(binding.host.clone())
                            .with_ip(binding.ip.clone());
                        if self.add(&options)? {
                            touched.push(binding.host.clone());
                        }
                    }
                }
            }
        }

        if touched.is_empty() && self.add(&desired.with_host(host))? {
            touched.push(host.to_string());
        }
        Ok(touched)
    }

    /// Create a new HTTPS binding; `Ok(false)` when it was refused
    ///
    /// A refusal because an identical binding already exists counts as
    /// present.
    fn add(&mut self, options: &BindingOptions) -> Result<bool, BindingError> {
        match self.admit(options) {
            Ok(()) => {}
            Err(Refusal::Duplicate) => {
                debug!(binding = %options.binding_information(), "Binding already exists");
                return Ok(true);
            }
            Err(refusal) => {
                warn!(
                    binding = %options.binding_information(),
                    reason = ?refusal,
                    "Refusing to create binding"
                );
                return Ok(false);
            }
        }

        let flags = self.new_binding_flags(options.host(), options.flags());
        let options = options.with_flags(flags);
        self.session.add_binding(&options)?;
        info!(
            site = ?options.site(),
            binding = %options.binding_information(),
            flags = ?flags,
            "Added HTTPS binding"
        );
        Ok(true)
    }

    fn admit(&self, options: &BindingOptions) -> Result<(), Refusal> {
        if options.host().starts_with("*.") && !self.capabilities.supports_wildcard_bindings {
            return Err(Refusal::WildcardUnsupported);
        }

        let bindings = self.session.bindings();
        let information = options.binding_information();
        if bindings
            .iter()
            .any(|b| b.is_https() && b.binding_information() == information)
        {
            return Err(Refusal::Duplicate);
        }

        if !self.capabilities.supports_sni
            && bindings
                .iter()
                .any(|b| b.is_https() && b.endpoint() == (options.ip(), options.port()))
        {
            return Err(Refusal::SniUnsupported);
        }
        Ok(())
    }

    /// Point `existing` at the new certificate
    fn update(
        &mut self,
        existing: &ExistingBinding,
        desired: &BindingOptions,
    ) -> Result<Update, BindingError> {
        let central = SslFlags::CENTRAL_CERT_STORE;
        let mut flags = existing.flags.without(central) | desired.flags().without(SslFlags::SNI);
        if !desired.flags().contains(central) {
            flags = flags.without(central);
        }

        if !flags.contains(SslFlags::SNI) && self.conflicts(existing) {
            if existing.host.is_empty() || !self.capabilities.supports_sni {
                warn!(
                    site = %existing.site,
                    binding = %existing.binding_information(),
                    "Update would conflict with other bindings on the same endpoint"
                );
                return Ok(Update::Refused);
            }
            debug!(
                binding = %existing.binding_information(),
                "Enabling SNI to avoid endpoint conflict"
            );
            flags |= SslFlags::SNI;
        }
        let flags = self.strip_sni(&existing.host, flags);

        if existing.thumbprint.as_ref() == Some(&self.thumbprint)
            && existing.store.as_deref() == desired.store()
            && existing.flags == flags
        {
            debug!(binding = %existing.binding_information(), "Binding already up to date");
            return Ok(Update::Unchanged);
        }

        let options = desired
            .with_host(existing.host.clone())
            .with_ip(existing.ip.clone())
            .with_port(existing.port)
            .with_flags(flags);
        self.session.update_binding(existing, &options)?;
        info!(
            site = %existing.site,
            binding = %existing.binding_information(),
            flags = ?flags,
            "Updated HTTPS binding"
        );
        Ok(Update::Changed)
    }

    /// Another non-SNI HTTPS binding on the same endpoint serves a different certificate
    fn conflicts(&self, existing: &ExistingBinding) -> bool {
        let information = existing.binding_information();
        self.session.bindings().iter().any(|other| {
            let moving = self.owned.is_some() && other.thumbprint == self.owned;
            other.is_https()
                && other.endpoint() == existing.endpoint()
                && other.binding_information() != information
                && !other.flags.contains(SslFlags::SNI)
                && other.thumbprint.as_ref() != Some(&self.thumbprint)
                && !moving
        })
    }

    fn new_binding_flags(&self, host: &str, flags: SslFlags) -> SslFlags {
        let flags = if host.is_empty() {
            flags
        } else if self.capabilities.supports_sni {
            flags | SslFlags::SNI
        } else {
            flags
        };
        self.strip_sni(host, flags)
    }

    fn strip_sni(&self, host: &str, flags: SslFlags) -> SslFlags {
        if host.is_empty() || !self.capabilities.supports_sni {
            flags.without(SslFlags::SNI)
        } else {
            flags
        }
    }
}
