//! In-memory web server
//!
//! Holds sites and bindings in process. Used for dry runs and tests; a
//! session works on a copy that replaces the live state on commit.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use super::model::{BindingOptions, ExistingBinding, Protocol};
use super::server::{ServerCapabilities, ServerSession, Site, WebServer};
use super::BindingError;

/// Web server held in memory
///
/// Sessions work on a copy of the sites that replaces the live sites on
/// commit. Used in tests and as a reference for real server adapters.
#[derive(Debug, Default)]
pub struct MemoryWebServer {
    capabilities: ServerCapabilities,
    sites: Mutex<Vec<Site>>,
    commits: AtomicUsize,
    discards: AtomicUsize,
}

impl MemoryWebServer {
    pub fn new(capabilities: ServerCapabilities) -> Self {
        Self {
            capabilities,
            ..Self::default()
        }
    }

    pub fn with_site(self, site: Site) -> Self {
        self.sites.lock().push(site);
        self
    }

    /// Live bindings across all sites
    pub fn bindings(&self) -> Vec<ExistingBinding> {
        self.sites
            .lock()
            .iter()
            .flat_map(|site| site.bindings.iter().cloned())
            .collect()
    }

    /// Sessions committed so far
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::Relaxed)
    }

    pub fn discards(&self) -> usize {
        self.discards.load(Ordering::Relaxed)
    }
}

impl WebServer for MemoryWebServer {
    fn capabilities(&self) -> ServerCapabilities {
        self.capabilities
    }

    fn sites(&self) -> Result<Vec<Site>, BindingError> {
        Ok(self.sites.lock().clone())
    }

    fn open_session(&self) -> Result<Box<dyn ServerSession + '_>, BindingError> {
        Ok(Box::new(MemorySession {
            server: self,
            staged: self.sites.lock().clone(),
        }))
    }
}

struct MemorySession<'a> {
    server: &'a MemoryWebServer,
    staged: Vec<Site>,
}

impl MemorySession<'_> {
    fn site_mut(&mut self, options: &BindingOptions) -> Result<&mut Site, BindingError> {
        let id = options.site().ok_or(BindingError::MissingSite)?;
        self.staged
            .iter_mut()
            .find(|site| &site.id == id)
            .ok_or_else(|| BindingError::UnknownSite(id.clone()))
    }
}

impl ServerSession for MemorySession<'_> {
    fn bindings(&self) -> Vec<ExistingBinding> {
        self.staged
            .iter()
            .flat_map(|site| site.bindings.iter().cloned())
            .collect()
    }

    fn add_binding(&mut self, options: &BindingOptions) -> Result<(), BindingError> {
        let site = self.site_mut(options)?;
        site.bindings.push(ExistingBinding {
            site: site.id.clone(),
            protocol: Protocol::Https,
            ip: options.ip().to_string(),
            port: options.port(),
            host: options.host().to_string(),
            thumbprint: options.thumbprint().cloned(),
            store: options.store().map(str::to_string),
            flags: options.flags(),
        });
        Ok(())
    }

    fn update_binding(
        &mut self,
        existing: &ExistingBinding,
        options: &BindingOptions,
    ) -> Result<(), BindingError> {
        let binding = self
            .staged
            .iter_mut()
            .filter(|site| site.id == existing.site)
            .flat_map(|site| site.bindings.iter_mut())
            .find(|b| {
                b.protocol == existing.protocol
                    && b.binding_information() == existing.binding_information()
            })
            .ok_or_else(|| BindingError::NotFound(existing.binding_information()))?;

        binding.thumbprint = options.thumbprint().cloned();
        binding.store = options.store().map(str::to_string);
        binding.flags = options.flags();
        Ok(())
    }

    fn commit(&mut self) -> Result<(), BindingError> {
        *self.server.sites.lock() = std::mem::take(&mut self.staged);
        self.server.commits.fetch_add(1, Ordering::Relaxed);
        debug!("Committed in-memory server configuration");
        Ok(())
    }

    fn discard(&mut self) {
        self.staged.clear();
        self.server.discards.fetch_add(1, Ordering::Relaxed);
    }
}
