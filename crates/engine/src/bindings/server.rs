//! Server configuration seam
//!
//! Changes are made through a session opened once per reconciliation pass.
//! [`ConfigSession`] commits it explicitly or discards it when dropped.

use tracing::{debug, info};

use certbind_common::SiteId;

use super::model::{BindingOptions, ExistingBinding};
use super::BindingError;

/// What the server platform can express
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerCapabilities {
    /// Several certificates on one ip:port, selected by host
    pub supports_sni: bool,
    /// Bindings whose host is `*.domain`
    pub supports_wildcard_bindings: bool,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            supports_sni: true,
            supports_wildcard_bindings: true,
        }
    }
}

/// A site and its bindings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    pub id: SiteId,
    pub name: String,
    pub bindings: Vec<ExistingBinding>,
}

impl Site {
    pub fn new(id: impl Into<SiteId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            bindings: Vec::new(),
        }
    }

    pub fn with_binding(mut self, binding: ExistingBinding) -> Self {
        self.bindings.push(binding);
        self
    }
}

/// A web server whose TLS bindings can be managed
pub trait WebServer: Send + Sync {
    fn capabilities(&self) -> ServerCapabilities;

    /// Current sites, outside any session
    fn sites(&self) -> Result<Vec<Site>, BindingError>;

    /// Start a configuration session
    fn open_session(&self) -> Result<Box<dyn ServerSession + '_>, BindingError>;
}

/// Pending configuration changes
pub trait ServerSession {
    /// Every binding on every site, including changes made in this session
    fn bindings(&self) -> Vec<ExistingBinding>;

    fn add_binding(&mut self, options: &BindingOptions) -> Result<(), BindingError>;

    /// Replace certificate, store and flags of `existing` with those in `options`
    fn update_binding(
        &mut self,
        existing: &ExistingBinding,
        options: &BindingOptions,
    ) -> Result<(), BindingError>;

    fn commit(&mut self) -> Result<(), BindingError>;

    fn discard(&mut self);
}

/// Scoped session guard
///
/// Counts changes as they are made. Dropping without [`commit`](Self::commit)
/// discards everything.
pub struct ConfigSession<'a> {
    session: Box<dyn ServerSession + 'a>,
    changes: usize,
    finished: bool,
}

impl<'a> ConfigSession<'a> {
    /// Start staging changes against `server`
    ///
    /// # Errors
    ///
    /// Whatever the server reports when it cannot open a session, for
    /// example because its configuration is locked.
    pub fn open(server: &'a dyn WebServer) -> Result<Self, BindingError> {
        let session = server.open_session()?;
        debug!("Opened server configuration session");
        Ok(Self {
            session,
            changes: 0,
            finished: false,
        })
    }

    /// Bindings including changes staged so far
    pub fn bindings(&self) -> Vec<ExistingBinding> {
        self.session.bindings()
    }

    pub fn add_binding(&mut self, options: &BindingOptions) -> Result<(), BindingError> {
        self.session.add_binding(options)?;
        self.changes += 1;
        Ok(())
    }

    pub fn update_binding(
        &mut self,
        existing: &ExistingBinding,
        options: &BindingOptions,
    ) -> Result<(), BindingError> {
        self.session.update_binding(existing, options)?;
        self.changes += 1;
        Ok(())
    }

    pub fn changes(&self) -> usize {
        self.changes
    }

    /// Commit if anything changed, otherwise discard
    ///
    /// Returns whether a commit took place.
    pub fn commit(mut self) -> Result<bool, BindingError> {
        if self.changes == 0 {
            debug!("No binding changes, discarding session");
            return Ok(false);
        }
        self.session.commit()?;
        self.finished = true;
        info!(changes = self.changes, "Committed binding changes");
        Ok(true)
    }
}

impl Drop for ConfigSession<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.session.discard();
            debug!(changes = self.changes, "Discarded server configuration session");
        }
    }
}
