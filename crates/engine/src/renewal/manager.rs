//! Renewal loop
//!
//! Processes renewals strictly one at a time: resolve plugins, decide
//! whether the renewal is due, issue, store, install, clean up, persist the
//! result. A failure (or panic) in one renewal is recorded on that renewal
//! and the loop moves on.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use certbind_config::{RenewalSettings, Settings};

use super::{RenewResult, Renewal, RunLevel};
use crate::acme::{ChallengePolicy, IssuanceClient, OrderError, OrderOrchestrator};
use crate::bindings::{BindingError, BindingReconciler};
use crate::resolver::{PluginResolver, ResolveError};
use crate::store::{RenewalStore, StorageError};

/// Why a renewal attempt failed outside the order itself
#[derive(Debug, Error)]
enum RenewError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error("Failed to store certificate: {0}")]
    Store(#[from] StorageError),

    #[error("Failed to install certificate: {0}")]
    Install(#[from] BindingError),
}

impl From<RenewError> for RenewResult {
    fn from(err: RenewError) -> Self {
        match err {
            RenewError::Order(e) => RenewResult::from(e),
            other => RenewResult::failure(other.to_string()),
        }
    }
}

/// Counts from one pass over all renewals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenewalSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RenewalSummary {
    /// Renewals looked at, due or not
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }
}

/// Runs stored renewals end to end
///
/// One renewal at a time: resolve plugins, issue, store, install, drop the
/// replaced certificate and persist the result. A failing or panicking
/// renewal is recorded and the pass moves on to the next one.
pub struct RenewalManager {
    client: Arc<dyn IssuanceClient>,
    resolver: PluginResolver,
    renewals: Arc<dyn RenewalStore>,
    policy: ChallengePolicy,
    settings: RenewalSettings,
}

impl RenewalManager {
    /// Create a renewal manager
    ///
    /// # Arguments
    ///
    /// * `client` - CA client used for every order
    /// * `resolver` - Turns each renewal's stored options into plugins
    /// * `renewals` - Where renewals are loaded from and results persisted to
    /// * `settings` - Supplies the due threshold, retention and poll budget
    pub fn new(
        client: Arc<dyn IssuanceClient>,
        resolver: PluginResolver,
        renewals: Arc<dyn RenewalStore>,
        settings: &Settings,
    ) -> Self {
        Self {
            client,
            resolver,
            renewals,
            policy: ChallengePolicy::from(&settings.challenge),
            settings: settings.renewal.clone(),
        }
    }

    pub fn resolver(&self) -> &PluginResolver {
        &self.resolver
    }

    /// Run every stored renewal that is due
    ///
    /// # Errors
    ///
    /// Only fails when the renewals cannot be loaded. Failures of single
    /// renewals are counted in the summary and recorded in their history.
    pub async fn renew_all(&self, run_level: RunLevel) -> Result<RenewalSummary, StorageError> {
        let renewals = self.renewals.load_all()?;
        info!(
            count = renewals.len(),
            forced = run_level.force_renewal,
            unattended = run_level.unattended,
            "Checking renewals"
        );

        let mut summary = RenewalSummary::default();
        for mut renewal in renewals {
            match self.renew(&mut renewal, run_level).await {
                Some(result) if result.success => summary.succeeded += 1,
                Some(_) => summary.failed += 1,
                None => summary.skipped += 1,
            }
        }

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "Renewal pass complete"
        );
        Ok(summary)
    }

    /// Renew one certificate and persist the outcome
    ///
    /// Returns `None` when the renewal was not due; nothing is recorded in
    /// that case.
    pub async fn renew(&self, renewal: &mut Renewal, run_level: RunLevel) -> Option<RenewResult> {
        let attempt = AssertUnwindSafe(self.execute(renewal, run_level)).catch_unwind().await;
        let result = match attempt {
            Ok(Ok(Some(result))) => result,
            Ok(Ok(None)) => return None,
            Ok(Err(result)) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(renewal = %renewal.id, panic = %message, "Renewal panicked");
                RenewResult::failure(format!("Unexpected error: {message}"))
            }
        };

        if result.success {
            info!(
                renewal = %renewal.id,
                name = %renewal.friendly_name,
                thumbprint = ?result.thumbprint,
                warnings = result.warnings.len(),
                "Renewal succeeded"
            );
        } else {
            error!(
                renewal = %renewal.id,
                name = %renewal.friendly_name,
                error = ?result.error_message,
                "Renewal failed"
            );
        }

        if let Err(e) = self.renewals.save(renewal, result.clone()) {
            error!(renewal = %renewal.id, error = %e, "Failed to persist renewal result");
        }
        Some(result)
    }

    /// `Ok(None)` when skipped; failures are returned as a result to record
    async fn execute(
        &self,
        renewal: &Renewal,
        run_level: RunLevel,
    ) -> Result<Option<RenewResult>, RenewResult> {
        let target = self
            .resolver
            .target(&renewal.target)
            .map_err(|e| RenewResult::from(RenewError::from(e)))?;
        let fingerprint = target.fingerprint();
        let fail = |err: RenewError| RenewResult::from(err).with_fingerprint(fingerprint.clone());

        let due = renewal.is_due(Utc::now(), self.settings.days);
        let changed = renewal.target_changed(&fingerprint);
        if !due && !changed && !run_level.force_renewal {
            info!(
                renewal = %renewal.id,
                name = %renewal.friendly_name,
                due = ?renewal.due_date(self.settings.days),
                "Renewal not due, skipping"
            );
            return Ok(None);
        }
        if changed {
            info!(renewal = %renewal.id, "Target changed since last renewal");
        }
        debug!(renewal = %renewal.id, due = due, forced = run_level.force_renewal, "Renewing");

        let validation = self
            .resolver
            .validation(&renewal.validation)
            .map_err(|e| fail(e.into()))?;
        let csr = self.resolver.csr(&renewal.csr);
        let store = self
            .resolver
            .store(&renewal.store)
            .map_err(|e| fail(e.into()))?;
        let installation = self
            .resolver
            .installation(&renewal.installation)
            .map_err(|e| fail(e.into()))?;

        let certificate = OrderOrchestrator::new(
            self.client.as_ref(),
            validation.as_ref(),
            csr.as_ref(),
            &self.policy,
        )
        .issue(&target, run_level.force_validation)
        .await
        .map_err(|e| fail(e.into()))?;

        store.install(&certificate).map_err(|e| fail(e.into()))?;

        let keep_existing = renewal.keep_existing || self.settings.keep_existing;
        let previous = renewal.current_thumbprint();
        if let Some(installation) = installation {
            let template = installation
                .template
                .with_thumbprint(certificate.thumbprint.clone())
                .with_store(store.name());
            let installed =
                BindingReconciler::new(installation.server).install(&target, &template, previous);
            if let Err(e) = installed {
                let mut result = fail(e.into());
                // Nothing refers to the new certificate once the session is discarded
                if !keep_existing {
                    if let Err(e) = store.remove(&certificate.thumbprint) {
                        warn!(
                            renewal = %renewal.id,
                            thumbprint = %certificate.thumbprint,
                            error = %e,
                            "Failed to remove uninstalled certificate"
                        );
                        result.add_warning(format!(
                            "Unable to remove uninstalled certificate {}: {e}",
                            certificate.thumbprint
                        ));
                    }
                }
                return Err(result);
            }
        }

        let mut result = RenewResult::succeeded(certificate.thumbprint.clone())
            .with_fingerprint(fingerprint.clone());

        let replaced = previous.filter(|p| !keep_existing && **p != certificate.thumbprint);
        if let Some(previous) = replaced {
            if let Err(e) = store.remove(previous) {
                warn!(
                    renewal = %renewal.id,
                    thumbprint = %previous,
                    error = %e,
                    "Failed to remove replaced certificate"
                );
                result.add_warning(format!(
                    "Unable to remove previous certificate {previous}: {e}"
                ));
            }
        }

        Ok(Some(result))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::{AuthorizationStatus, ChallengeStatus};
    use crate::bindings::{
        ExistingBinding, MemoryWebServer, ServerCapabilities, ServerSession, Site, SslFlags,
        WebServer,
    };
    use crate::certificate::Thumbprint;
    use crate::renewal::{InstallationOptions, TargetOptions, ValidationOptions};
    use crate::store::{CertificateStore, FileCertificateStore, JsonRenewalStore};
    use crate::testing::{authorization, FakeClient, MemoryRenewalStore};
    use certbind_common::SiteId;
    use chrono::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _temp_dir: TempDir,
        settings: Settings,
        client: Arc<FakeClient>,
        server: Arc<MemoryWebServer>,
        renewals: Arc<MemoryRenewalStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let temp_dir = TempDir::new().unwrap();
            let mut settings = Settings::default();
            settings.storage.path = temp_dir.path().to_path_buf();
            let server = Arc::new(MemoryWebServer::default().with_site(site()));
            Self {
                _temp_dir: temp_dir,
                settings,
                client: Arc::new(FakeClient::new()),
                server,
                renewals: Arc::new(MemoryRenewalStore::default()),
            }
        }

        fn manager(&self) -> RenewalManager {
            let resolver = PluginResolver::new(&self.settings).with_web_server(self.server.clone());
            RenewalManager::new(
                self.client.clone(),
                resolver,
                self.renewals.clone(),
                &self.settings,
            )
        }

        fn certificates(&self) -> FileCertificateStore {
            FileCertificateStore::new("My", &self.settings.storage.certificates_path()).unwrap()
        }

        /// CA that accepts the next order for `host` immediately
        fn accept(&self, host: &str) {
            self.client
                .add_authorization(authorization(host, AuthorizationStatus::Pending));
            self.client.script_challenge(&[ChallengeStatus::Valid]);
        }
    }

    fn site() -> Site {
        Site::new("1", "Default Web Site").with_binding(ExistingBinding::http(
            SiteId::new("1"),
            "*",
            80,
            "a.example.com",
        ))
    }

    /// Server whose configuration cannot be changed
    struct LockedServer(MemoryWebServer);

    impl WebServer for LockedServer {
        fn capabilities(&self) -> ServerCapabilities {
            self.0.capabilities()
        }

        fn sites(&self) -> Result<Vec<Site>, BindingError> {
            self.0.sites()
        }

        fn open_session(&self) -> Result<Box<dyn ServerSession + '_>, BindingError> {
            Err(BindingError::Server("configuration is locked".to_string()))
        }
    }

    fn locked_manager(fixture: &Fixture) -> RenewalManager {
        let server = Arc::new(LockedServer(MemoryWebServer::default().with_site(site())));
        RenewalManager::new(
            fixture.client.clone(),
            PluginResolver::new(&fixture.settings).with_web_server(server),
            fixture.renewals.clone(),
            &fixture.settings,
        )
    }

    fn renewal(host: &str) -> Renewal {
        let mut renewal = Renewal::new(host, TargetOptions::site("1"), ValidationOptions::Http01);
        renewal.installation = InstallationOptions::Bindings {
            site: None,
            ip: None,
            port: None,
            flags: SslFlags::NONE,
        };
        renewal
    }

    fn succeeded_days_ago(
        renewal: &mut Renewal,
        days: i64,
        thumbprint: Thumbprint,
        fingerprint: String,
    ) {
        let mut result = RenewResult::succeeded(thumbprint).with_fingerprint(fingerprint);
        result.date = Utc::now() - Duration::days(days);
        renewal.history.push(result);
    }

    #[tokio::test]
    async fn test_first_renewal_issues_and_installs() {
        let fixture = Fixture::new();
        fixture.accept("a.example.com");
        let mut renewal = renewal("a");

        let result = fixture
            .manager()
            .renew(&mut renewal, RunLevel::unattended())
            .await
            .unwrap();

        assert!(result.success, "{:?}", result.error_message);
        let thumbprint = result.thumbprint.clone().unwrap();
        assert!(fixture.certificates().find(&thumbprint).unwrap().is_some());

        let https: Vec<ExistingBinding> =
            fixture.server.bindings().into_iter().filter(|b| b.is_https()).collect();
        assert_eq!(https.len(), 1);
        assert_eq!(https[0].thumbprint, Some(thumbprint));
        assert_eq!(https[0].store.as_deref(), Some("My"));

        assert_eq!(renewal.history.len(), 1);
        assert_eq!(fixture.renewals.saved(), 1);
    }

    #[tokio::test]
    async fn test_not_due_and_unchanged_is_skipped() {
        let fixture = Fixture::new();
        let manager = fixture.manager();
        let mut renewal = renewal("a");
        let fingerprint = manager.resolver().target(&renewal.target).unwrap().fingerprint();
        succeeded_days_ago(&mut renewal, 5, Thumbprint::from_bytes(vec![1; 32]), fingerprint);

        let result = manager.renew(&mut renewal, RunLevel::default()).await;

        assert!(result.is_none());
        assert_eq!(renewal.history.len(), 1);
        assert_eq!(fixture.renewals.saved(), 0);
        assert_eq!(fixture.client.orders(), 0);
    }

    #[tokio::test]
    async fn test_changed_target_renews_early() {
        let fixture = Fixture::new();
        fixture.accept("a.example.com");
        let mut renewal = renewal("a");
        succeeded_days_ago(
            &mut renewal,
            5,
            Thumbprint::from_bytes(vec![1; 32]),
            "stale".to_string(),
        );

        let result = fixture.manager().renew(&mut renewal, RunLevel::default()).await.unwrap();

        assert!(result.success, "{:?}", result.error_message);
        assert_eq!(fixture.client.orders(), 1);
    }

    #[tokio::test]
    async fn test_forced_renewal() {
        let fixture = Fixture::new();
        fixture.accept("a.example.com");
        let manager = fixture.manager();
        let mut renewal = renewal("a");
        let fingerprint = manager.resolver().target(&renewal.target).unwrap().fingerprint();
        succeeded_days_ago(&mut renewal, 1, Thumbprint::from_bytes(vec![1; 32]), fingerprint);

        let result = manager.renew(&mut renewal, RunLevel::forced()).await.unwrap();
        assert!(result.success, "{:?}", result.error_message);
    }

    #[tokio::test]
    async fn test_replaced_certificate_removed() {
        let fixture = Fixture::new();
        let manager = fixture.manager();
        let mut renewal = renewal("a");

        fixture.accept("a.example.com");
        let first = manager.renew(&mut renewal, RunLevel::forced()).await.unwrap();
        fixture.accept("a.example.com");
        let second = manager.renew(&mut renewal, RunLevel::forced()).await.unwrap();

        let old = first.thumbprint.unwrap();
        let new = second.thumbprint.unwrap();
        assert_ne!(old, new);
        assert!(second.warnings.is_empty());
        let store = fixture.certificates();
        assert!(store.find(&old).unwrap().is_none());
        assert!(store.find(&new).unwrap().is_some());

        // Binding moved to the new certificate
        let https: Vec<ExistingBinding> =
            fixture.server.bindings().into_iter().filter(|b| b.is_https()).collect();
        assert_eq!(https.len(), 1);
        assert_eq!(https[0].thumbprint, Some(new));
    }

    #[tokio::test]
    async fn test_keep_existing() {
        let fixture = Fixture::new();
        let manager = fixture.manager();
        let mut renewal = renewal("a");
        renewal.keep_existing = true;

        fixture.accept("a.example.com");
        let first = manager.renew(&mut renewal, RunLevel::forced()).await.unwrap();
        fixture.accept("a.example.com");
        manager.renew(&mut renewal, RunLevel::forced()).await.unwrap();

        assert!(fixture
            .certificates()
            .find(&first.thumbprint.unwrap())
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_cleanup_failure_is_a_warning() {
        let fixture = Fixture::new();
        fixture.accept("a.example.com");
        let mut renewal = renewal("a");
        // Previous certificate was never in this store
        succeeded_days_ago(&mut renewal, 60, Thumbprint::from_bytes(vec![7; 32]), "f".to_string());

        let result = fixture.manager().renew(&mut renewal, RunLevel::default()).await.unwrap();

        assert!(result.success);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("Unable to remove previous certificate"));
    }

    #[tokio::test]
    async fn test_order_failure_recorded() {
        let fixture = Fixture::new();
        fixture
            .client
            .add_authorization(authorization("a.example.com", AuthorizationStatus::Pending));
        fixture.client.script_challenge(&[ChallengeStatus::Invalid]);
        let mut renewal = renewal("a");

        let result = fixture.manager().renew(&mut renewal, RunLevel::default()).await.unwrap();

        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("Authorization failed"));
        assert!(result.fingerprint.is_some());
        assert_eq!(fixture.client.issued(), 0);
        assert_eq!(renewal.history.len(), 1);
        assert!(fixture.server.bindings().iter().all(|b| !b.is_https()));
    }

    #[tokio::test]
    async fn test_failed_install_removes_new_certificate() {
        let fixture = Fixture::new();
        fixture.accept("a.example.com");
        let mut renewal = renewal("a");

        let result = locked_manager(&fixture)
            .renew(&mut renewal, RunLevel::default())
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result
            .error_message
            .unwrap()
            .contains("Failed to install certificate"));
        assert!(result.warnings.is_empty());
        assert_eq!(fixture.client.issued(), 1);
        assert!(fixture.certificates().list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_install_keeps_certificate_when_retained() {
        let fixture = Fixture::new();
        fixture.accept("a.example.com");
        let mut renewal = renewal("a");
        renewal.keep_existing = true;

        let result = locked_manager(&fixture)
            .renew(&mut renewal, RunLevel::default())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(fixture.certificates().list().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_failure_recorded() {
        let fixture = Fixture::new();
        let mut renewal = renewal("a");
        renewal.validation = ValidationOptions::Dns01 {
            provider: "missing".to_string(),
        };

        let result = fixture.manager().renew(&mut renewal, RunLevel::default()).await.unwrap();

        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("missing"));
        assert_eq!(fixture.client.orders(), 0);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let fixture = Fixture::new();
        fixture.client.panic_on_order();
        let mut renewal = renewal("a");

        let result = fixture.manager().renew(&mut renewal, RunLevel::default()).await.unwrap();

        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("Unexpected error"));
        assert_eq!(renewal.history.len(), 1);
    }

    #[tokio::test]
    async fn test_renew_all_isolates_failures() {
        let fixture = Fixture::new();
        let manager = fixture.manager();

        let mut skipped = renewal("skipped");
        let fingerprint = manager.resolver().target(&skipped.target).unwrap().fingerprint();
        succeeded_days_ago(&mut skipped, 1, Thumbprint::from_bytes(vec![1; 32]), fingerprint);
        let mut broken = renewal("broken");
        broken.validation = ValidationOptions::Dns01 {
            provider: "missing".to_string(),
        };
        let working = renewal("working");
        fixture.renewals.insert(skipped);
        fixture.renewals.insert(broken);
        fixture.renewals.insert(working);
        fixture.accept("a.example.com");

        let summary = manager.renew_all(RunLevel::unattended()).await.unwrap();

        assert_eq!(
            summary,
            RenewalSummary {
                succeeded: 1,
                failed: 1,
                skipped: 1
            }
        );
        assert_eq!(summary.total(), 3);
        assert_eq!(fixture.renewals.saved(), 2);
    }

    #[tokio::test]
    async fn test_renew_all_with_json_store() {
        let fixture = Fixture::new();
        let store =
            Arc::new(JsonRenewalStore::new(&fixture.settings.storage.renewals_path()).unwrap());
        store.write(&renewal("a")).unwrap();
        fixture.accept("a.example.com");
        let manager = RenewalManager::new(
            fixture.client.clone(),
            PluginResolver::new(&fixture.settings).with_web_server(fixture.server.clone()),
            store.clone(),
            &fixture.settings,
        );

        let summary = manager.renew_all(RunLevel::default()).await.unwrap();
        assert_eq!(summary.succeeded, 1);

        let reloaded = store.load_all().unwrap();
        assert_eq!(reloaded[0].history.len(), 1);
        assert!(reloaded[0].history[0].success);
    }
}
