//! Renewal records and the renewal loop
//!
//! A [`Renewal`] is the persisted description of one certificate to keep
//! current. Every attempt appends a [`RenewResult`] to its history; the
//! history is never pruned.

mod manager;
mod options;

pub use manager::{RenewalManager, RenewalSummary};
pub use options::{CsrOptions, InstallationOptions, StoreOptions, TargetOptions, ValidationOptions};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use certbind_common::RenewalId;

use crate::acme::Problem;
use crate::certificate::Thumbprint;

/// Days after a successful renewal before it is due again
pub const DEFAULT_RENEWAL_DAYS: u32 = 55;

/// Outcome of one renewal attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenewResult {
    pub date: DateTime<Utc>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbprint: Option<Thumbprint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Non-fatal problems, e.g. a replaced certificate that could not be removed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Target fingerprint when the attempt was made
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem: Option<Problem>,
}

impl RenewResult {
    /// Successful attempt that put `thumbprint` in service
    pub fn succeeded(thumbprint: Thumbprint) -> Self {
        Self {
            date: Utc::now(),
            success: true,
            thumbprint: Some(thumbprint),
            error_message: None,
            warnings: Vec::new(),
            fingerprint: None,
            problem: None,
        }
    }

    /// Failed attempt with one human-readable reason
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            date: Utc::now(),
            success: false,
            thumbprint: None,
            error_message: Some(message.into()),
            warnings: Vec::new(),
            fingerprint: None,
            problem: None,
        }
    }

    pub fn with_problem(mut self, problem: Option<Problem>) -> Self {
        self.problem = problem;
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    /// Record a non-fatal problem; `success` is left as it is
    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }
}

/// Per-invocation switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunLevel {
    /// Renew even when not yet due
    pub force_renewal: bool,
    /// Re-prove authorizations the CA already considers valid
    pub force_validation: bool,
    /// No operator is present
    pub unattended: bool,
}

impl RunLevel {
    /// Scheduled run: only due renewals, nothing forced
    pub fn unattended() -> Self {
        Self {
            unattended: true,
            ..Self::default()
        }
    }

    pub fn forced() -> Self {
        Self {
            force_renewal: true,
            ..Self::default()
        }
    }
}

/// A persisted renewal configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Renewal {
    pub id: RenewalId,
    pub friendly_name: String,
    pub target: TargetOptions,
    pub validation: ValidationOptions,
    #[serde(default)]
    pub csr: CsrOptions,
    #[serde(default)]
    pub store: StoreOptions,
    #[serde(default)]
    pub installation: InstallationOptions,
    /// Keep replaced certificates in the store
    #[serde(default)]
    pub keep_existing: bool,
    #[serde(default)]
    pub history: Vec<RenewResult>,
}

impl Renewal {
    /// New renewal with a generated ID, default plugins and no history
    ///
    /// # Arguments
    ///
    /// * `friendly_name` - Name shown in logs
    /// * `target` - Which identifiers the certificate covers
    /// * `validation` - How control of those identifiers is proven
    pub fn new(
        friendly_name: impl Into<String>,
        target: TargetOptions,
        validation: ValidationOptions,
    ) -> Self {
        Self {
            id: RenewalId::generate(),
            friendly_name: friendly_name.into(),
            target,
            validation,
            csr: CsrOptions::default(),
            store: StoreOptions::default(),
            installation: InstallationOptions::default(),
            keep_existing: false,
            history: Vec::new(),
        }
    }

    /// Most recent successful result in the history
    pub fn last_success(&self) -> Option<&RenewResult> {
        self.history.iter().rev().find(|result| result.success)
    }

    /// Thumbprint of the certificate currently in service
    pub fn current_thumbprint(&self) -> Option<&Thumbprint> {
        self.last_success().and_then(|result| result.thumbprint.as_ref())
    }

    /// When the renewal next becomes due; `None` if it never succeeded
    pub fn due_date(&self, renewal_days: u32) -> Option<DateTime<Utc>> {
        self.last_success()
            .map(|result| result.date + Duration::days(i64::from(renewal_days)))
    }

    /// Due when it never succeeded or the last success is `renewal_days` old
    pub fn is_due(&self, now: DateTime<Utc>, renewal_days: u32) -> bool {
        self.due_date(renewal_days).map_or(true, |due| due <= now)
    }

    /// Whether `fingerprint` differs from the one recorded at the last success
    ///
    /// Results recorded without a fingerprint are treated as unchanged.
    pub fn target_changed(&self, fingerprint: &str) -> bool {
        self.last_success()
            .and_then(|result| result.fingerprint.as_deref())
            .is_some_and(|previous| previous != fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renewal() -> Renewal {
        Renewal::new(
            "example",
            TargetOptions::manual(["a.example.com"]),
            ValidationOptions::Http01,
        )
    }

    fn success_at(days_ago: i64, fingerprint: &str) -> RenewResult {
        let mut result = RenewResult::succeeded(Thumbprint::from_bytes(vec![days_ago as u8]))
            .with_fingerprint(fingerprint);
        result.date = Utc::now() - Duration::days(days_ago);
        result
    }

    #[test]
    fn test_never_renewed_is_due() {
        assert!(renewal().is_due(Utc::now(), DEFAULT_RENEWAL_DAYS));
    }

    #[test]
    fn test_due_after_renewal_days() {
        let mut renewal = renewal();
        renewal.history.push(success_at(10, "f"));
        assert!(!renewal.is_due(Utc::now(), DEFAULT_RENEWAL_DAYS));

        renewal.history.push(RenewResult::failure("later failure"));
        assert!(!renewal.is_due(Utc::now(), DEFAULT_RENEWAL_DAYS));

        let mut old = self::renewal();
        old.history.push(success_at(56, "f"));
        assert!(old.is_due(Utc::now(), DEFAULT_RENEWAL_DAYS));
    }

    #[test]
    fn test_current_thumbprint_ignores_failures() {
        let mut renewal = renewal();
        renewal.history.push(success_at(10, "f"));
        renewal.history.push(RenewResult::failure("boom"));
        assert_eq!(
            renewal.current_thumbprint(),
            Some(&Thumbprint::from_bytes(vec![10]))
        );
    }

    #[test]
    fn test_target_changed() {
        let mut renewal = renewal();
        assert!(!renewal.target_changed("abc"));

        renewal.history.push(success_at(1, "abc"));
        assert!(!renewal.target_changed("abc"));
        assert!(renewal.target_changed("def"));
    }

    #[test]
    fn test_result_serde_omits_empty_fields() {
        let json = serde_json::to_value(RenewResult::failure("nope")).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error_message"], "nope");
        assert!(json.get("warnings").is_none());
        assert!(json.get("thumbprint").is_none());
    }

    #[test]
    fn test_renewal_serde() {
        let mut renewal = renewal();
        renewal.history.push(success_at(3, "abc"));

        let json = serde_json::to_string_pretty(&renewal).unwrap();
        let back: Renewal = serde_json::from_str(&json).unwrap();
        assert_eq!(back, renewal);
    }
}
