//! Settings for certbind
//!
//! Settings are read from a TOML file. Every field has a default, so an
//! empty file (or no file at all) yields a working configuration.
//!
//! # Example
//!
//! ```toml
//! [renewal]
//! days = 55
//! keep-existing = false
//!
//! [challenge]
//! poll-interval-ms = 2000
//! max-polls = 4
//!
//! [bindings]
//! default-ip = "*"
//! default-port = 443
//! default-store = "My"
//!
//! [storage]
//! path = "/var/lib/certbind"
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub use certbind_common::LogFormat;

/// Settings loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid setting '{field}': {message}")]
    Invalid { field: &'static str, message: String },
}

/// Top-level settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Settings {
    pub renewal: RenewalSettings,
    pub challenge: ChallengeSettings,
    pub bindings: BindingSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Load settings from a TOML file
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read, and the
    /// errors of [`Settings::from_toml`] for its content.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_toml(&content)?;
        info!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    /// Parse and validate settings from TOML text
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown values,
    /// and [`ConfigError::Invalid`] for values out of range.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        debug!(
            renewal_days = settings.renewal.days,
            max_polls = settings.challenge.max_polls,
            "Settings validated"
        );
        Ok(settings)
    }

    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.renewal.days == 0 {
            return Err(ConfigError::Invalid {
                field: "renewal.days",
                message: "must be at least 1".to_string(),
            });
        }
        if self.challenge.max_polls == 0 {
            return Err(ConfigError::Invalid {
                field: "challenge.max-polls",
                message: "must be at least 1".to_string(),
            });
        }
        if self.bindings.default_port == 0 {
            return Err(ConfigError::Invalid {
                field: "bindings.default-port",
                message: "must be a valid TCP port".to_string(),
            });
        }
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "logging.level",
                message: "must name a level or filter directive".to_string(),
            });
        }
        if self.bindings.default_ip.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "bindings.default-ip",
                message: "use \"*\" for all unassigned addresses".to_string(),
            });
        }
        Ok(())
    }
}

/// When renewals become due and what happens to replaced certificates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RenewalSettings {
    /// Days after the last success before a renewal is due again
    pub days: u32,
    /// Keep replaced certificates in the store instead of deleting them
    pub keep_existing: bool,
}

fn default_renewal_days() -> u32 {
    55
}

impl Default for RenewalSettings {
    fn default() -> Self {
        Self {
            days: default_renewal_days(),
            keep_existing: false,
        }
    }
}

/// Challenge polling behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ChallengeSettings {
    /// Fixed wait between status polls
    pub poll_interval_ms: u64,
    /// Polls after the answer before giving up
    pub max_polls: u32,
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_max_polls() -> u32 {
    4
}

impl Default for ChallengeSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_polls: default_max_polls(),
        }
    }
}

impl ChallengeSettings {
    /// [`poll_interval_ms`](Self::poll_interval_ms) as a `Duration`
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Defaults for bindings created by the reconciliation engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BindingSettings {
    pub default_ip: String,
    pub default_port: u16,
    /// Certificate store name recorded on new bindings
    pub default_store: String,
}

impl Default for BindingSettings {
    fn default() -> Self {
        Self {
            default_ip: "*".to_string(),
            default_port: 443,
            default_store: "My".to_string(),
        }
    }
}

/// Where renewals and certificates are persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StorageSettings {
    pub path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/certbind"),
        }
    }
}

impl StorageSettings {
    /// One JSON file per renewal
    pub fn renewals_path(&self) -> PathBuf {
        self.path.join("renewals")
    }

    /// One directory per certificate, named by thumbprint
    pub fn certificates_path(&self) -> PathBuf {
        self.path.join("certificates")
    }
}

/// Log output; `RUST_LOG` overrides `level` when set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl LoggingSettings {
    /// Install the global tracing subscriber described by these settings
    ///
    /// # Errors
    ///
    /// Fails when a global subscriber is already installed.
    pub fn init_tracing(&self) -> anyhow::Result<()> {
        certbind_common::init_tracing(self.format, &self.level)
    }
}
