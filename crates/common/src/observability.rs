//! Logging initialisation for certbind
//!
//! Every component logs through `tracing`; this module installs the
//! subscriber once at process start.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Output format for log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Structured JSON, one object per line
    Json,
    /// Human-readable multi-line output
    #[default]
    Pretty,
}

/// Initialize the tracing/logging subsystem
///
/// `RUST_LOG` takes precedence over `default_level` when set. Returns an
/// error if a global subscriber is already installed.
pub fn init_tracing(format: LogFormat, default_level: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let json_layer = (format == LogFormat::Json).then(|| {
        fmt::layer()
            .json()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
    });

    let pretty_layer = (format == LogFormat::Pretty).then(|| fmt::layer().with_target(false));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(pretty_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to install tracing subscriber: {}", e))?;

    info!(format = ?format, "Tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_once() {
        assert!(init_tracing(LogFormat::Json, "debug").is_ok());
        // A second global subscriber is rejected rather than panicking
        assert!(init_tracing(LogFormat::Pretty, "info").is_err());
    }

    #[test]
    fn test_log_format_serde() {
        let format: LogFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(format, LogFormat::Json);
        assert_eq!(LogFormat::default(), LogFormat::Pretty);
    }
}
