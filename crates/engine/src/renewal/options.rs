//! Stored plugin options
//!
//! Each capability is a closed set of variants tagged by `plugin` in the
//! stored JSON. [`PluginResolver`](crate::resolver::PluginResolver) turns
//! them into working plugins.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use certbind_common::SiteId;

use crate::bindings::SslFlags;
use crate::csr::KeyAlgorithm;

/// Where the identifiers of a certificate come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "plugin", rename_all = "kebab-case")]
pub enum TargetOptions {
    /// A fixed list of identifiers
    Manual {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        common_name: Option<String>,
        identifiers: Vec<String>,
        /// Site to install into, if any
        #[serde(default, skip_serializing_if = "Option::is_none")]
        site: Option<SiteId>,
    },
    /// Every host bound on a site, read at renewal time
    Site {
        site: SiteId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        common_name: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        exclude: Vec<String>,
    },
}

impl TargetOptions {
    /// Fixed list of identifiers; the first non-email one becomes the common name
    pub fn manual<I, S>(identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Manual {
            common_name: None,
            identifiers: identifiers.into_iter().map(Into::into).collect(),
            site: None,
        }
    }

    /// Every named host bound on `site`
    pub fn site(site: impl Into<SiteId>) -> Self {
        Self::Site {
            site: site.into(),
            common_name: None,
            exclude: Vec::new(),
        }
    }
}

/// How control of identifiers is proven
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "plugin", rename_all = "kebab-case")]
pub enum ValidationOptions {
    Http01,
    Dns01 {
        /// Name of a registered DNS provider
        provider: String,
    },
}

/// How the key and signing request are produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "plugin", rename_all = "kebab-case")]
pub enum CsrOptions {
    Rcgen {
        #[serde(default)]
        algorithm: KeyAlgorithm,
    },
}

impl Default for CsrOptions {
    fn default() -> Self {
        Self::Rcgen {
            algorithm: KeyAlgorithm::default(),
        }
    }
}

/// Where issued certificates are kept
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "plugin", rename_all = "kebab-case")]
pub enum StoreOptions {
    /// PEM files on disk; defaults to the configured storage path
    File {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<PathBuf>,
    },
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::File { path: None }
    }
}

/// What happens after the certificate is stored
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "plugin", rename_all = "kebab-case")]
pub enum InstallationOptions {
    #[default]
    None,
    /// Reconcile the web server's TLS bindings
    Bindings {
        /// Site for target parts that have none
        #[serde(default, skip_serializing_if = "Option::is_none")]
        site: Option<SiteId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ip: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
        #[serde(default)]
        flags: SslFlags,
    },
}
