//! Binding descriptions
//!
//! [`BindingOptions`] is what we want a binding to look like,
//! [`ExistingBinding`] is what the server currently has.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

use certbind_common::SiteId;
use certbind_config::BindingSettings;

use crate::certificate::Thumbprint;

/// TLS binding flags
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SslFlags(u32);

impl SslFlags {
    /// Plain binding: one certificate for the whole endpoint
    pub const NONE: Self = Self(0);
    /// Host-specific certificate selection (server name indication)
    pub const SNI: Self = Self(1);
    /// Certificate is looked up by host name in a shared store
    pub const CENTRAL_CERT_STORE: Self = Self(2);
    pub const DISABLE_HTTP2: Self = Self(4);
    pub const DISABLE_OCSP_STAPLING: Self = Self(8);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Copy with the bits of `other` cleared
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for SslFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for SslFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for SslFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(SslFlags, &str); 4] = [
            (SslFlags::SNI, "SNI"),
            (SslFlags::CENTRAL_CERT_STORE, "CENTRAL_CERT_STORE"),
            (SslFlags::DISABLE_HTTP2, "DISABLE_HTTP2"),
            (SslFlags::DISABLE_OCSP_STAPLING, "DISABLE_OCSP_STAPLING"),
        ];
        if self.is_empty() {
            return f.write_str("NONE");
        }
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&names.join("|"))
    }
}

/// Binding protocol; only HTTPS bindings carry a certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => f.write_str("http"),
            Self::Https => f.write_str("https"),
        }
    }
}

/// `ip:port:host`, the key a server uses to tell bindings apart
pub fn binding_information(ip: &str, port: u16, host: &str) -> String {
    format!("{}:{}:{}", ip, port, host.to_ascii_lowercase())
}

/// A binding as currently configured on the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingBinding {
    pub site: SiteId,
    pub protocol: Protocol,
    pub ip: String,
    pub port: u16,
    /// Empty for the catch-all binding
    pub host: String,
    #[serde(default)]
    pub thumbprint: Option<Thumbprint>,
    #[serde(default)]
    pub store: Option<String>,
    #[serde(default)]
    pub flags: SslFlags,
}

impl ExistingBinding {
    /// Plain HTTP binding; carries no certificate
    pub fn http(site: SiteId, ip: &str, port: u16, host: &str) -> Self {
        Self {
            site,
            protocol: Protocol::Http,
            ip: ip.to_string(),
            port,
            host: host.to_string(),
            thumbprint: None,
            store: None,
            flags: SslFlags::NONE,
        }
    }

    /// HTTPS binding serving `thumbprint`
    pub fn https(
        site: SiteId,
        ip: &str,
        port: u16,
        host: &str,
        thumbprint: Thumbprint,
        flags: SslFlags,
    ) -> Self {
        Self {
            site,
            protocol: Protocol::Https,
            ip: ip.to_string(),
            port,
            host: host.to_string(),
            thumbprint: Some(thumbprint),
            store: None,
            flags,
        }
    }

    pub fn is_https(&self) -> bool {
        self.protocol == Protocol::Https
    }

    /// `ip:port:host`, the key bindings are matched by
    pub fn binding_information(&self) -> String {
        binding_information(&self.ip, self.port, &self.host)
    }

    /// `(ip, port)`, shared by every binding that listens on the same socket
    pub fn endpoint(&self) -> (&str, u16) {
        (&self.ip, self.port)
    }
}

/// Desired state of an HTTPS binding
///
/// Immutable: the `with_*` methods return a modified copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingOptions {
    site: Option<SiteId>,
    ip: String,
    port: u16,
    host: String,
    flags: SslFlags,
    thumbprint: Option<Thumbprint>,
    store: Option<String>,
}

impl Default for BindingOptions {
    fn default() -> Self {
        Self {
            site: None,
            ip: "*".to_string(),
            port: 443,
            host: String::new(),
            flags: SslFlags::NONE,
            thumbprint: None,
            store: None,
        }
    }
}

impl From<&BindingSettings> for BindingOptions {
    fn from(settings: &BindingSettings) -> Self {
        Self {
            ip: settings.default_ip.clone(),
            port: settings.default_port,
            store: Some(settings.default_store.clone()),
            ..Self::default()
        }
    }
}

impl BindingOptions {
    /// Site the binding is added to; `None` until set
    pub fn site(&self) -> Option<&SiteId> {
        self.site.as_ref()
    }

    /// Address part of the endpoint, `*` for all unassigned
    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn flags(&self) -> SslFlags {
        self.flags
    }

    /// Certificate to bind; `None` until the new certificate is known
    pub fn thumbprint(&self) -> Option<&Thumbprint> {
        self.thumbprint.as_ref()
    }

    /// Certificate store the thumbprint lives in
    pub fn store(&self) -> Option<&str> {
        self.store.as_deref()
    }

    /// `ip:port:host`, the key bindings are matched by
    pub fn binding_information(&self) -> String {
        binding_information(&self.ip, self.port, &self.host)
    }

    pub fn with_site(&self, site: SiteId) -> Self {
        Self {
            site: Some(site),
            ..self.clone()
        }
    }

    pub fn with_ip(&self, ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            ..self.clone()
        }
    }

    pub fn with_port(&self, port: u16) -> Self {
        Self {
            port,
            ..self.clone()
        }
    }

    pub fn with_host(&self, host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..self.clone()
        }
    }

    pub fn with_flags(&self, flags: SslFlags) -> Self {
        Self {
            flags,
            ..self.clone()
        }
    }

    pub fn with_thumbprint(&self, thumbprint: Thumbprint) -> Self {
        Self {
            thumbprint: Some(thumbprint),
            ..self.clone()
        }
    }

    pub fn with_store(&self, store: impl Into<String>) -> Self {
        Self {
            store: Some(store.into()),
            ..self.clone()
        }
    }
}
