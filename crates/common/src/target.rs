//! Certificate targets.
//!
//! A [`Target`] is everything one certificate must cover, grouped into
//! [`TargetPart`]s that share an installation context (one site).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::identifier::{Identifier, IdentifierKind};
use crate::ids::SiteId;

/// Structural problems with a target
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("Target has no identifiers")]
    NoIdentifiers,

    #[error("Target contains an empty identifier")]
    EmptyIdentifier,

    #[error("Common name '{0}' is not one of the target's identifiers")]
    CommonNameNotInTarget(String),

    #[error("Common name '{0}' cannot be an email address")]
    InvalidCommonName(String),
}

/// Identifiers sharing one installation context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetPart {
    /// Site the identifiers are served from, if known
    #[serde(default)]
    pub site: Option<SiteId>,
    pub identifiers: Vec<Identifier>,
}

impl TargetPart {
    pub fn new(site: Option<SiteId>, identifiers: Vec<Identifier>) -> Self {
        Self { site, identifiers }
    }

    /// Whether any identifier in this part is proven by an authorization for `value`
    ///
    /// Wildcards are stripped first: `*.example.com` is authorized as
    /// `example.com`.
    pub fn covers(&self, authorized: &Identifier) -> bool {
        self.identifiers.iter().any(|id| {
            id.kind() == authorized.kind()
                && id
                    .without_wildcard()
                    .eq_ignore_ascii_case(authorized.without_wildcard())
        })
    }
}

/// The set of identifiers and site grouping one certificate is requested for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub common_name: Identifier,
    pub parts: Vec<TargetPart>,
}

impl Target {
    /// Target as given; call [`Target::validate`] before ordering with it
    pub fn new(common_name: Identifier, parts: Vec<TargetPart>) -> Self {
        Self { common_name, parts }
    }

    /// Single-part target without a site reference
    pub fn from_identifiers(identifiers: Vec<Identifier>) -> Option<Self> {
        let common_name = identifiers
            .iter()
            .find(|id| id.kind() != IdentifierKind::Email)?
            .clone();
        Some(Self {
            common_name,
            parts: vec![TargetPart::new(None, identifiers)],
        })
    }

    /// All identifiers across parts, in order, without duplicates
    pub fn identifiers(&self) -> Vec<Identifier> {
        let mut seen = Vec::new();
        for id in self.parts.iter().flat_map(|part| part.identifiers.iter()) {
            if !seen.contains(id) {
                seen.push(id.clone());
            }
        }
        seen
    }

    /// Check structural integrity
    pub fn validate(&self) -> Result<(), TargetError> {
        let identifiers = self.identifiers();
        if identifiers.is_empty() {
            return Err(TargetError::NoIdentifiers);
        }
        if identifiers.iter().any(|id| id.value().trim().is_empty()) {
            return Err(TargetError::EmptyIdentifier);
        }
        if self.common_name.kind() == IdentifierKind::Email {
            return Err(TargetError::InvalidCommonName(self.common_name.to_string()));
        }
        if !identifiers.contains(&self.common_name) {
            return Err(TargetError::CommonNameNotInTarget(
                self.common_name.to_string(),
            ));
        }
        Ok(())
    }

    /// Find the part an authorization belongs to
    pub fn part_for(&self, authorized: &Identifier) -> Option<&TargetPart> {
        self.parts.iter().find(|part| part.covers(authorized))
    }

    /// Whether any identifier is a wildcard
    pub fn has_wildcard(&self) -> bool {
        self.parts
            .iter()
            .flat_map(|part| part.identifiers.iter())
            .any(Identifier::is_wildcard)
    }

    /// Stable digest of the target's shape
    ///
    /// Independent of identifier order and DNS case. A change means the
    /// infrastructure the target was derived from has drifted.
    pub fn fingerprint(&self) -> String {
        let mut parts: Vec<String> = self
            .parts
            .iter()
            .map(|part| {
                let mut ids: Vec<String> = part
                    .identifiers
                    .iter()
                    .map(|id| format!("{}:{}", id.kind(), id.normalized()))
                    .collect();
                ids.sort();
                ids.dedup();
                let site = part.site.as_ref().map(|s| s.as_str()).unwrap_or("");
                format!("{}|{}", site, ids.join(","))
            })
            .collect();
        parts.sort();

        let mut hasher = Sha256::new();
        hasher.update(self.common_name.normalized().as_bytes());
        for part in &parts {
            hasher.update(b"\n");
            hasher.update(part.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dns(v: &str) -> Identifier {
        Identifier::dns(v)
    }

    #[test]
    fn test_validate_ok() {
        let target = Target::from_identifiers(vec![dns("a.example.com"), dns("b.example.com")])
            .unwrap();
        assert_eq!(target.common_name, dns("a.example.com"));
        assert!(target.validate().is_ok());
    }

    #[test]
    fn test_validate_empty() {
        let target = Target::new(dns("a.example.com"), vec![TargetPart::new(None, vec![])]);
        assert_eq!(target.validate(), Err(TargetError::NoIdentifiers));
    }

    #[test]
    fn test_validate_common_name_missing() {
        let target = Target::new(
            dns("c.example.com"),
            vec![TargetPart::new(None, vec![dns("a.example.com")])],
        );
        assert!(matches!(
            target.validate(),
            Err(TargetError::CommonNameNotInTarget(_))
        ));
    }

    #[test]
    fn test_common_name_case_insensitive() {
        let target = Target::new(
            dns("A.EXAMPLE.COM"),
            vec![TargetPart::new(None, vec![dns("a.example.com")])],
        );
        assert!(target.validate().is_ok());
    }

    #[test]
    fn test_part_for_wildcard() {
        let target = Target::new(
            dns("*.example.com"),
            vec![
                TargetPart::new(Some(SiteId::new("1")), vec![dns("*.example.com")]),
                TargetPart::new(Some(SiteId::new("2")), vec![dns("other.org")]),
            ],
        );

        let part = target.part_for(&dns("example.com")).unwrap();
        assert_eq!(part.site, Some(SiteId::new("1")));

        let part = target.part_for(&dns("OTHER.org")).unwrap();
        assert_eq!(part.site, Some(SiteId::new("2")));

        assert!(target.part_for(&dns("unknown.net")).is_none());
    }

    #[test]
    fn test_identifiers_deduplicated() {
        let target = Target::new(
            dns("a.example.com"),
            vec![
                TargetPart::new(None, vec![dns("a.example.com")]),
                TargetPart::new(None, vec![dns("A.example.com"), dns("b.example.com")]),
            ],
        );
        assert_eq!(target.identifiers().len(), 2);
    }

    #[test]
    fn test_fingerprint_stable() {
        let a = Target::from_identifiers(vec![dns("a.example.com"), dns("b.example.com")]).unwrap();
        let b = Target::new(
            dns("A.example.com"),
            vec![TargetPart::new(None, vec![dns("B.example.com"), dns("a.example.com")])],
        );
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = Target::from_identifiers(vec![dns("a.example.com")]).unwrap();
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
