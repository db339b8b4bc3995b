//! HTTP-01 validation
//!
//! Tokens are held in a shared registry; whatever serves port 80 looks the
//! request path up with [`Http01Tokens::respond`].

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, trace};

use certbind_common::{IdentifierKind, Target};

use super::{ChallengeDetails, ValidationError, ValidationPlugin};
use crate::acme::ChallengeType;

/// HTTP-01 challenge path prefix
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Token -> key authorization registry
///
/// Clones share state, so one instance can be handed to the HTTP listener
/// and another to the validation plugin.
#[derive(Debug, Clone, Default)]
pub struct Http01Tokens {
    tokens: Arc<DashMap<String, String>>,
}

impl Http01Tokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `key_authorization` for `token` until it is removed
    ///
    /// # Arguments
    ///
    /// * `token` - The challenge token from the CA
    /// * `key_authorization` - The response body (token + account key thumbprint)
    pub fn insert(&self, token: &str, key_authorization: &str) {
        debug!(token = %token, "Registering HTTP-01 token");
        self.tokens
            .insert(token.to_string(), key_authorization.to_string());
    }

    /// Stop serving `token`; `false` if it was not registered
    pub fn remove(&self, token: &str) -> bool {
        let removed = self.tokens.remove(token).is_some();
        if removed {
            debug!(token = %token, "Removed HTTP-01 token");
        }
        removed
    }

    /// Response body for a request path, if it is a known challenge
    pub fn respond(&self, path: &str) -> Option<String> {
        let token = path.strip_prefix(ACME_CHALLENGE_PREFIX)?;
        let response = self.tokens.get(token).map(|v| v.clone());
        trace!(token = %token, found = response.is_some(), "HTTP-01 lookup");
        response
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Validation plugin answering `http-01` challenges
#[derive(Debug)]
pub struct Http01Validation {
    tokens: Http01Tokens,
}

impl Http01Validation {
    pub fn new(tokens: Http01Tokens) -> Self {
        Self { tokens }
    }

    pub fn tokens(&self) -> &Http01Tokens {
        &self.tokens
    }
}

#[async_trait]
impl ValidationPlugin for Http01Validation {
    fn challenge_type(&self) -> ChallengeType {
        ChallengeType::Http01
    }

    /// HTTP-01 cannot prove wildcards or email addresses
    fn can_validate(&self, target: &Target) -> bool {
        target
            .identifiers()
            .iter()
            .all(|id| id.kind() != IdentifierKind::Email && !id.is_wildcard())
    }

    async fn prepare_challenge(&self, details: &ChallengeDetails) -> Result<(), ValidationError> {
        let key_authorization = details.key_authorization()?;
        self.tokens.insert(&details.token, key_authorization);
        Ok(())
    }

    async fn cleanup(&self, details: &ChallengeDetails) -> Result<(), ValidationError> {
        self.tokens.remove(&details.token);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certbind_common::Identifier;

    fn details(token: &str, key_auth: Option<&str>) -> ChallengeDetails {
        ChallengeDetails {
            identifier: Identifier::dns("a.example.com"),
            authorized: Identifier::dns("a.example.com"),
            site: None,
            challenge_type: ChallengeType::Http01,
            token: token.to_string(),
            key_authorization: key_auth.map(str::to_string),
        }
    }

    #[test]
    fn test_respond() {
        let tokens = Http01Tokens::new();
        tokens.insert("abc123", "abc123.thumb");

        assert_eq!(
            tokens.respond("/.well-known/acme-challenge/abc123"),
            Some("abc123.thumb".to_string())
        );
        assert_eq!(tokens.respond("/.well-known/acme-challenge/other"), None);
        assert_eq!(tokens.respond("/abc123"), None);
    }

    #[tokio::test]
    async fn test_prepare_and_cleanup() {
        let shared = Http01Tokens::new();
        let plugin = Http01Validation::new(shared.clone());

        plugin.prepare_challenge(&details("t1", Some("t1.k"))).await.unwrap();
        plugin.prepare_challenge(&details("t2", Some("t2.k"))).await.unwrap();
        assert_eq!(shared.len(), 2);
        assert_eq!(
            shared.respond("/.well-known/acme-challenge/t2"),
            Some("t2.k".to_string())
        );

        plugin.cleanup(&details("t1", Some("t1.k"))).await.unwrap();
        assert_eq!(shared.respond("/.well-known/acme-challenge/t1"), None);
        assert_eq!(shared.len(), 1);

        plugin.cleanup(&details("t2", Some("t2.k"))).await.unwrap();
        assert!(shared.is_empty());
        // Already gone
        plugin.cleanup(&details("t2", Some("t2.k"))).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_key_authorization() {
        let plugin = Http01Validation::new(Http01Tokens::new());
        let err = plugin.prepare_challenge(&details("t1", None)).await.unwrap_err();
        assert!(matches!(err, ValidationError::MissingKeyAuthorization(_)));
        assert!(plugin.tokens().is_empty());
    }

    #[test]
    fn test_can_validate() {
        let plugin = Http01Validation::new(Http01Tokens::new());

        let plain = Target::from_identifiers(vec![
            Identifier::dns("a.example.com"),
            Identifier::parse("192.0.2.10"),
        ])
        .unwrap();
        assert!(plugin.can_validate(&plain));

        let wildcard = Target::from_identifiers(vec![Identifier::dns("*.example.com")]).unwrap();
        assert!(!plugin.can_validate(&wildcard));
    }
}
