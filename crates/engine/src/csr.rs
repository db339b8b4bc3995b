//! Certificate signing requests
//!
//! Key generation and CSR encoding use rcgen. The private key never leaves
//! the [`SigningRequest`] until the issued certificate is stored alongside it.

use std::fmt;

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SignatureAlgorithm};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use certbind_common::{IdentifierKind, Target};

#[derive(Debug, Error)]
pub enum CsrError {
    #[error("target has no DNS or IP identifiers to request")]
    NoSubjectNames,

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("failed to encode signing request: {0}")]
    Encoding(String),
}

/// A DER-encoded CSR and the private key it was signed with
#[derive(Clone)]
pub struct SigningRequest {
    pub der: Vec<u8>,
    pub private_key_pem: String,
}

impl fmt::Debug for SigningRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningRequest")
            .field("der_len", &self.der.len())
            .finish_non_exhaustive()
    }
}

/// Signing-request capability
pub trait CsrPlugin: Send + Sync {
    /// Generate a fresh key and a CSR naming every DNS and IP identifier
    ///
    /// # Errors
    ///
    /// Returns [`CsrError::NoSubjectNames`] when the target holds only email
    /// identifiers, and key or encoding errors from the backend.
    fn generate(&self, target: &Target) -> Result<SigningRequest, CsrError>;
}

/// Key algorithm for new certificates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyAlgorithm {
    #[default]
    EcdsaP256,
    EcdsaP384,
}

impl KeyAlgorithm {
    fn signature_algorithm(self) -> &'static SignatureAlgorithm {
        match self {
            Self::EcdsaP256 => &rcgen::PKCS_ECDSA_P256_SHA256,
            Self::EcdsaP384 => &rcgen::PKCS_ECDSA_P384_SHA384,
        }
    }
}

/// Fresh key per request, SANs from the target's DNS and IP identifiers
#[derive(Debug, Clone, Default)]
pub struct RcgenCsr {
    algorithm: KeyAlgorithm,
}

impl RcgenCsr {
    pub fn new(algorithm: KeyAlgorithm) -> Self {
        Self { algorithm }
    }
}

impl CsrPlugin for RcgenCsr {
    fn generate(&self, target: &Target) -> Result<SigningRequest, CsrError> {
        let names: Vec<String> = target
            .identifiers()
            .iter()
            .filter(|id| id.kind() != IdentifierKind::Email)
            .map(|id| id.value().to_string())
            .collect();
        if names.is_empty() {
            return Err(CsrError::NoSubjectNames);
        }

        let key_pair = KeyPair::generate_for(self.algorithm.signature_algorithm())
            .map_err(|e| CsrError::KeyGeneration(e.to_string()))?;

        let mut params =
            CertificateParams::new(names.clone()).map_err(|e| CsrError::Encoding(e.to_string()))?;
        let mut subject = DistinguishedName::new();
        subject.push(DnType::CommonName, target.common_name.value());
        params.distinguished_name = subject;

        let csr = params
            .serialize_request(&key_pair)
            .map_err(|e| CsrError::Encoding(e.to_string()))?;

        debug!(
            common_name = %target.common_name,
            names = names.len(),
            algorithm = ?self.algorithm,
            "Generated signing request"
        );

        Ok(SigningRequest {
            der: csr.der().to_vec(),
            private_key_pem: key_pair.serialize_pem(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certbind_common::Identifier;

    #[test]
    fn test_generate() {
        let target = Target::from_identifiers(vec![
            Identifier::dns("a.example.com"),
            Identifier::dns("*.example.com"),
        ])
        .unwrap();

        let request = RcgenCsr::default().generate(&target).unwrap();
        assert!(!request.der.is_empty());
        assert!(request.private_key_pem.contains("PRIVATE KEY"));
        assert!(!format!("{request:?}").contains("PRIVATE KEY"));
    }

    #[test]
    fn test_fresh_key_each_time() {
        let target = Target::from_identifiers(vec![Identifier::dns("a.example.com")]).unwrap();
        let csr = RcgenCsr::new(KeyAlgorithm::EcdsaP384);
        let a = csr.generate(&target).unwrap();
        let b = csr.generate(&target).unwrap();
        assert_ne!(a.private_key_pem, b.private_key_pem);
    }

    #[test]
    fn test_email_only_target_rejected() {
        let target = Target::new(
            Identifier::email("ops@example.com"),
            vec![certbind_common::TargetPart::new(
                None,
                vec![Identifier::email("ops@example.com")],
            )],
        );
        assert!(matches!(
            RcgenCsr::default().generate(&target),
            Err(CsrError::NoSubjectNames)
        ));
    }
}
