use serde::{Deserialize, Serialize};

use super::{Certificate, KeyUsage, MAX_CHAIN_LENGTH};
use crate::error::{error_codes, ErrorContext, KeyStoreError, KeyStoreResult};
use crate::factory::CryptoFactory;

/// An ordered certificate sequence `[leaf, ..., root]`, never empty
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<Certificate>", into = "Vec<Certificate>")]
pub struct CertificateChain {
    certificates: Vec<Certificate>,
}

impl CertificateChain {
    /// Wrap a leaf-first certificate list. Only the shape is checked here;
    /// signatures are checked by [`CertificateChain::validate`].
    pub fn new(certificates: Vec<Certificate>) -> KeyStoreResult<Self> {
        if certificates.is_empty() || certificates.len() > MAX_CHAIN_LENGTH {
            return Err(KeyStoreError::data(
                &format!("chain length {} outside 1..={}", certificates.len(), MAX_CHAIN_LENGTH),
                error_codes::MALFORMED_CHAIN,
            ));
        }
        Ok(Self { certificates })
    }

    /// A chain holding only a self-signed root
    pub fn from_root(root: Certificate) -> Self {
        Self {
            certificates: vec![root],
        }
    }

    /// A new chain with `certificate` in front of a copy of this one
    pub fn prepend(&self, certificate: Certificate) -> KeyStoreResult<Self> {
        let mut certificates = Vec::with_capacity(self.certificates.len() + 1);
        certificates.push(certificate);
        certificates.extend(self.certificates.iter().cloned());
        Self::new(certificates)
    }

    pub fn leaf(&self) -> &Certificate {
        &self.certificates[0]
    }

    pub fn root(&self) -> &Certificate {
        &self.certificates[self.certificates.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// Always false; kept for API symmetry with collections
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Certificate> {
        self.certificates.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Certificate> {
        self.certificates.iter()
    }

    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    pub fn into_certificates(self) -> Vec<Certificate> {
        self.certificates
    }

    /// Walk the chain leaf to root.
    ///
    /// For each adjacent pair `(child, parent)`:
    /// 1. the child's issuer must equal the parent's subject (`Data`),
    /// 2. the child's signature must verify under the parent's key (`Security`),
    /// 3. the parent must carry certificate-signing usage (`Crypto`).
    ///
    /// The root must be self-signed and its signature must verify under its
    /// own key. The first failure aborts the walk; the error carries the
    /// offending certificate.
    pub fn validate(&self, factory: &dyn CryptoFactory) -> KeyStoreResult<()> {
        for pair in self.certificates.windows(2) {
            let (child, parent) = (&pair[0], &pair[1]);
            if child.issuer() != parent.subject() {
                return Err(KeyStoreError::data(
                    &format!(
                        "issuer '{}' does not match next subject '{}'",
                        child.issuer(),
                        parent.subject()
                    ),
                    error_codes::MALFORMED_CHAIN,
                )
                .with_context(ErrorContext::Certificate(Box::new(child.clone()))));
            }
            child.verify_signature(parent.public_key(), factory)?;
            if !parent.usage().contains(KeyUsage::CERTIFICATE_SIGNING) {
                return Err(KeyStoreError::crypto(
                    "signer lacks certificate-signing usage",
                    error_codes::SIGNER_NOT_AUTHORIZED,
                )
                .with_context(ErrorContext::Certificate(Box::new(parent.clone()))));
            }
        }

        let root = self.root();
        if !root.is_self_signed() {
            return Err(KeyStoreError::data("chain does not end in a self-signed root", error_codes::MALFORMED_CHAIN)
                .with_context(ErrorContext::Certificate(Box::new(root.clone()))));
        }
        root.verify_signature(root.public_key(), factory)
    }
}

impl TryFrom<Vec<Certificate>> for CertificateChain {
    type Error = KeyStoreError;

    fn try_from(certificates: Vec<Certificate>) -> Result<Self, Self::Error> {
        Self::new(certificates)
    }
}

impl From<CertificateChain> for Vec<Certificate> {
    fn from(chain: CertificateChain) -> Self {
        chain.certificates
    }
}

impl<'a> IntoIterator for &'a CertificateChain {
    type Item = &'a Certificate;
    type IntoIter = std::slice::Iter<'a, Certificate>;

    fn into_iter(self) -> Self::IntoIter {
        self.certificates.iter()
    }
}
