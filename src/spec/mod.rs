/*!
 * Spec Algebra
 *
 * Immutable descriptors of algorithm configurations: digests, MACs,
 * encryption schemes, single symmetric keys, symmetric key bundles and
 * key-pairs. Every spec answers two questions:
 *
 * - `is_valid`: is the descriptor structurally self-consistent? This is
 *   independent of any running factory.
 * - `is_supported`: can the given cryptographic factory execute it? A valid
 *   spec may still be unsupported, e.g. long digests under a restricted
 *   factory.
 *
 * Composite specs (encrypt-then-MAC schemes, ECDSA over a digest, key
 * bundles) are valid and supported iff every component is. Equality and
 * hashing are structural.
 */

mod digest;
mod encryption;
mod key_pair;
mod key_set;
mod mac;


use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{KeyStoreError, KeyStoreResult};
use crate::factory::CryptoFactory;

pub use digest::{DigestAlgorithm, DigestSpec};
pub use encryption::{AeadAlgorithm, EncryptionSpec, StreamCipher};
pub use key_pair::{EcCurve, KeyPairSpec};
pub use key_set::{KeySetSpec, KeySetStep, KeySpec, MAX_KEY_SET_STEPS};
pub use mac::MacSpec;

/// Validity and support predicates shared by every spec
pub trait AlgorithmSpec {
    /// Structural self-consistency, independent of any factory
    fn is_valid(&self) -> bool;

    /// Whether `factory` can execute this spec. Always false for an invalid spec.
    fn is_supported(&self, factory: &dyn CryptoFactory) -> bool;
}

/// Any spec, used to attach the offending spec to an error
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnySpec {
    Digest(DigestSpec),
    Mac(MacSpec),
    Encryption(EncryptionSpec),
    Key(KeySpec),
    KeySet(KeySetSpec),
    KeyPair(KeyPairSpec),
}

impl AlgorithmSpec for AnySpec {
    fn is_valid(&self) -> bool {
        match self {
            AnySpec::Digest(s) => s.is_valid(),
            AnySpec::Mac(s) => s.is_valid(),
            AnySpec::Encryption(s) => s.is_valid(),
            AnySpec::Key(s) => s.is_valid(),
            AnySpec::KeySet(s) => s.is_valid(),
            AnySpec::KeyPair(s) => s.is_valid(),
        }
    }

    fn is_supported(&self, factory: &dyn CryptoFactory) -> bool {
        match self {
            AnySpec::Digest(s) => s.is_supported(factory),
            AnySpec::Mac(s) => s.is_supported(factory),
            AnySpec::Encryption(s) => s.is_supported(factory),
            AnySpec::Key(s) => s.is_supported(factory),
            AnySpec::KeySet(s) => s.is_supported(factory),
            AnySpec::KeyPair(s) => s.is_supported(factory),
        }
    }
}

impl fmt::Display for AnySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnySpec::Digest(s) => write!(f, "{}", s),
            AnySpec::Mac(s) => write!(f, "{}", s),
            AnySpec::Encryption(s) => write!(f, "{}", s),
            AnySpec::Key(s) => write!(f, "{}", s),
            AnySpec::KeySet(s) => write!(f, "{}", s),
            AnySpec::KeyPair(s) => write!(f, "{}", s),
        }
    }
}

impl From<DigestSpec> for AnySpec {
    fn from(spec: DigestSpec) -> Self {
        AnySpec::Digest(spec)
    }
}

impl From<MacSpec> for AnySpec {
    fn from(spec: MacSpec) -> Self {
        AnySpec::Mac(spec)
    }
}

impl From<EncryptionSpec> for AnySpec {
    fn from(spec: EncryptionSpec) -> Self {
        AnySpec::Encryption(spec)
    }
}

impl From<KeySpec> for AnySpec {
    fn from(spec: KeySpec) -> Self {
        AnySpec::Key(spec)
    }
}

impl From<KeySetSpec> for AnySpec {
    fn from(spec: KeySetSpec) -> Self {
        AnySpec::KeySet(spec)
    }
}

impl From<KeyPairSpec> for AnySpec {
    fn from(spec: KeyPairSpec) -> Self {
        AnySpec::KeyPair(spec)
    }
}

/// Fail with a `Crypto` error unless `spec` is valid and supported by `factory`.
///
/// Nothing is ever substituted: an unsupported spec is rejected as is.
pub fn ensure_usable<S>(spec: &S, factory: &dyn CryptoFactory) -> KeyStoreResult<()>
where
    S: AlgorithmSpec + Clone + Into<AnySpec>,
{
    if !spec.is_valid() {
        return Err(KeyStoreError::invalid_spec(spec.clone().into()));
    }
    if !spec.is_supported(factory) {
        return Err(KeyStoreError::unsupported_spec(spec.clone().into()));
    }
    Ok(())
}
