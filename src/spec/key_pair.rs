use std::fmt;

use serde::{Deserialize, Serialize};

use super::{AlgorithmSpec, DigestAlgorithm, DigestSpec};
use crate::factory::CryptoFactory;

/// Elliptic curves for ECDSA
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EcCurve {
    P256,
    P384,
}

impl EcCurve {
    /// Size of a field element in bytes
    pub fn field_length(&self) -> usize {
        match self {
            EcCurve::P256 => 32,
            EcCurve::P384 => 48,
        }
    }

    /// The digest conventionally paired with this curve
    pub fn preferred_digest(&self) -> DigestSpec {
        match self {
            EcCurve::P256 => DigestSpec::sha256(),
            EcCurve::P384 => DigestSpec::sha384(),
        }
    }
}

impl fmt::Display for EcCurve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcCurve::P256 => write!(f, "P-256"),
            EcCurve::P384 => write!(f, "P-384"),
        }
    }
}

/// Asymmetric key-pair configurations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyPairSpec {
    Ed25519,
    /// ECDSA over `curve`, hashing with `digest`
    Ecdsa { curve: EcCurve, digest: DigestSpec },
    /// Diffie-Hellman only; such keys cannot sign
    X25519,
}

impl KeyPairSpec {
    pub fn ecdsa_p256() -> Self {
        KeyPairSpec::Ecdsa {
            curve: EcCurve::P256,
            digest: EcCurve::P256.preferred_digest(),
        }
    }

    pub fn ecdsa_p384() -> Self {
        KeyPairSpec::Ecdsa {
            curve: EcCurve::P384,
            digest: EcCurve::P384.preferred_digest(),
        }
    }

    /// Whether keys of this kind can produce signatures
    pub fn can_sign(&self) -> bool {
        !matches!(self, KeyPairSpec::X25519)
    }

    /// Whether keys of this kind can perform key agreement
    pub fn can_agree(&self) -> bool {
        matches!(self, KeyPairSpec::X25519)
    }
}

impl AlgorithmSpec for KeyPairSpec {
    fn is_valid(&self) -> bool {
        match self {
            KeyPairSpec::Ed25519 | KeyPairSpec::X25519 => true,
            KeyPairSpec::Ecdsa { curve, digest } => {
                digest.is_valid()
                    && digest.algorithm != DigestAlgorithm::Blake3
                    && digest.length >= curve.field_length()
            }
        }
    }

    fn is_supported(&self, factory: &dyn CryptoFactory) -> bool {
        if !self.is_valid() {
            return false;
        }
        match self {
            KeyPairSpec::Ecdsa { digest, .. } => {
                digest.is_supported(factory) && factory.supports_key_pair(self)
            }
            _ => factory.supports_key_pair(self),
        }
    }
}

impl fmt::Display for KeyPairSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPairSpec::Ed25519 => write!(f, "Ed25519"),
            KeyPairSpec::Ecdsa { curve, digest } => write!(f, "ECDSA-{}-{}", curve, digest),
            KeyPairSpec::X25519 => write!(f, "X25519"),
        }
    }
}
