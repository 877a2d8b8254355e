use std::fmt;

use serde::{Deserialize, Serialize};

use super::{AlgorithmSpec, DigestAlgorithm, DigestSpec};
use crate::factory::CryptoFactory;

/// Message authentication code configurations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MacSpec {
    /// HMAC over a fixed-length digest; key length 16..=128 bytes
    Hmac { digest: DigestSpec, key_length: usize },
    /// BLAKE3 keyed hash with a 32-byte key; tag length 16..=64 bytes
    Blake3Keyed { tag_length: usize },
}

impl MacSpec {
    pub fn hmac_sha256() -> Self {
        MacSpec::Hmac {
            digest: DigestSpec::sha256(),
            key_length: 32,
        }
    }

    pub fn hmac_sha512() -> Self {
        MacSpec::Hmac {
            digest: DigestSpec::sha512(),
            key_length: 64,
        }
    }

    pub fn blake3_keyed() -> Self {
        MacSpec::Blake3Keyed { tag_length: 32 }
    }

    /// Key length in bytes
    pub fn key_length(&self) -> usize {
        match self {
            MacSpec::Hmac { key_length, .. } => *key_length,
            MacSpec::Blake3Keyed { .. } => 32,
        }
    }

    /// Tag length in bytes
    pub fn tag_length(&self) -> usize {
        match self {
            MacSpec::Hmac { digest, .. } => digest.length,
            MacSpec::Blake3Keyed { tag_length } => *tag_length,
        }
    }
}

impl AlgorithmSpec for MacSpec {
    fn is_valid(&self) -> bool {
        match self {
            MacSpec::Hmac { digest, key_length } => {
                digest.is_valid()
                    && digest.algorithm != DigestAlgorithm::Blake3
                    && (16..=128).contains(key_length)
            }
            MacSpec::Blake3Keyed { tag_length } => (16..=64).contains(tag_length),
        }
    }

    fn is_supported(&self, factory: &dyn CryptoFactory) -> bool {
        if !self.is_valid() {
            return false;
        }
        match self {
            MacSpec::Hmac { digest, .. } => {
                digest.is_supported(factory) && factory.supports_mac(self)
            }
            MacSpec::Blake3Keyed { .. } => factory.supports_mac(self),
        }
    }
}

impl fmt::Display for MacSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MacSpec::Hmac { digest, .. } => write!(f, "HMAC-{}", digest),
            MacSpec::Blake3Keyed { tag_length } => write!(f, "BLAKE3-keyed/{}", tag_length * 8),
        }
    }
}
