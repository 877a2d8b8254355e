use std::fmt;

use serde::{Deserialize, Serialize};

use super::{AlgorithmSpec, MacSpec};
use crate::factory::CryptoFactory;

/// Authenticated ciphers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AeadAlgorithm {
    Aes256Gcm,
    ChaCha20Poly1305,
    XChaCha20Poly1305,
}

impl AeadAlgorithm {
    pub fn key_length(&self) -> usize {
        32
    }

    pub fn nonce_length(&self) -> usize {
        match self {
            AeadAlgorithm::Aes256Gcm | AeadAlgorithm::ChaCha20Poly1305 => 12,
            AeadAlgorithm::XChaCha20Poly1305 => 24,
        }
    }

    pub fn tag_length(&self) -> usize {
        16
    }
}

impl fmt::Display for AeadAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AeadAlgorithm::Aes256Gcm => write!(f, "AES-256-GCM"),
            AeadAlgorithm::ChaCha20Poly1305 => write!(f, "ChaCha20-Poly1305"),
            AeadAlgorithm::XChaCha20Poly1305 => write!(f, "XChaCha20-Poly1305"),
        }
    }
}

/// Unauthenticated stream ciphers, only usable paired with a MAC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamCipher {
    Aes256Ctr,
}

impl StreamCipher {
    pub fn key_length(&self) -> usize {
        32
    }

    pub fn iv_length(&self) -> usize {
        16
    }
}

impl fmt::Display for StreamCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamCipher::Aes256Ctr => write!(f, "AES-256-CTR"),
        }
    }
}

/// Symmetric encryption configurations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncryptionSpec {
    /// A single AEAD cipher
    Aead {
        algorithm: AeadAlgorithm,
        key_length: usize,
    },
    /// A stream cipher followed by a MAC over nonce, ciphertext and associated data
    EncryptThenMac {
        cipher: StreamCipher,
        key_length: usize,
        mac: MacSpec,
    },
}

impl EncryptionSpec {
    pub fn aes256_gcm() -> Self {
        Self::aead(AeadAlgorithm::Aes256Gcm)
    }

    pub fn chacha20_poly1305() -> Self {
        Self::aead(AeadAlgorithm::ChaCha20Poly1305)
    }

    pub fn xchacha20_poly1305() -> Self {
        Self::aead(AeadAlgorithm::XChaCha20Poly1305)
    }

    pub fn aes256_ctr_hmac_sha256() -> Self {
        EncryptionSpec::EncryptThenMac {
            cipher: StreamCipher::Aes256Ctr,
            key_length: 32,
            mac: MacSpec::hmac_sha256(),
        }
    }

    fn aead(algorithm: AeadAlgorithm) -> Self {
        EncryptionSpec::Aead {
            algorithm,
            key_length: algorithm.key_length(),
        }
    }

    /// Total key material needed, in bytes (cipher key followed by MAC key)
    pub fn key_material_length(&self) -> usize {
        match self {
            EncryptionSpec::Aead { key_length, .. } => *key_length,
            EncryptionSpec::EncryptThenMac {
                key_length, mac, ..
            } => key_length + mac.key_length(),
        }
    }

    /// Bytes added to the plaintext by encryption (nonce/IV plus tag)
    pub fn overhead(&self) -> usize {
        match self {
            EncryptionSpec::Aead { algorithm, .. } => {
                algorithm.nonce_length() + algorithm.tag_length()
            }
            EncryptionSpec::EncryptThenMac { cipher, mac, .. } => {
                cipher.iv_length() + mac.tag_length()
            }
        }
    }
}

impl AlgorithmSpec for EncryptionSpec {
    fn is_valid(&self) -> bool {
        match self {
            EncryptionSpec::Aead {
                algorithm,
                key_length,
            } => *key_length == algorithm.key_length(),
            EncryptionSpec::EncryptThenMac {
                cipher,
                key_length,
                mac,
            } => *key_length == cipher.key_length() && mac.is_valid(),
        }
    }

    fn is_supported(&self, factory: &dyn CryptoFactory) -> bool {
        if !self.is_valid() || !factory.supports_encryption(self) {
            return false;
        }
        match self {
            EncryptionSpec::Aead { .. } => true,
            EncryptionSpec::EncryptThenMac { mac, .. } => mac.is_supported(factory),
        }
    }
}

impl fmt::Display for EncryptionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncryptionSpec::Aead { algorithm, .. } => write!(f, "{}", algorithm),
            EncryptionSpec::EncryptThenMac { cipher, mac, .. } => write!(f, "{}+{}", cipher, mac),
        }
    }
}
