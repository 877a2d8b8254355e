use std::fmt;

use serde::{Deserialize, Serialize};

use super::AlgorithmSpec;
use crate::factory::CryptoFactory;

/// Message digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DigestAlgorithm {
    Sha256,
    Sha384,
    Sha512,
    Sha3_256,
    Sha3_512,
    /// Extendable output; the length is chosen by the descriptor
    Blake3,
}

impl DigestAlgorithm {
    /// Default output length in bytes
    pub fn natural_length(&self) -> usize {
        match self {
            DigestAlgorithm::Sha256 | DigestAlgorithm::Sha3_256 | DigestAlgorithm::Blake3 => 32,
            DigestAlgorithm::Sha384 => 48,
            DigestAlgorithm::Sha512 | DigestAlgorithm::Sha3_512 => 64,
        }
    }

    /// Inclusive bounds on the declared output length
    pub fn length_bounds(&self) -> (usize, usize) {
        match self {
            DigestAlgorithm::Blake3 => (16, 64),
            other => (other.natural_length(), other.natural_length()),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigestAlgorithm::Sha256 => write!(f, "SHA-256"),
            DigestAlgorithm::Sha384 => write!(f, "SHA-384"),
            DigestAlgorithm::Sha512 => write!(f, "SHA-512"),
            DigestAlgorithm::Sha3_256 => write!(f, "SHA3-256"),
            DigestAlgorithm::Sha3_512 => write!(f, "SHA3-512"),
            DigestAlgorithm::Blake3 => write!(f, "BLAKE3"),
        }
    }
}

/// A digest algorithm with a declared output length in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DigestSpec {
    pub algorithm: DigestAlgorithm,
    pub length: usize,
}

impl DigestSpec {
    /// Digest spec with the algorithm's natural output length
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self {
            algorithm,
            length: algorithm.natural_length(),
        }
    }

    /// Digest spec with an explicit output length (validated by `is_valid`)
    pub fn with_length(algorithm: DigestAlgorithm, length: usize) -> Self {
        Self { algorithm, length }
    }

    pub fn sha256() -> Self {
        Self::new(DigestAlgorithm::Sha256)
    }

    pub fn sha384() -> Self {
        Self::new(DigestAlgorithm::Sha384)
    }

    pub fn sha512() -> Self {
        Self::new(DigestAlgorithm::Sha512)
    }
}

impl AlgorithmSpec for DigestSpec {
    fn is_valid(&self) -> bool {
        let (min, max) = self.algorithm.length_bounds();
        self.length >= min && self.length <= max
    }

    fn is_supported(&self, factory: &dyn CryptoFactory) -> bool {
        self.is_valid() && factory.supports_digest(self)
    }
}

impl fmt::Display for DigestSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.length == self.algorithm.natural_length() {
            write!(f, "{}", self.algorithm)
        } else {
            write!(f, "{}/{}", self.algorithm, self.length * 8)
        }
    }
}
