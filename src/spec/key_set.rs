use std::fmt;

use serde::{Deserialize, Serialize};

use super::{AlgorithmSpec, EncryptionSpec, MacSpec};
use crate::factory::CryptoFactory;

/// Upper bound on the number of steps in a key bundle
pub const MAX_KEY_SET_STEPS: usize = 8;

/// The declared kind of a single symmetric key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeySpec {
    Encryption(EncryptionSpec),
    Mac(MacSpec),
}

impl KeySpec {
    /// Key material length in bytes
    pub fn key_length(&self) -> usize {
        match self {
            KeySpec::Encryption(spec) => spec.key_material_length(),
            KeySpec::Mac(spec) => spec.key_length(),
        }
    }
}

impl AlgorithmSpec for KeySpec {
    fn is_valid(&self) -> bool {
        match self {
            KeySpec::Encryption(spec) => spec.is_valid(),
            KeySpec::Mac(spec) => spec.is_valid(),
        }
    }

    fn is_supported(&self, factory: &dyn CryptoFactory) -> bool {
        match self {
            KeySpec::Encryption(spec) => spec.is_supported(factory),
            KeySpec::Mac(spec) => spec.is_supported(factory),
        }
    }
}

impl fmt::Display for KeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySpec::Encryption(spec) => write!(f, "{}", spec),
            KeySpec::Mac(spec) => write!(f, "{}", spec),
        }
    }
}

/// One step of a key bundle
pub type KeySetStep = KeySpec;

/// A symmetric key bundle: an ordered composition of encryption and MAC steps.
///
/// Sealing applies the steps in order; each step has its own key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeySetSpec {
    pub steps: Vec<KeySetStep>,
}

impl KeySetSpec {
    pub fn new(steps: Vec<KeySetStep>) -> Self {
        Self { steps }
    }

    /// Key lengths of every step, in order
    pub fn key_lengths(&self) -> Vec<usize> {
        self.steps.iter().map(|s| s.key_length()).collect()
    }
}

impl AlgorithmSpec for KeySetSpec {
    fn is_valid(&self) -> bool {
        !self.steps.is_empty()
            && self.steps.len() <= MAX_KEY_SET_STEPS
            && self
                .steps
                .iter()
                .any(|s| matches!(s, KeySpec::Encryption(_)))
            && self.steps.iter().all(|s| s.is_valid())
    }

    fn is_supported(&self, factory: &dyn CryptoFactory) -> bool {
        self.is_valid() && self.steps.iter().all(|s| s.is_supported(factory))
    }
}

impl fmt::Display for KeySetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.steps.iter().map(|s| s.to_string()).collect();
        write!(f, "[{}]", parts.join(" -> "))
    }
}
