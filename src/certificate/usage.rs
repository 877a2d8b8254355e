use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

use crate::error::{error_codes, KeyStoreError};

/// Intended-use bit-set of a certificate; flags combine independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct KeyUsage(u16);

impl KeyUsage {
    pub const CERTIFICATE_SIGNING: KeyUsage = KeyUsage(1 << 0);
    pub const DIGITAL_SIGNATURE: KeyUsage = KeyUsage(1 << 1);
    pub const NON_REPUDIATION: KeyUsage = KeyUsage(1 << 2);
    pub const KEY_AGREEMENT: KeyUsage = KeyUsage(1 << 3);
    pub const KEY_ENCIPHERMENT: KeyUsage = KeyUsage(1 << 4);
    pub const DATA_ENCIPHERMENT: KeyUsage = KeyUsage(1 << 5);
    pub const ENCIPHER_ONLY: KeyUsage = KeyUsage(1 << 6);
    pub const DECIPHER_ONLY: KeyUsage = KeyUsage(1 << 7);

    const ALL_BITS: u16 = 0xff;

    const NAMES: [(KeyUsage, &'static str); 8] = [
        (Self::CERTIFICATE_SIGNING, "certificate-signing"),
        (Self::DIGITAL_SIGNATURE, "digital-signature"),
        (Self::NON_REPUDIATION, "non-repudiation"),
        (Self::KEY_AGREEMENT, "key-agreement"),
        (Self::KEY_ENCIPHERMENT, "key-encipherment"),
        (Self::DATA_ENCIPHERMENT, "data-encipherment"),
        (Self::ENCIPHER_ONLY, "encipher-only"),
        (Self::DECIPHER_ONLY, "decipher-only"),
    ];

    pub const fn empty() -> Self {
        KeyUsage(0)
    }

    pub const fn bits(&self) -> u16 {
        self.0
    }

    /// `None` when `bits` has a flag outside the eight defined ones
    pub fn from_bits(bits: u16) -> Option<Self> {
        if bits & !Self::ALL_BITS == 0 {
            Some(KeyUsage(bits))
        } else {
            None
        }
    }

    pub fn contains(&self, other: KeyUsage) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Names of the set flags, lowest bit first
    pub fn names(&self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl TryFrom<u16> for KeyUsage {
    type Error = KeyStoreError;

    fn try_from(bits: u16) -> Result<Self, Self::Error> {
        KeyUsage::from_bits(bits).ok_or_else(|| {
            KeyStoreError::data(
                &format!("undefined key usage bits {:#06x}", bits),
                error_codes::ENCODING_FAILED,
            )
        })
    }
}

impl From<KeyUsage> for u16 {
    fn from(usage: KeyUsage) -> Self {
        usage.0
    }
}

impl BitOr for KeyUsage {
    type Output = KeyUsage;

    fn bitor(self, rhs: KeyUsage) -> KeyUsage {
        KeyUsage(self.0 | rhs.0)
    }
}

impl BitOrAssign for KeyUsage {
    fn bitor_assign(&mut self, rhs: KeyUsage) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for KeyUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        write!(f, "{}", self.names().join("|"))
    }
}
