//! Password-based key derivation (Argon2id)

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{error_codes, KeyStoreError, KeyStoreResult};
use crate::secure_memory::Password;
use crate::utils;

/// Salt length in bytes
pub const SALT_LENGTH: usize = 16;

/// Upper bound on the memory cost accepted from a stored envelope (4 GiB, in KiB)
pub const MAX_MEMORY_COST: u32 = 4 * 1024 * 1024;

/// Upper bound on the iteration count accepted from a stored envelope
pub const MAX_TIME_COST: u32 = 64;

/// Upper bound on the lane count accepted from a stored envelope
pub const MAX_PARALLELISM: u32 = 64;

/// Derived key from a password
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    pub key: Vec<u8>,
    pub salt: Vec<u8>,
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("key", &"[REDACTED]")
            .field("salt", &utils::to_hex(&self.salt))
            .finish()
    }
}

/// Parameters for key derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDerivationParams {
    /// Memory cost (in KB)
    pub memory_cost: u32,
    /// Time cost (iterations)
    pub time_cost: u32,
    /// Parallelism factor
    pub parallelism: u32,
    /// Output key length in bytes
    pub key_length: usize,
}

impl Default for KeyDerivationParams {
    fn default() -> Self {
        Self {
            memory_cost: 65536, // 64 MB
            time_cost: 3,
            parallelism: 4,
            key_length: 32,
        }
    }
}

impl KeyDerivationParams {
    /// Reject parameters that Argon2 would refuse or that would exhaust memory
    pub fn validate(&self) -> KeyStoreResult<()> {
        let below_lane_minimum = self
            .parallelism
            .checked_mul(8)
            .map_or(true, |minimum| self.memory_cost < minimum);
        if self.memory_cost > MAX_MEMORY_COST
            || self.time_cost == 0
            || self.time_cost > MAX_TIME_COST
            || self.parallelism == 0
            || self.parallelism > MAX_PARALLELISM
            || below_lane_minimum
            || self.key_length < 16
        {
            return Err(KeyStoreError::crypto(
                &format!("unusable key derivation parameters {:?}", self),
                error_codes::KEY_DERIVATION_FAILED,
            ));
        }
        Ok(())
    }
}

/// Low-resource mode for constrained environments
pub fn low_resource_params() -> KeyDerivationParams {
    KeyDerivationParams {
        memory_cost: 19456, // 19 MB
        time_cost: 2,
        parallelism: 1,
        key_length: 32,
    }
}

/// High-security mode for sensitive keys
pub fn high_security_params() -> KeyDerivationParams {
    KeyDerivationParams {
        memory_cost: 262144, // 256 MB
        time_cost: 4,
        parallelism: 8,
        key_length: 32,
    }
}

/// Smallest parameters Argon2 accepts. Only for tests and throwaway stores.
pub fn minimal_params() -> KeyDerivationParams {
    KeyDerivationParams {
        memory_cost: 64,
        time_cost: 1,
        parallelism: 1,
        key_length: 32,
    }
}

/// Derives a key from a password
///
/// # Arguments
///
/// * `password` - The password to derive a key from
/// * `salt` - Optional salt to use (generates a new one if None)
/// * `params` - Parameters for key derivation
///
/// # Returns
///
/// A DerivedKey containing the derived key and salt used
pub fn derive_key_from_password(
    password: &Password,
    salt: Option<&[u8]>,
    params: &KeyDerivationParams,
) -> KeyStoreResult<DerivedKey> {
    params.validate()?;

    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(params.key_length),
    )
    .map_err(|e| {
        KeyStoreError::crypto(
            &format!("failed to build Argon2 parameters: {}", e),
            error_codes::KEY_DERIVATION_FAILED,
        )
    })?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let salt = match salt {
        Some(s) => s.to_vec(),
        None => utils::random_bytes(SALT_LENGTH),
    };

    let mut key = vec![0u8; params.key_length];
    argon2
        .hash_password_into(password.as_bytes(), &salt, &mut key)
        .map_err(|e| {
            key.zeroize();
            KeyStoreError::crypto(
                &format!("failed to derive key: {}", e),
                error_codes::KEY_DERIVATION_FAILED,
            )
        })?;

    Ok(DerivedKey { key, salt })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key() {
        let derived =
            derive_key_from_password(&Password::new("secure_password123"), None, &minimal_params())
                .unwrap();
        assert_eq!(derived.key.len(), 32);
        assert_eq!(derived.salt.len(), SALT_LENGTH);
    }

    #[test]
    fn test_with_custom_salt() {
        let password = Password::new("secure_password123");
        let salt = utils::random_bytes(SALT_LENGTH);
        let a = derive_key_from_password(&password, Some(&salt), &minimal_params()).unwrap();
        let b = derive_key_from_password(&password, Some(&salt), &minimal_params()).unwrap();
        assert_eq!(a.key, b.key);

        let c = derive_key_from_password(&Password::new("other"), Some(&salt), &minimal_params())
            .unwrap();
        assert_ne!(a.key, c.key);
    }

    #[test]
    fn test_rejects_degenerate_params() {
        let params = KeyDerivationParams {
            memory_cost: 4,
            time_cost: 1,
            parallelism: 1,
            key_length: 32,
        };
        assert!(derive_key_from_password(&Password::new("x"), None, &params).is_err());
        let params = KeyDerivationParams {
            time_cost: 0,
            ..minimal_params()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_rejects_oversized_params() {
        let params = KeyDerivationParams {
            parallelism: 0x2000_0000,
            ..minimal_params()
        };
        assert!(params.validate().is_err());
        let params = KeyDerivationParams {
            memory_cost: MAX_MEMORY_COST,
            parallelism: u32::MAX,
            ..minimal_params()
        };
        assert!(params.validate().is_err());
        let params = KeyDerivationParams {
            time_cost: u32::MAX,
            ..minimal_params()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_presets_are_valid() {
        KeyDerivationParams::default().validate().unwrap();
        low_resource_params().validate().unwrap();
        high_security_params().validate().unwrap();
        minimal_params().validate().unwrap();
    }
}
