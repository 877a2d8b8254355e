/*!
 * Secure Container
 *
 * Password-derived at-rest encryption of opaque payloads. The key-store hands
 * every secret (private keys, symmetric keys, key-bundle material) to a
 * [`SecureContainer`] before it is stored, so plaintext secrets never appear
 * in a serialized store.
 */

mod envelope;
pub mod password;


use std::fmt;

use crate::error::KeyStoreResult;
use crate::secure_memory::{Password, SecureBytes};

pub use envelope::{PasswordContainer, ENVELOPE_VERSION};
pub use password::{derive_key_from_password, DerivedKey, KeyDerivationParams};

/// Encrypts and decrypts byte payloads under a password
pub trait SecureContainer: Send + Sync + fmt::Debug {
    /// Encrypt `plaintext` under a key derived from `password`
    fn seal(&self, password: &Password, plaintext: &[u8], associated_data: &[u8]) -> KeyStoreResult<Vec<u8>>;

    /// Decrypt an envelope produced by [`SecureContainer::seal`].
    ///
    /// A wrong password is a `Security` error, a malformed envelope a `Data` error.
    fn open(&self, password: &Password, envelope: &[u8], associated_data: &[u8]) -> KeyStoreResult<SecureBytes>;
}
