/*!
 * Cryptographic Factory
 *
 * The key-store never calls primitive algorithms directly. Digests, MACs,
 * ciphers, key generation, signatures and key agreement are consumed through
 * the [`CryptoFactory`] capability, so a store can run on a different engine
 * or in a restricted mode without changing any key-store code.
 *
 * [`DefaultFactory`] is the stock engine. Its restricted mode disables every
 * digest longer than 256 bits and everything that depends on one.
 */

mod default;


use std::fmt;

use crate::error::KeyStoreResult;
use crate::secure_memory::SecureBytes;
use crate::spec::{DigestSpec, EncryptionSpec, KeyPairSpec, KeySpec, MacSpec};

pub use default::DefaultFactory;

/// Freshly generated asymmetric key material
#[derive(Debug, Clone)]
pub struct GeneratedKeyPair {
    pub spec: KeyPairSpec,
    pub public_key: Vec<u8>,
    pub private_key: SecureBytes,
}

/// The primitive cryptographic engine used by the key-store
pub trait CryptoFactory: Send + Sync + fmt::Debug {
    /// Human readable engine name
    fn name(&self) -> &str;

    /// Whether the engine runs in restricted mode
    fn is_restricted(&self) -> bool;

    fn supports_digest(&self, spec: &DigestSpec) -> bool;

    fn supports_mac(&self, spec: &MacSpec) -> bool;

    /// Support for the cipher of `spec`; composite components are checked by the descriptor itself
    fn supports_encryption(&self, spec: &EncryptionSpec) -> bool;

    fn supports_key_pair(&self, spec: &KeyPairSpec) -> bool;

    /// Cryptographically secure random bytes
    fn random_bytes(&self, length: usize) -> SecureBytes;

    fn digest(&self, spec: &DigestSpec, data: &[u8]) -> KeyStoreResult<Vec<u8>>;

    fn mac(&self, spec: &MacSpec, key: &[u8], data: &[u8]) -> KeyStoreResult<Vec<u8>>;

    /// Constant-time MAC verification
    fn verify_mac(&self, spec: &MacSpec, key: &[u8], data: &[u8], tag: &[u8]) -> KeyStoreResult<bool>;

    /// Encrypt `plaintext`; the output starts with the nonce/IV
    fn encrypt(
        &self,
        spec: &EncryptionSpec,
        key: &[u8],
        plaintext: &[u8],
        associated_data: &[u8],
    ) -> KeyStoreResult<Vec<u8>>;

    /// Decrypt output of [`CryptoFactory::encrypt`]. Authentication failure is a `Security` error.
    fn decrypt(
        &self,
        spec: &EncryptionSpec,
        key: &[u8],
        ciphertext: &[u8],
        associated_data: &[u8],
    ) -> KeyStoreResult<SecureBytes>;

    /// Fresh symmetric key material for `spec`
    fn generate_key(&self, spec: &KeySpec) -> KeyStoreResult<SecureBytes>;

    fn generate_key_pair(&self, spec: &KeyPairSpec) -> KeyStoreResult<GeneratedKeyPair>;

    /// Recompute the public key belonging to `private_key`
    fn public_key_from_private(&self, spec: &KeyPairSpec, private_key: &[u8]) -> KeyStoreResult<Vec<u8>>;

    fn sign(&self, spec: &KeyPairSpec, private_key: &[u8], message: &[u8]) -> KeyStoreResult<Vec<u8>>;

    fn verify(
        &self,
        spec: &KeyPairSpec,
        public_key: &[u8],
        message: &[u8],
        signature: &[u8],
    ) -> KeyStoreResult<bool>;

    /// Diffie-Hellman agreement for key-agreement key pairs
    fn agree(&self, spec: &KeyPairSpec, private_key: &[u8], peer_public_key: &[u8]) -> KeyStoreResult<SecureBytes>;
}
