/*!
 * QaSa KeyStore
 *
 * A password-protected store of cryptographic material addressed by alias.
 * Each alias holds one of:
 *
 * - a certificate
 * - a key pair together with the certificate chain that certifies it
 * - a single symmetric key
 * - a key set: an ordered bundle of encryption and MAC keys
 *
 * Secrets never sit in the store in the clear: every entry secret is sealed
 * under its own password, and the whole container is encrypted and
 * authenticated under the store password when persisted.
 *
 * On top of the store sit the [`KeyStoreManager`], which creates keys and
 * certificates, and the [`KeyStoreGateway`], which exchanges certificate
 * signing requests and exports or imports entries over byte streams.
 */

/// Algorithm descriptors and their validity/support checks
pub mod spec;

/// Cryptographic primitives behind the algorithm descriptors
pub mod factory;

/// Password-based sealing of secrets
pub mod container;

/// Certificates, distinguished names and certificate chains
pub mod certificate;

/// The alias → entry store and its persisted container
pub mod keystore;

/// Key and certificate creation on top of the store
pub mod manager;

/// CSR exchange and entry import/export
pub mod gateway;

/// Key-store configuration
pub mod config;

/// Common error types for the key-store
pub mod error;

/// Utilities shared across modules
pub mod utils;

/// Secure memory handling utilities
pub mod secure_memory;

// Re-export main types for convenience
pub use certificate::{Certificate, CertificateChain, KeyUsage, Name, PublicKey};
pub use config::KeyStoreConfig;
pub use error::{ErrorKind, KeyStoreError, KeyStoreResult};
pub use gateway::{GatewayState, KeyStoreGateway, LockPrompt};
pub use keystore::{Entry, EntryKind, KeyPair, KeyPairEntry, KeySet, KeyStore, SymmetricKey};
pub use manager::{Credential, KeyStoreManager};
pub use secure_memory::{Password, SecureBytes};

/// Initialize the key-store library.
///
/// Checks that the platform random source and the default cryptographic
/// factory work by generating and self-verifying a throwaway Ed25519 pair.
///
/// # Returns
///
/// `Ok(())` if initialization is successful, or a `Crypto` error if the
/// platform cannot provide the primitives the store relies on
///
/// # Example
///
/// ```
/// use qasa_keystore::prelude::*;
///
/// fn main() -> Result<(), KeyStoreError> {
///     init()?;
///
///     let store = KeyStore::default();
///     assert!(store.is_empty());
///     Ok(())
/// }
/// ```
pub fn init() -> KeyStoreResult<()> {
    use crate::factory::{CryptoFactory, DefaultFactory};
    use crate::spec::KeyPairSpec;

    let factory = DefaultFactory::new();
    let pair = factory.generate_key_pair(&KeyPairSpec::Ed25519)?;
    let probe = factory.random_bytes(32);
    let signature = factory.sign(&pair.spec, pair.private_key.as_bytes(), probe.as_bytes())?;
    if !factory.verify(&pair.spec, &pair.public_key, probe.as_bytes(), &signature)? {
        return Err(KeyStoreError::crypto(
            "self-test signature did not verify",
            error::error_codes::SIGNING_FAILED,
        ));
    }
    log::debug!("qasa-keystore initialized with factory {}", factory.name());
    Ok(())
}

/// Provides a simplified interface to the most commonly used types.
pub mod prelude {
    pub use crate::certificate::{Certificate, CertificateChain, KeyUsage, Name, PublicKey};
    pub use crate::config::KeyStoreConfig;
    pub use crate::container::password::{high_security_params, low_resource_params, minimal_params};
    pub use crate::container::KeyDerivationParams;
    pub use crate::error::{ErrorKind, KeyStoreError, KeyStoreResult};
    pub use crate::gateway::{GatewayState, KeyStoreGateway, LockPrompt};
    pub use crate::init;
    pub use crate::keystore::{Entry, EntryKind, KeyPair, KeyPairEntry, KeySet, KeyStore, SymmetricKey};
    pub use crate::manager::{Credential, KeyStoreManager};
    pub use crate::secure_memory::{with_secure_scope, Password, SecureBytes};
    pub use crate::spec::{
        AlgorithmSpec, DigestSpec, EncryptionSpec, KeyPairSpec, KeySetSpec, KeySetStep, KeySpec, MacSpec,
    };
}
