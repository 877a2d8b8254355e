use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};

use super::password::{derive_key_from_password, KeyDerivationParams, SALT_LENGTH};
use super::SecureContainer;
use crate::error::{error_codes, KeyStoreError, KeyStoreResult};
use crate::secure_memory::{Password, SecureBytes};
use crate::utils;

/// Current envelope layout version
pub const ENVELOPE_VERSION: u8 = 1;

const NONCE_LENGTH: usize = 24;
const HEADER_LENGTH: usize = 1 + 4 * 3 + SALT_LENGTH + NONCE_LENGTH;

/// A [`SecureContainer`] that derives a fresh Argon2id key per envelope and
/// encrypts with XChaCha20-Poly1305.
///
/// Envelope layout:
///
/// ```text
/// version u8 | memory u32 | time u32 | parallelism u32 | salt[16] | nonce[24] | ciphertext+tag
/// ```
///
/// The derivation parameters travel with the envelope, so envelopes stay
/// readable after the configured parameters change.
#[derive(Debug, Clone)]
pub struct PasswordContainer {
    params: KeyDerivationParams,
}

impl Default for PasswordContainer {
    fn default() -> Self {
        Self::new(KeyDerivationParams::default())
    }
}

impl PasswordContainer {
    pub fn new(params: KeyDerivationParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &KeyDerivationParams {
        &self.params
    }

    fn malformed(reason: &str) -> KeyStoreError {
        KeyStoreError::data(
            &format!("malformed secure envelope: {}", reason),
            error_codes::MALFORMED_CONTAINER,
        )
    }

    fn read_u32(bytes: &[u8], offset: usize) -> u32 {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&bytes[offset..offset + 4]);
        u32::from_le_bytes(buf)
    }
}

impl SecureContainer for PasswordContainer {
    fn seal(&self, password: &Password, plaintext: &[u8], associated_data: &[u8]) -> KeyStoreResult<Vec<u8>> {
        let params = KeyDerivationParams {
            key_length: 32,
            ..self.params
        };
        let derived = derive_key_from_password(password, None, &params)?;
        let nonce = utils::random_bytes(NONCE_LENGTH);

        let mut envelope = Vec::with_capacity(HEADER_LENGTH + plaintext.len() + 16);
        envelope.push(ENVELOPE_VERSION);
        envelope.extend_from_slice(&params.memory_cost.to_le_bytes());
        envelope.extend_from_slice(&params.time_cost.to_le_bytes());
        envelope.extend_from_slice(&params.parallelism.to_le_bytes());
        envelope.extend_from_slice(&derived.salt);
        envelope.extend_from_slice(&nonce);

        let cipher = XChaCha20Poly1305::new_from_slice(&derived.key).map_err(|_| {
            KeyStoreError::crypto("derived key has the wrong length", error_codes::KEY_DERIVATION_FAILED)
        })?;
        // the header is authenticated along with the caller's associated data
        let mut aad = envelope.clone();
        aad.extend_from_slice(associated_data);
        let ciphertext = cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|e| {
                KeyStoreError::crypto(
                    &format!("envelope encryption failed: {}", e),
                    error_codes::CIPHER_FAILED,
                )
            })?;
        envelope.extend_from_slice(&ciphertext);
        Ok(envelope)
    }

    fn open(&self, password: &Password, envelope: &[u8], associated_data: &[u8]) -> KeyStoreResult<SecureBytes> {
        if envelope.len() < HEADER_LENGTH + 16 {
            return Err(Self::malformed("too short"));
        }
        if envelope[0] != ENVELOPE_VERSION {
            return Err(KeyStoreError::data(
                &format!("unsupported envelope version {}", envelope[0]),
                error_codes::UNSUPPORTED_FORMAT_VERSION,
            ));
        }
        let params = KeyDerivationParams {
            memory_cost: Self::read_u32(envelope, 1),
            time_cost: Self::read_u32(envelope, 5),
            parallelism: Self::read_u32(envelope, 9),
            key_length: 32,
        };
        params.validate().map_err(|_| Self::malformed("bad derivation parameters"))?;

        let salt = &envelope[13..13 + SALT_LENGTH];
        let nonce = &envelope[13 + SALT_LENGTH..HEADER_LENGTH];
        let derived = derive_key_from_password(password, Some(salt), &params)?;

        let cipher = XChaCha20Poly1305::new_from_slice(&derived.key).map_err(|_| {
            KeyStoreError::crypto("derived key has the wrong length", error_codes::KEY_DERIVATION_FAILED)
        })?;
        let mut aad = envelope[..HEADER_LENGTH].to_vec();
        aad.extend_from_slice(associated_data);
        cipher
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: &envelope[HEADER_LENGTH..],
                    aad: &aad,
                },
            )
            .map(SecureBytes::from)
            .map_err(|_| KeyStoreError::security("wrong password", error_codes::WRONG_PASSWORD))
    }
}
