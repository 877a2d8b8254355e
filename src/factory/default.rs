use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use ctr::cipher::{KeyIvInit, StreamCipher as _};
use hmac::{Hmac, Mac};
use ring::rand::SystemRandom;
use ring::signature::{self, EcdsaKeyPair, Ed25519KeyPair, KeyPair as _, UnparsedPublicKey};
use sha2::{Digest, Sha256, Sha384, Sha512};
use sha3::{Sha3_256, Sha3_512};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

use super::{CryptoFactory, GeneratedKeyPair};
use crate::error::{error_codes, KeyStoreError, KeyStoreResult};
use crate::secure_memory::SecureBytes;
use crate::spec::{
    ensure_usable, AeadAlgorithm, DigestAlgorithm, DigestSpec, EcCurve, EncryptionSpec,
    KeyPairSpec, KeySpec, MacSpec, StreamCipher,
};
use crate::utils;

type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

/// Longest digest output, in bytes, allowed in restricted mode
pub const RESTRICTED_MAX_DIGEST_LENGTH: usize = 32;

/// The stock cryptographic engine.
///
/// Signatures use `ring` (Ed25519, ECDSA P-256/P-384), key agreement uses
/// `x25519-dalek`, ciphers use `aes-gcm`, `chacha20poly1305` and `aes`/`ctr`,
/// MACs use `hmac` and `blake3`.
///
/// # Examples
///
/// ```
/// use qasa_keystore::factory::{CryptoFactory, DefaultFactory};
/// use qasa_keystore::spec::{AlgorithmSpec, KeyPairSpec};
///
/// let factory = DefaultFactory::new();
/// assert!(KeyPairSpec::ecdsa_p384().is_supported(&factory));
///
/// let restricted = DefaultFactory::restricted();
/// assert!(KeyPairSpec::ecdsa_p384().is_valid());
/// assert!(!KeyPairSpec::ecdsa_p384().is_supported(&restricted));
/// ```
#[derive(Debug, Clone)]
pub struct DefaultFactory {
    restricted: bool,
    rng: SystemRandom,
}

impl Default for DefaultFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultFactory {
    /// Full-strength engine
    pub fn new() -> Self {
        Self {
            restricted: false,
            rng: SystemRandom::new(),
        }
    }

    /// Engine with long digests disabled
    pub fn restricted() -> Self {
        Self {
            restricted: true,
            rng: SystemRandom::new(),
        }
    }

    fn ecdsa_signing(curve: EcCurve) -> &'static signature::EcdsaSigningAlgorithm {
        match curve {
            EcCurve::P256 => &signature::ECDSA_P256_SHA256_FIXED_SIGNING,
            EcCurve::P384 => &signature::ECDSA_P384_SHA384_FIXED_SIGNING,
        }
    }

    fn ecdsa_verification(curve: EcCurve) -> &'static signature::EcdsaVerificationAlgorithm {
        match curve {
            EcCurve::P256 => &signature::ECDSA_P256_SHA256_FIXED,
            EcCurve::P384 => &signature::ECDSA_P384_SHA384_FIXED,
        }
    }

    fn check_key_length(expected: usize, actual: usize) -> KeyStoreResult<()> {
        if expected != actual {
            return Err(KeyStoreError::crypto(
                &format!("expected {} bytes of key material, got {}", expected, actual),
                error_codes::INVALID_KEY_MATERIAL,
            ));
        }
        Ok(())
    }

    fn key_rejected(spec: &KeyPairSpec, cause: impl std::fmt::Display) -> KeyStoreError {
        KeyStoreError::crypto(
            &format!("{} key material rejected: {}", spec, cause),
            error_codes::INVALID_KEY_MATERIAL,
        )
    }

    fn cannot_sign(spec: &KeyPairSpec) -> KeyStoreError {
        KeyStoreError::crypto(
            &format!("{} keys cannot sign", spec),
            error_codes::SIGNER_NOT_AUTHORIZED,
        )
    }

    fn x25519_secret(private_key: &[u8]) -> KeyStoreResult<StaticSecret> {
        let bytes: Zeroizing<[u8; 32]> = Zeroizing::new(private_key.try_into().map_err(|_| {
            Self::key_rejected(&KeyPairSpec::X25519, "expected 32 bytes")
        })?);
        Ok(StaticSecret::from(*bytes))
    }

    fn aead_encrypt(
        algorithm: AeadAlgorithm,
        key: &[u8],
        nonce: &[u8],
        payload: Payload<'_, '_>,
    ) -> Result<Vec<u8>, aes_gcm::aead::Error> {
        match algorithm {
            AeadAlgorithm::Aes256Gcm => aes_gcm::Aes256Gcm::new_from_slice(key)
                .map_err(|_| aes_gcm::aead::Error)?
                .encrypt(GenericArray::from_slice(nonce), payload),
            AeadAlgorithm::ChaCha20Poly1305 => chacha20poly1305::ChaCha20Poly1305::new_from_slice(key)
                .map_err(|_| aes_gcm::aead::Error)?
                .encrypt(GenericArray::from_slice(nonce), payload),
            AeadAlgorithm::XChaCha20Poly1305 => {
                chacha20poly1305::XChaCha20Poly1305::new_from_slice(key)
                    .map_err(|_| aes_gcm::aead::Error)?
                    .encrypt(GenericArray::from_slice(nonce), payload)
            }
        }
    }

    fn aead_decrypt(
        algorithm: AeadAlgorithm,
        key: &[u8],
        nonce: &[u8],
        payload: Payload<'_, '_>,
    ) -> Result<Vec<u8>, aes_gcm::aead::Error> {
        match algorithm {
            AeadAlgorithm::Aes256Gcm => aes_gcm::Aes256Gcm::new_from_slice(key)
                .map_err(|_| aes_gcm::aead::Error)?
                .decrypt(GenericArray::from_slice(nonce), payload),
            AeadAlgorithm::ChaCha20Poly1305 => chacha20poly1305::ChaCha20Poly1305::new_from_slice(key)
                .map_err(|_| aes_gcm::aead::Error)?
                .decrypt(GenericArray::from_slice(nonce), payload),
            AeadAlgorithm::XChaCha20Poly1305 => {
                chacha20poly1305::XChaCha20Poly1305::new_from_slice(key)
                    .map_err(|_| aes_gcm::aead::Error)?
                    .decrypt(GenericArray::from_slice(nonce), payload)
            }
        }
    }

    fn apply_stream(cipher: StreamCipher, key: &[u8], iv: &[u8], data: &mut [u8]) -> KeyStoreResult<()> {
        match cipher {
            StreamCipher::Aes256Ctr => {
                let mut ctr = Aes256Ctr::new_from_slices(key, iv).map_err(|_| {
                    KeyStoreError::crypto("invalid AES-CTR key or IV length", error_codes::CIPHER_FAILED)
                })?;
                ctr.apply_keystream(data);
                Ok(())
            }
        }
    }
}

/// Input authenticated by the MAC of an encrypt-then-MAC scheme
fn etm_mac_input(iv_and_ciphertext: &[u8], associated_data: &[u8]) -> Vec<u8> {
    let mut input = Vec::with_capacity(iv_and_ciphertext.len() + associated_data.len() + 8);
    input.extend_from_slice(&(associated_data.len() as u64).to_le_bytes());
    input.extend_from_slice(associated_data);
    input.extend_from_slice(iv_and_ciphertext);
    input
}

fn hmac_tag<M: Mac + KeyInit>(key: &[u8], data: &[u8]) -> KeyStoreResult<Vec<u8>> {
    let mut mac = <M as KeyInit>::new_from_slice(key)
        .map_err(|_| KeyStoreError::crypto("invalid HMAC key", error_codes::INVALID_KEY_MATERIAL))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

impl CryptoFactory for DefaultFactory {
    fn name(&self) -> &str {
        if self.restricted {
            "qasa-default (restricted)"
        } else {
            "qasa-default"
        }
    }

    fn is_restricted(&self) -> bool {
        self.restricted
    }

    fn supports_digest(&self, spec: &DigestSpec) -> bool {
        !self.restricted || spec.length <= RESTRICTED_MAX_DIGEST_LENGTH
    }

    fn supports_mac(&self, spec: &MacSpec) -> bool {
        match spec {
            MacSpec::Hmac { digest, .. } => matches!(
                digest.algorithm,
                DigestAlgorithm::Sha256 | DigestAlgorithm::Sha384 | DigestAlgorithm::Sha512
            ),
            MacSpec::Blake3Keyed { tag_length } => {
                !self.restricted || *tag_length <= RESTRICTED_MAX_DIGEST_LENGTH
            }
        }
    }

    fn supports_encryption(&self, _spec: &EncryptionSpec) -> bool {
        true
    }

    fn supports_key_pair(&self, spec: &KeyPairSpec) -> bool {
        match spec {
            KeyPairSpec::Ed25519 | KeyPairSpec::X25519 => true,
            KeyPairSpec::Ecdsa { curve, digest } => *digest == curve.preferred_digest(),
        }
    }

    fn random_bytes(&self, length: usize) -> SecureBytes {
        SecureBytes::from(utils::random_bytes(length))
    }

    fn digest(&self, spec: &DigestSpec, data: &[u8]) -> KeyStoreResult<Vec<u8>> {
        ensure_usable(spec, self)?;
        let output = match spec.algorithm {
            DigestAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            DigestAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
            DigestAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
            DigestAlgorithm::Sha3_256 => Sha3_256::digest(data).to_vec(),
            DigestAlgorithm::Sha3_512 => Sha3_512::digest(data).to_vec(),
            DigestAlgorithm::Blake3 => {
                let mut hasher = blake3::Hasher::new();
                hasher.update(data);
                let mut out = vec![0u8; spec.length];
                hasher.finalize_xof().fill(&mut out);
                out
            }
        };
        Ok(output)
    }

    fn mac(&self, spec: &MacSpec, key: &[u8], data: &[u8]) -> KeyStoreResult<Vec<u8>> {
        ensure_usable(spec, self)?;
        Self::check_key_length(spec.key_length(), key.len())?;
        match spec {
            MacSpec::Hmac { digest, .. } => match digest.algorithm {
                DigestAlgorithm::Sha256 => hmac_tag::<Hmac<Sha256>>(key, data),
                DigestAlgorithm::Sha384 => hmac_tag::<Hmac<Sha384>>(key, data),
                DigestAlgorithm::Sha512 => hmac_tag::<Hmac<Sha512>>(key, data),
                _ => Err(KeyStoreError::unsupported_spec((*spec).into())),
            },
            MacSpec::Blake3Keyed { tag_length } => {
                let key: Zeroizing<[u8; 32]> = Zeroizing::new(key.try_into().map_err(|_| {
                    KeyStoreError::crypto("BLAKE3 key must be 32 bytes", error_codes::INVALID_KEY_MATERIAL)
                })?);
                let mut hasher = blake3::Hasher::new_keyed(&key);
                hasher.update(data);
                let mut out = vec![0u8; *tag_length];
                hasher.finalize_xof().fill(&mut out);
                Ok(out)
            }
        }
    }

    fn verify_mac(&self, spec: &MacSpec, key: &[u8], data: &[u8], tag: &[u8]) -> KeyStoreResult<bool> {
        let expected = self.mac(spec, key, data)?;
        Ok(utils::constant_time_eq(&expected, tag))
    }

    fn encrypt(
        &self,
        spec: &EncryptionSpec,
        key: &[u8],
        plaintext: &[u8],
        associated_data: &[u8],
    ) -> KeyStoreResult<Vec<u8>> {
        ensure_usable(spec, self)?;
        Self::check_key_length(spec.key_material_length(), key.len())?;
        match spec {
            EncryptionSpec::Aead { algorithm, .. } => {
                let nonce = utils::random_bytes(algorithm.nonce_length());
                let payload = Payload {
                    msg: plaintext,
                    aad: associated_data,
                };
                let ciphertext = Self::aead_encrypt(*algorithm, key, &nonce, payload).map_err(|e| {
                    KeyStoreError::crypto(
                        &format!("{} encryption failed: {}", algorithm, e),
                        error_codes::CIPHER_FAILED,
                    )
                })?;
                let mut out = nonce;
                out.extend_from_slice(&ciphertext);
                Ok(out)
            }
            EncryptionSpec::EncryptThenMac {
                cipher,
                key_length,
                mac,
            } => {
                let (cipher_key, mac_key) = key.split_at(*key_length);
                let mut out = utils::random_bytes(cipher.iv_length());
                let mut body = Zeroizing::new(plaintext.to_vec());
                Self::apply_stream(*cipher, cipher_key, &out, &mut body)?;
                out.extend_from_slice(&body);
                let tag = self.mac(mac, mac_key, &etm_mac_input(&out, associated_data))?;
                out.extend_from_slice(&tag);
                Ok(out)
            }
        }
    }

    fn decrypt(
        &self,
        spec: &EncryptionSpec,
        key: &[u8],
        ciphertext: &[u8],
        associated_data: &[u8],
    ) -> KeyStoreResult<SecureBytes> {
        ensure_usable(spec, self)?;
        Self::check_key_length(spec.key_material_length(), key.len())?;
        if ciphertext.len() < spec.overhead() {
            return Err(KeyStoreError::data(
                "ciphertext shorter than nonce and tag",
                error_codes::MALFORMED_CONTAINER,
            ));
        }
        match spec {
            EncryptionSpec::Aead { algorithm, .. } => {
                let (nonce, body) = ciphertext.split_at(algorithm.nonce_length());
                let payload = Payload {
                    msg: body,
                    aad: associated_data,
                };
                Self::aead_decrypt(*algorithm, key, nonce, payload)
                    .map(SecureBytes::from)
                    .map_err(|_| {
                        KeyStoreError::security(
                            &format!("{} authentication failed", algorithm),
                            error_codes::MAC_MISMATCH,
                        )
                    })
            }
            EncryptionSpec::EncryptThenMac {
                cipher,
                key_length,
                mac,
            } => {
                let (cipher_key, mac_key) = key.split_at(*key_length);
                let (authenticated, tag) = ciphertext.split_at(ciphertext.len() - mac.tag_length());
                if !self.verify_mac(mac, mac_key, &etm_mac_input(authenticated, associated_data), tag)? {
                    return Err(KeyStoreError::security(
                        &format!("{} authentication failed", spec),
                        error_codes::MAC_MISMATCH,
                    ));
                }
                let (iv, body) = authenticated.split_at(cipher.iv_length());
                let mut plaintext = SecureBytes::new(body);
                Self::apply_stream(*cipher, cipher_key, iv, plaintext.as_bytes_mut())?;
                Ok(plaintext)
            }
        }
    }

    fn generate_key(&self, spec: &KeySpec) -> KeyStoreResult<SecureBytes> {
        ensure_usable(spec, self)?;
        Ok(self.random_bytes(spec.key_length()))
    }

    fn generate_key_pair(&self, spec: &KeyPairSpec) -> KeyStoreResult<GeneratedKeyPair> {
        ensure_usable(spec, self)?;
        let generation_failed = |cause: &str| {
            KeyStoreError::crypto(
                &format!("{} key generation failed: {}", spec, cause),
                error_codes::KEY_GENERATION_FAILED,
            )
        };
        let (public_key, private_key) = match spec {
            KeyPairSpec::Ed25519 => {
                let pkcs8 = Ed25519KeyPair::generate_pkcs8(&self.rng)
                    .map_err(|e| generation_failed(&e.to_string()))?;
                let key_pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
                    .map_err(|e| generation_failed(&e.to_string()))?;
                (
                    key_pair.public_key().as_ref().to_vec(),
                    SecureBytes::new(pkcs8.as_ref()),
                )
            }
            KeyPairSpec::Ecdsa { curve, .. } => {
                let algorithm = Self::ecdsa_signing(*curve);
                let pkcs8 = EcdsaKeyPair::generate_pkcs8(algorithm, &self.rng)
                    .map_err(|e| generation_failed(&e.to_string()))?;
                let key_pair = EcdsaKeyPair::from_pkcs8(algorithm, pkcs8.as_ref(), &self.rng)
                    .map_err(|e| generation_failed(&e.to_string()))?;
                (
                    key_pair.public_key().as_ref().to_vec(),
                    SecureBytes::new(pkcs8.as_ref()),
                )
            }
            KeyPairSpec::X25519 => {
                let seed = Zeroizing::new(utils::random_array::<32>());
                let secret = StaticSecret::from(*seed);
                let public = X25519PublicKey::from(&secret);
                let private = SecureBytes::new(Zeroizing::new(secret.to_bytes()).as_ref());
                (public.as_bytes().to_vec(), private)
            }
        };
        Ok(GeneratedKeyPair {
            spec: *spec,
            public_key,
            private_key,
        })
    }

    fn public_key_from_private(&self, spec: &KeyPairSpec, private_key: &[u8]) -> KeyStoreResult<Vec<u8>> {
        match spec {
            KeyPairSpec::Ed25519 => Ed25519KeyPair::from_pkcs8(private_key)
                .map(|kp| kp.public_key().as_ref().to_vec())
                .map_err(|e| Self::key_rejected(spec, e)),
            KeyPairSpec::Ecdsa { curve, .. } => {
                EcdsaKeyPair::from_pkcs8(Self::ecdsa_signing(*curve), private_key, &self.rng)
                    .map(|kp| kp.public_key().as_ref().to_vec())
                    .map_err(|e| Self::key_rejected(spec, e))
            }
            KeyPairSpec::X25519 => {
                let secret = Self::x25519_secret(private_key)?;
                Ok(X25519PublicKey::from(&secret).as_bytes().to_vec())
            }
        }
    }

    fn sign(&self, spec: &KeyPairSpec, private_key: &[u8], message: &[u8]) -> KeyStoreResult<Vec<u8>> {
        ensure_usable(spec, self)?;
        match spec {
            KeyPairSpec::Ed25519 => {
                let key_pair =
                    Ed25519KeyPair::from_pkcs8(private_key).map_err(|e| Self::key_rejected(spec, e))?;
                Ok(key_pair.sign(message).as_ref().to_vec())
            }
            KeyPairSpec::Ecdsa { curve, .. } => {
                let key_pair = EcdsaKeyPair::from_pkcs8(Self::ecdsa_signing(*curve), private_key, &self.rng)
                    .map_err(|e| Self::key_rejected(spec, e))?;
                key_pair
                    .sign(&self.rng, message)
                    .map(|sig| sig.as_ref().to_vec())
                    .map_err(|e| {
                        KeyStoreError::crypto(
                            &format!("{} signing failed: {}", spec, e),
                            error_codes::SIGNING_FAILED,
                        )
                    })
            }
            KeyPairSpec::X25519 => Err(Self::cannot_sign(spec)),
        }
    }

    fn verify(
        &self,
        spec: &KeyPairSpec,
        public_key: &[u8],
        message: &[u8],
        signature: &[u8],
    ) -> KeyStoreResult<bool> {
        ensure_usable(spec, self)?;
        if !spec.can_sign() {
            return Err(Self::cannot_sign(spec));
        }
        let verified = match spec {
            KeyPairSpec::Ed25519 => UnparsedPublicKey::new(&signature::ED25519, public_key)
                .verify(message, signature)
                .is_ok(),
            KeyPairSpec::Ecdsa { curve, .. } => {
                UnparsedPublicKey::new(Self::ecdsa_verification(*curve), public_key)
                    .verify(message, signature)
                    .is_ok()
            }
            KeyPairSpec::X25519 => false,
        };
        Ok(verified)
    }

    fn agree(&self, spec: &KeyPairSpec, private_key: &[u8], peer_public_key: &[u8]) -> KeyStoreResult<SecureBytes> {
        ensure_usable(spec, self)?;
        if !spec.can_agree() {
            return Err(KeyStoreError::crypto(
                &format!("{} keys cannot perform key agreement", spec),
                error_codes::INVALID_KEY_MATERIAL,
            ));
        }
        let secret = Self::x25519_secret(private_key)?;
        let peer: [u8; 32] = peer_public_key
            .try_into()
            .map_err(|_| Self::key_rejected(spec, "peer public key must be 32 bytes"))?;
        let shared = secret.diffie_hellman(&X25519PublicKey::from(peer));
        Ok(SecureBytes::new(shared.as_bytes()))
    }
}
