use std::fmt;

use serde::{Deserialize, Serialize};

use crate::certificate::{Certificate, CertificateChain, PublicKey};
use crate::error::{error_codes, KeyStoreError, KeyStoreResult};
use crate::factory::{CryptoFactory, GeneratedKeyPair};
use crate::secure_memory::SecureBytes;
use crate::spec::{KeyPairSpec, KeySetSpec, KeySetStep, KeySpec};

/// Discriminant of the four entry variants, as written to a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    Certificate,
    KeyPair,
    Key,
    KeySet,
}

impl EntryKind {
    pub fn tag(&self) -> u8 {
        match self {
            EntryKind::Certificate => 1,
            EntryKind::KeyPair => 2,
            EntryKind::Key => 3,
            EntryKind::KeySet => 4,
        }
    }

    pub fn from_tag(tag: u8) -> KeyStoreResult<Self> {
        match tag {
            1 => Ok(EntryKind::Certificate),
            2 => Ok(EntryKind::KeyPair),
            3 => Ok(EntryKind::Key),
            4 => Ok(EntryKind::KeySet),
            other => Err(KeyStoreError::data(
                &format!("unknown entry tag {}", other),
                error_codes::UNKNOWN_ENTRY_TAG,
            )),
        }
    }

    /// Whether entries of this kind hold secret material
    pub fn has_secret(&self) -> bool {
        !matches!(self, EntryKind::Certificate)
    }

    /// Associated data binding a sealed secret to its entry kind
    pub(crate) fn seal_label(&self) -> &'static [u8] {
        match self {
            EntryKind::Certificate => b"qasa-keystore/certificate",
            EntryKind::KeyPair => b"qasa-keystore/key-pair",
            EntryKind::Key => b"qasa-keystore/key",
            EntryKind::KeySet => b"qasa-keystore/key-set",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::Certificate => write!(f, "certificate"),
            EntryKind::KeyPair => write!(f, "key-pair"),
            EntryKind::Key => write!(f, "key"),
            EntryKind::KeySet => write!(f, "key-set"),
        }
    }
}

/// An asymmetric key pair; the private half is wiped on drop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    spec: KeyPairSpec,
    public_key: Vec<u8>,
    private_key: SecureBytes,
}

impl KeyPair {
    pub fn new(spec: KeyPairSpec, public_key: Vec<u8>, private_key: SecureBytes) -> Self {
        Self {
            spec,
            public_key,
            private_key,
        }
    }

    pub fn spec(&self) -> KeyPairSpec {
        self.spec
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::new(self.spec, self.public_key.clone())
    }

    pub fn public_key_bytes(&self) -> &[u8] {
        &self.public_key
    }

    pub fn private_key(&self) -> &SecureBytes {
        &self.private_key
    }

    /// Fail unless the private key actually belongs to the public key
    pub fn check_consistency(&self, factory: &dyn CryptoFactory) -> KeyStoreResult<()> {
        let derived = factory.public_key_from_private(&self.spec, self.private_key.as_bytes())?;
        if derived != self.public_key {
            return Err(KeyStoreError::crypto(
                "private key does not match public key",
                error_codes::INVALID_KEY_MATERIAL,
            ));
        }
        Ok(())
    }

    pub fn sign(&self, factory: &dyn CryptoFactory, message: &[u8]) -> KeyStoreResult<Vec<u8>> {
        factory.sign(&self.spec, self.private_key.as_bytes(), message)
    }

    /// Key agreement with a peer key of the same spec
    pub fn agree(&self, factory: &dyn CryptoFactory, peer: &PublicKey) -> KeyStoreResult<SecureBytes> {
        if peer.spec() != self.spec {
            return Err(KeyStoreError::crypto(
                &format!("cannot agree {} with a {} peer key", self.spec, peer.spec()),
                error_codes::INVALID_KEY_MATERIAL,
            ));
        }
        factory.agree(&self.spec, self.private_key.as_bytes(), peer.as_bytes())
    }
}

impl From<GeneratedKeyPair> for KeyPair {
    fn from(generated: GeneratedKeyPair) -> Self {
        Self::new(generated.spec, generated.public_key, generated.private_key)
    }
}

/// A key pair together with its certificate chain `[leaf, ..., root]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPairEntry {
    pub key_pair: KeyPair,
    pub chain: CertificateChain,
}

impl KeyPairEntry {
    pub fn new(key_pair: KeyPair, chain: CertificateChain) -> Self {
        Self { key_pair, chain }
    }

    pub fn certificate(&self) -> &Certificate {
        self.chain.leaf()
    }
}

/// A single symmetric key of a declared spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymmetricKey {
    spec: KeySpec,
    material: SecureBytes,
}

impl SymmetricKey {
    pub fn new(spec: KeySpec, material: SecureBytes) -> KeyStoreResult<Self> {
        if material.len() != spec.key_length() {
            return Err(KeyStoreError::crypto(
                &format!("{} needs {} key bytes, got {}", spec, spec.key_length(), material.len()),
                error_codes::INVALID_KEY_MATERIAL,
            ));
        }
        Ok(Self { spec, material })
    }

    pub fn spec(&self) -> KeySpec {
        self.spec
    }

    pub fn material(&self) -> &SecureBytes {
        &self.material
    }
}

/// A symmetric key bundle: one key per step of its spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySet {
    spec: KeySetSpec,
    keys: Vec<SecureBytes>,
}

impl KeySet {
    pub fn new(spec: KeySetSpec, keys: Vec<SecureBytes>) -> KeyStoreResult<Self> {
        let expected = spec.key_lengths();
        let actual: Vec<usize> = keys.iter().map(SecureBytes::len).collect();
        if expected != actual {
            return Err(KeyStoreError::crypto(
                &format!("{} needs key lengths {:?}, got {:?}", spec, expected, actual),
                error_codes::INVALID_KEY_MATERIAL,
            ));
        }
        Ok(Self { spec, keys })
    }

    pub fn spec(&self) -> &KeySetSpec {
        &self.spec
    }

    pub fn keys(&self) -> &[SecureBytes] {
        &self.keys
    }

    /// Apply the bundle's steps in order: encryption steps encrypt the
    /// running buffer, MAC steps append a tag over it.
    pub fn seal(&self, factory: &dyn CryptoFactory, plaintext: &[u8], associated_data: &[u8]) -> KeyStoreResult<Vec<u8>> {
        let mut data = plaintext.to_vec();
        for (step, key) in self.spec.steps.iter().zip(&self.keys) {
            match step {
                KeySetStep::Encryption(spec) => {
                    data = factory.encrypt(spec, key.as_bytes(), &data, associated_data)?;
                }
                KeySetStep::Mac(spec) => {
                    let tag = factory.mac(spec, key.as_bytes(), &data)?;
                    data.extend_from_slice(&tag);
                }
            }
        }
        Ok(data)
    }

    /// Undo [`KeySet::seal`], last step first. Any tag or authentication
    /// failure is a `Security` error.
    pub fn open(&self, factory: &dyn CryptoFactory, sealed: &[u8], associated_data: &[u8]) -> KeyStoreResult<SecureBytes> {
        let mut data = SecureBytes::new(sealed);
        for (step, key) in self.spec.steps.iter().zip(&self.keys).rev() {
            match step {
                KeySetStep::Encryption(spec) => {
                    data = factory.decrypt(spec, key.as_bytes(), data.as_bytes(), associated_data)?;
                }
                KeySetStep::Mac(spec) => {
                    let tag_length = spec.tag_length();
                    if data.len() < tag_length {
                        return Err(KeyStoreError::data(
                            "sealed data shorter than its MAC tag",
                            error_codes::MALFORMED_CONTAINER,
                        ));
                    }
                    let split = data.len() - tag_length;
                    let (body, tag) = data.as_bytes().split_at(split);
                    if !factory.verify_mac(spec, key.as_bytes(), body, tag)? {
                        return Err(KeyStoreError::security(
                            "key-set MAC verification failed",
                            error_codes::MAC_MISMATCH,
                        ));
                    }
                    data = SecureBytes::new(body);
                }
            }
        }
        Ok(data)
    }
}

/// One stored item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Certificate(Certificate),
    KeyPair(KeyPairEntry),
    Key(SymmetricKey),
    KeySet(KeySet),
}

impl Entry {
    pub fn kind(&self) -> EntryKind {
        match self {
            Entry::Certificate(_) => EntryKind::Certificate,
            Entry::KeyPair(_) => EntryKind::KeyPair,
            Entry::Key(_) => EntryKind::Key,
            Entry::KeySet(_) => EntryKind::KeySet,
        }
    }

    /// The certificate of a certificate entry, or the leaf of a key-pair entry
    pub fn certificate(&self) -> Option<&Certificate> {
        match self {
            Entry::Certificate(cert) => Some(cert),
            Entry::KeyPair(entry) => Some(entry.certificate()),
            _ => None,
        }
    }
}

impl From<Certificate> for Entry {
    fn from(cert: Certificate) -> Self {
        Entry::Certificate(cert)
    }
}

impl From<KeyPairEntry> for Entry {
    fn from(entry: KeyPairEntry) -> Self {
        Entry::KeyPair(entry)
    }
}

impl From<SymmetricKey> for Entry {
    fn from(key: SymmetricKey) -> Self {
        Entry::Key(key)
    }
}

impl From<KeySet> for Entry {
    fn from(set: KeySet) -> Self {
        Entry::KeySet(set)
    }
}
