use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::codec::{self, MAX_ALIAS_LENGTH, MAX_CONTAINER_SIZE};
use super::entry::{Entry, EntryKind, KeyPair, KeyPairEntry, KeySet, SymmetricKey};
use crate::certificate::{Certificate, CertificateChain};
use crate::config::{ContainerFormat, KeyStoreConfig};
use crate::container::{PasswordContainer, SecureContainer};
use crate::error::{error_codes, ErrorContext, KeyStoreError, KeyStoreResult};
use crate::factory::{CryptoFactory, DefaultFactory};
use crate::secure_memory::{Password, SecureBytes};
use crate::spec::{KeyPairSpec, KeySetSpec, KeySpec};
use crate::utils;

/// Serialized form of an entry: public parts in the clear, secrets sealed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum StoredRecord {
    Certificate(Certificate),
    KeyPair {
        spec: KeyPairSpec,
        public_key: Vec<u8>,
        chain: CertificateChain,
        sealed_private_key: Vec<u8>,
    },
    Key {
        spec: KeySpec,
        sealed_material: Vec<u8>,
    },
    KeySet {
        spec: KeySetSpec,
        sealed_keys: Vec<u8>,
    },
}

impl StoredRecord {
    pub(crate) fn kind(&self) -> EntryKind {
        match self {
            StoredRecord::Certificate(_) => EntryKind::Certificate,
            StoredRecord::KeyPair { .. } => EntryKind::KeyPair,
            StoredRecord::Key { .. } => EntryKind::Key,
            StoredRecord::KeySet { .. } => EntryKind::KeySet,
        }
    }

    fn certificate(&self) -> Option<&Certificate> {
        match self {
            StoredRecord::Certificate(cert) => Some(cert),
            StoredRecord::KeyPair { chain, .. } => Some(chain.leaf()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct StoredEntry {
    pub(crate) created: DateTime<Utc>,
    pub(crate) record: StoredRecord,
}

/// The alias → entry map.
///
/// Secrets are sealed by the [`SecureContainer`] under their entry password
/// the moment they are stored, so a `KeyStore` never holds plaintext private
/// or symmetric keys at rest, in memory or on disk. Aliases are kept sorted,
/// which makes listing and reverse lookup deterministic.
///
/// A store has a single logical owner; readers may share it, writers need
/// `&mut`.
pub struct KeyStore {
    factory: Arc<dyn CryptoFactory>,
    container: Arc<dyn SecureContainer>,
    config: KeyStoreConfig,
    entries: BTreeMap<String, StoredEntry>,
}

impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStore")
            .field("factory", &self.factory.name())
            .field("container", &self.container)
            .field("aliases", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new(KeyStoreConfig::default())
    }
}

impl KeyStore {
    /// An empty store using the stock factory and password container
    pub fn new(config: KeyStoreConfig) -> Self {
        let factory: Arc<dyn CryptoFactory> = if config.restricted_factory {
            Arc::new(DefaultFactory::restricted())
        } else {
            Arc::new(DefaultFactory::new())
        };
        let container: Arc<dyn SecureContainer> = Arc::new(PasswordContainer::new(config.kdf));
        Self::with_collaborators(factory, container, config)
    }

    /// An empty store using caller-supplied collaborators
    pub fn with_collaborators(
        factory: Arc<dyn CryptoFactory>,
        container: Arc<dyn SecureContainer>,
        config: KeyStoreConfig,
    ) -> Self {
        Self {
            factory,
            container,
            config,
            entries: BTreeMap::new(),
        }
    }

    /// Open a persisted store
    pub fn open(path: &Path, password: &Password, config: KeyStoreConfig) -> KeyStoreResult<Self> {
        let mut store = Self::new(config);
        store.load_from_file(path, password)?;
        Ok(store)
    }

    pub fn factory(&self) -> &dyn CryptoFactory {
        self.factory.as_ref()
    }

    pub fn container(&self) -> &dyn SecureContainer {
        self.container.as_ref()
    }

    pub fn config(&self) -> &KeyStoreConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Entry access
    // ------------------------------------------------------------------

    /// Insert or replace the entry under `alias`.
    ///
    /// Entries holding secrets need a password, which seals the secret.
    /// Key-pair entries must carry a valid chain whose leaf certifies the
    /// pair's public key. Replacing an entry of a different kind is allowed
    /// but logged, since callers holding the old alias may expect the old kind.
    pub fn set(&mut self, alias: &str, entry: Entry, password: Option<&Password>) -> KeyStoreResult<()> {
        self.insert(alias, entry, password, utils::now_millis())
    }

    pub(crate) fn insert(
        &mut self,
        alias: &str,
        entry: Entry,
        password: Option<&Password>,
        created: DateTime<Utc>,
    ) -> KeyStoreResult<()> {
        if alias.is_empty() || alias.len() > MAX_ALIAS_LENGTH {
            return Err(KeyStoreError::data(
                &format!("alias length must be within 1..={}", MAX_ALIAS_LENGTH),
                error_codes::MALFORMED_CONTAINER,
            )
            .with_context(ErrorContext::Alias(alias.to_string())));
        }
        if let Entry::KeyPair(key_pair_entry) = &entry {
            self.check_key_pair_entry(alias, key_pair_entry)?;
        }
        let record = self.seal_entry(alias, &entry, password)?;

        if let Some(existing) = self.entries.get(alias) {
            if existing.record.kind() != record.kind() {
                log::warn!(
                    "alias '{}' changes from {} to {}; holders of the old entry kind will break",
                    alias,
                    existing.record.kind(),
                    record.kind()
                );
            }
        }
        log::debug!("stored {} entry '{}'", record.kind(), alias);
        self.entries
            .insert(alias.to_string(), StoredEntry { created, record });
        Ok(())
    }

    /// The entry under `alias`, or `None` when absent.
    ///
    /// Secret entries need their password; a wrong one is a `Security`
    /// error and leaves the store untouched.
    pub fn get(&self, alias: &str, password: Option<&Password>) -> KeyStoreResult<Option<Entry>> {
        match self.entries.get(alias) {
            Some(stored) => self.open_entry(alias, &stored.record, password).map(Some),
            None => Ok(None),
        }
    }

    /// Remove the entry under `alias`; returns whether one existed
    pub fn delete(&mut self, alias: &str) -> bool {
        let removed = self.entries.remove(alias).is_some();
        if removed {
            log::debug!("deleted entry '{}'", alias);
        }
        removed
    }

    /// Snapshot of all aliases in sorted order
    pub fn list_aliases(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_alias(&self, alias: &str) -> bool {
        self.entries.contains_key(alias)
    }

    pub fn entry_kind(&self, alias: &str) -> Option<EntryKind> {
        self.entries.get(alias).map(|stored| stored.record.kind())
    }

    pub fn creation_date(&self, alias: &str) -> Option<DateTime<Utc>> {
        self.entries.get(alias).map(|stored| stored.created)
    }

    /// True for certificate entries and key-pair entries
    pub fn is_certificate(&self, alias: &str) -> bool {
        matches!(
            self.entry_kind(alias),
            Some(EntryKind::Certificate) | Some(EntryKind::KeyPair)
        )
    }

    pub fn is_certificate_entry(&self, alias: &str) -> bool {
        self.entry_kind(alias) == Some(EntryKind::Certificate)
    }

    pub fn is_key_pair_entry(&self, alias: &str) -> bool {
        self.entry_kind(alias) == Some(EntryKind::KeyPair)
    }

    pub fn is_key_entry(&self, alias: &str) -> bool {
        self.entry_kind(alias) == Some(EntryKind::Key)
    }

    pub fn is_key_set_entry(&self, alias: &str) -> bool {
        self.entry_kind(alias) == Some(EntryKind::KeySet)
    }

    /// The certificate of a certificate entry, or the leaf of a key-pair entry
    pub fn get_certificate(&self, alias: &str) -> Option<Certificate> {
        self.entries
            .get(alias)
            .and_then(|stored| stored.record.certificate())
            .cloned()
    }

    /// The chain of a key-pair entry; a certificate entry yields a chain of one
    pub fn get_certificate_chain(&self, alias: &str) -> Option<CertificateChain> {
        match &self.entries.get(alias)?.record {
            StoredRecord::KeyPair { chain, .. } => Some(chain.clone()),
            StoredRecord::Certificate(cert) => Some(CertificateChain::from_root(cert.clone())),
            _ => None,
        }
    }

    /// Alias of the first entry (in alias order) whose certificate equals
    /// `certificate`; key-pair entries match on their leaf
    pub fn get_certificate_alias(&self, certificate: &Certificate) -> Option<String> {
        self.entries
            .iter()
            .find(|(_, stored)| stored.record.certificate() == Some(certificate))
            .map(|(alias, _)| alias.clone())
    }

    pub fn get_key_pair_entry(&self, alias: &str, password: &Password) -> KeyStoreResult<KeyPairEntry> {
        match self.typed_entry(alias, EntryKind::KeyPair, password)? {
            Entry::KeyPair(entry) => Ok(entry),
            other => Err(Self::wrong_kind(alias, other.kind(), EntryKind::KeyPair)),
        }
    }

    pub fn get_key_pair(&self, alias: &str, password: &Password) -> KeyStoreResult<KeyPair> {
        self.get_key_pair_entry(alias, password).map(|entry| entry.key_pair)
    }

    pub fn get_key(&self, alias: &str, password: &Password) -> KeyStoreResult<SymmetricKey> {
        match self.typed_entry(alias, EntryKind::Key, password)? {
            Entry::Key(key) => Ok(key),
            other => Err(Self::wrong_kind(alias, other.kind(), EntryKind::Key)),
        }
    }

    pub fn get_key_set(&self, alias: &str, password: &Password) -> KeyStoreResult<KeySet> {
        match self.typed_entry(alias, EntryKind::KeySet, password)? {
            Entry::KeySet(set) => Ok(set),
            other => Err(Self::wrong_kind(alias, other.kind(), EntryKind::KeySet)),
        }
    }

    /// Replace the chain of a key-pair entry. The new chain must validate
    /// and its leaf must certify the entry's public key. No password is
    /// needed since the sealed private key is untouched.
    pub fn update_certificate_chain(&mut self, alias: &str, new_chain: CertificateChain) -> KeyStoreResult<()> {
        let factory = Arc::clone(&self.factory);
        let stored = self
            .entries
            .get_mut(alias)
            .ok_or_else(|| KeyStoreError::not_found(alias))?;
        let kind = stored.record.kind();
        match &mut stored.record {
            StoredRecord::KeyPair {
                spec,
                public_key,
                chain,
                ..
            } => {
                Self::check_chain(alias, factory.as_ref(), *spec, public_key, &new_chain)?;
                log::info!(
                    "updated chain of '{}' to {} certificate(s), issuer {}",
                    alias,
                    new_chain.len(),
                    new_chain.leaf().issuer()
                );
                *chain = new_chain;
                Ok(())
            }
            _ => Err(Self::wrong_kind(alias, kind, EntryKind::KeyPair)),
        }
    }

    /// Re-seal the secret of `alias` under a new password. Either both the
    /// unseal and the re-seal succeed or the entry is unchanged.
    pub fn change_entry_password(&mut self, alias: &str, old: &Password, new: &Password) -> KeyStoreResult<()> {
        let stored = self
            .entries
            .get(alias)
            .ok_or_else(|| KeyStoreError::not_found(alias))?;
        let created = stored.created;
        let entry = self.open_entry(alias, &stored.record, Some(old))?;
        let record = self.seal_entry(alias, &entry, Some(new))?;
        self.entries
            .insert(alias.to_string(), StoredEntry { created, record });
        log::info!("changed password of {} entry '{}'", entry.kind(), alias);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Serialize the whole store under `password`
    pub fn store_to_writer<W: Write>(&self, out: &mut W, password: &Password) -> KeyStoreResult<()> {
        let bytes = codec::encode_container(&self.entries, password, &self.config.kdf)?;
        out.write_all(&bytes)
            .and_then(|_| out.flush())
            .map_err(|e| KeyStoreError::io("failed to write key-store", e, error_codes::WRITE_FAILED))?;
        log::info!("stored key-store with {} entries ({} bytes)", self.entries.len(), bytes.len());
        Ok(())
    }

    /// Write the store to `path`. The container is written to a sibling
    /// temporary file and renamed into place, so a failed save never
    /// truncates an existing container.
    pub fn store_to_file(&self, path: &Path, password: &Password) -> KeyStoreResult<()> {
        Self::check_file_format(path)?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| String::from("keystore"));
        let temp_path = path.with_file_name(format!(".{}.tmp", file_name));
        let path_error = |message: &str, e: std::io::Error| {
            KeyStoreError::io(message, e, error_codes::WRITE_FAILED)
                .with_context(ErrorContext::Path(path.to_path_buf()))
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| path_error("failed to create key-store directory", e))?;
        }

        let result = File::create(&temp_path)
            .map_err(|e| path_error("failed to create temporary key-store file", e))
            .and_then(|mut file| {
                self.store_to_writer(&mut file, password)?;
                file.sync_all()
                    .map_err(|e| path_error("failed to sync key-store file", e))
            })
            .and_then(|_| {
                fs::rename(&temp_path, path).map_err(|e| path_error("failed to move key-store into place", e))
            });
        if result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        result
    }

    /// Replace the contents of this store with the container read from
    /// `input`. On any failure the store is left exactly as it was.
    pub fn load_from_reader<R: Read>(&mut self, input: &mut R, password: &Password) -> KeyStoreResult<()> {
        let mut bytes = Vec::new();
        input
            .take(MAX_CONTAINER_SIZE as u64 + 1)
            .read_to_end(&mut bytes)
            .map_err(|e| KeyStoreError::io("failed to read key-store", e, error_codes::READ_FAILED))?;
        if bytes.len() > MAX_CONTAINER_SIZE {
            return Err(KeyStoreError::data(
                "key-store container exceeds the size limit",
                error_codes::MALFORMED_CONTAINER,
            ));
        }
        self.load_from_bytes(&bytes, password)
    }

    pub fn load_from_file(&mut self, path: &Path, password: &Password) -> KeyStoreResult<()> {
        Self::check_file_format(path)?;
        let mut file = File::open(path).map_err(|e| {
            KeyStoreError::io("failed to open key-store", e, error_codes::READ_FAILED)
                .with_context(ErrorContext::Path(path.to_path_buf()))
        })?;
        self.load_from_reader(&mut file, password).map_err(|e| {
            if e.context().is_none() {
                e.with_context(ErrorContext::Path(path.to_path_buf()))
            } else {
                e
            }
        })
    }

    /// Plain containers only; the locked (compressed) flavour is refused
    fn check_file_format(path: &Path) -> KeyStoreResult<()> {
        match ContainerFormat::from_path(path) {
            Some(ContainerFormat::Plain) => Ok(()),
            Some(ContainerFormat::Locked) => Err(KeyStoreError::data(
                "locked compressed key-store containers are not supported",
                error_codes::UNSUPPORTED_FORMAT_VERSION,
            )
            .with_context(ErrorContext::Path(path.to_path_buf()))),
            None => {
                log::debug!(
                    "treating {} as a plain .{} container",
                    path.display(),
                    ContainerFormat::Plain.extension()
                );
                Ok(())
            }
        }
    }

    fn load_from_bytes(&mut self, bytes: &[u8], password: &Password) -> KeyStoreResult<()> {
        let entries = codec::decode_container(bytes, password)?;
        for (alias, stored) in &entries {
            if let StoredRecord::KeyPair {
                spec,
                public_key,
                chain,
                ..
            } = &stored.record
            {
                Self::check_chain(alias, self.factory.as_ref(), *spec, public_key, chain).map_err(|e| {
                    log::warn!("rejecting key-store: chain of '{}' does not validate: {}", alias, e);
                    e
                })?;
            }
        }
        log::info!("loaded key-store with {} entries", entries.len());
        self.entries = entries;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sealing
    // ------------------------------------------------------------------

    fn seal_entry(&self, alias: &str, entry: &Entry, password: Option<&Password>) -> KeyStoreResult<StoredRecord> {
        let kind = entry.kind();
        let password = match (entry, password) {
            (Entry::Certificate(cert), _) => return Ok(StoredRecord::Certificate(cert.clone())),
            (_, Some(password)) => password,
            (_, None) => return Err(Self::password_required(alias, kind)),
        };
        let label = kind.seal_label();

        Ok(match entry {
            Entry::Certificate(cert) => StoredRecord::Certificate(cert.clone()),
            Entry::KeyPair(kp) => StoredRecord::KeyPair {
                spec: kp.key_pair.spec(),
                public_key: kp.key_pair.public_key_bytes().to_vec(),
                chain: kp.chain.clone(),
                sealed_private_key: self
                    .container
                    .seal(password, kp.key_pair.private_key().as_bytes(), label)?,
            },
            Entry::Key(key) => StoredRecord::Key {
                spec: key.spec(),
                sealed_material: self.container.seal(password, key.material().as_bytes(), label)?,
            },
            Entry::KeySet(set) => {
                let keys: Zeroizing<Vec<Vec<u8>>> =
                    Zeroizing::new(set.keys().iter().map(|k| k.as_bytes().to_vec()).collect());
                let encoded = Zeroizing::new(utils::encode(&*keys)?);
                StoredRecord::KeySet {
                    spec: set.spec().clone(),
                    sealed_keys: self.container.seal(password, &encoded, label)?,
                }
            }
        })
    }

    fn open_entry(&self, alias: &str, record: &StoredRecord, password: Option<&Password>) -> KeyStoreResult<Entry> {
        let kind = record.kind();
        let password = match (record, password) {
            (StoredRecord::Certificate(cert), _) => return Ok(Entry::Certificate(cert.clone())),
            (_, Some(password)) => password,
            (_, None) => return Err(Self::password_required(alias, kind)),
        };
        let context = || ErrorContext::Entry {
            alias: alias.to_string(),
            kind,
        };
        let unseal = |sealed: &[u8]| {
            self.container
                .open(password, sealed, kind.seal_label())
                .map_err(|e| {
                    log::warn!("failed to unseal {} entry '{}'", kind, alias);
                    e.with_context(context())
                })
        };

        match record {
            StoredRecord::Certificate(cert) => Ok(Entry::Certificate(cert.clone())),
            StoredRecord::KeyPair {
                spec,
                public_key,
                chain,
                sealed_private_key,
            } => {
                let private_key = unseal(sealed_private_key)?;
                Ok(Entry::KeyPair(KeyPairEntry::new(
                    KeyPair::new(*spec, public_key.clone(), private_key),
                    chain.clone(),
                )))
            }
            StoredRecord::Key { spec, sealed_material } => {
                let material = unseal(sealed_material)?;
                SymmetricKey::new(*spec, material)
                    .map(Entry::Key)
                    .map_err(|e| e.with_context(context()))
            }
            StoredRecord::KeySet { spec, sealed_keys } => {
                let encoded = unseal(sealed_keys)?;
                let keys: Zeroizing<Vec<Vec<u8>>> =
                    Zeroizing::new(utils::decode(encoded.as_bytes(), encoded.len() as u64)?);
                KeySet::new(spec.clone(), keys.iter().map(|k| SecureBytes::new(k)).collect())
                    .map(Entry::KeySet)
                    .map_err(|e| e.with_context(context()))
            }
        }
    }

    fn typed_entry(&self, alias: &str, expected: EntryKind, password: &Password) -> KeyStoreResult<Entry> {
        let stored = self
            .entries
            .get(alias)
            .ok_or_else(|| KeyStoreError::not_found(alias))?;
        let kind = stored.record.kind();
        if kind != expected {
            return Err(Self::wrong_kind(alias, kind, expected));
        }
        self.open_entry(alias, &stored.record, Some(password))
    }

    // ------------------------------------------------------------------
    // Checks
    // ------------------------------------------------------------------

    fn check_key_pair_entry(&self, alias: &str, entry: &KeyPairEntry) -> KeyStoreResult<()> {
        entry
            .key_pair
            .check_consistency(self.factory.as_ref())
            .map_err(|e| {
                e.with_context(ErrorContext::Entry {
                    alias: alias.to_string(),
                    kind: EntryKind::KeyPair,
                })
            })?;
        Self::check_chain(
            alias,
            self.factory.as_ref(),
            entry.key_pair.spec(),
            entry.key_pair.public_key_bytes(),
            &entry.chain,
        )
    }

    fn check_chain(
        alias: &str,
        factory: &dyn CryptoFactory,
        spec: KeyPairSpec,
        public_key: &[u8],
        chain: &CertificateChain,
    ) -> KeyStoreResult<()> {
        let leaf_key = chain.leaf().public_key();
        if leaf_key.spec() != spec || leaf_key.as_bytes() != public_key {
            return Err(KeyStoreError::crypto(
                "leaf certificate does not certify the entry's public key",
                error_codes::INVALID_KEY_MATERIAL,
            )
            .with_context(ErrorContext::Alias(alias.to_string())));
        }
        chain.validate(factory)
    }

    fn wrong_kind(alias: &str, actual: EntryKind, expected: EntryKind) -> KeyStoreError {
        KeyStoreError::data(
            &format!("expected a {} entry", expected),
            error_codes::WRONG_ENTRY_KIND,
        )
        .with_context(ErrorContext::Entry {
            alias: alias.to_string(),
            kind: actual,
        })
    }

    fn password_required(alias: &str, kind: EntryKind) -> KeyStoreError {
        KeyStoreError::security("entry holds secrets and needs a password", error_codes::PASSWORD_REQUIRED)
            .with_context(ErrorContext::Entry {
                alias: alias.to_string(),
                kind,
            })
    }
}
