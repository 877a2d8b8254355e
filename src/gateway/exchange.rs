//! Export and import of single entries and certificate batches
//!
//! ```text
//! entry:  magic "QKSX" | version u8 | kind u8 | locked u8 | payload frame
//! batch:  magic "QKSC" | count u32 | certificate frame*
//! ```
//!
//! A locked payload is sealed by the store's secure container under a
//! password obtained from the lock resolver. Entries holding secrets are
//! only ever exported locked.

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use super::gateway::{KeyStoreGateway, LockPrompt};
use crate::certificate::{Certificate, CertificateChain, MAX_CERTIFICATE_SIZE};
use crate::error::{error_codes, ErrorContext, KeyStoreError, KeyStoreResult};
use crate::keystore::{Entry, EntryKind, KeyPair, KeyPairEntry, KeySet, SymmetricKey, MAX_ALIAS_LENGTH};
use crate::secure_memory::{Password, SecureBytes};
use crate::spec::{KeyPairSpec, KeySetSpec, KeySpec};
use crate::utils;

pub const EXPORT_MAGIC: &[u8; 4] = b"QKSX";
pub const EXPORT_VERSION: u8 = 1;
pub const CERTIFICATE_BATCH_MAGIC: &[u8; 4] = b"QKSC";

/// Largest exported payload accepted
pub const MAX_EXPORT_SIZE: usize = 16 * 1024 * 1024;

/// Largest certificate batch accepted
pub const MAX_BATCH_SIZE: usize = 4096;

const LOCK_LABEL: &[u8] = b"qasa-keystore/export";

// "-" and the decimal digits of a u32 collision suffix
const ALIAS_SUFFIX_ROOM: usize = 11;

#[derive(Serialize, Deserialize)]
enum ExportedContent {
    Certificate(Certificate),
    KeyPair {
        spec: KeyPairSpec,
        public_key: Vec<u8>,
        private_key: Vec<u8>,
        chain: CertificateChain,
    },
    Key {
        spec: KeySpec,
        material: Vec<u8>,
    },
    KeySet {
        spec: KeySetSpec,
        keys: Vec<Vec<u8>>,
    },
}

#[derive(Serialize, Deserialize)]
struct ExportedEntry {
    alias: String,
    created_millis: i64,
    content: ExportedContent,
}

impl Drop for ExportedEntry {
    fn drop(&mut self) {
        match &mut self.content {
            ExportedContent::KeyPair { private_key, .. } => private_key.zeroize(),
            ExportedContent::Key { material, .. } => material.zeroize(),
            ExportedContent::KeySet { keys, .. } => keys.zeroize(),
            ExportedContent::Certificate(_) => {}
        }
    }
}

impl ExportedContent {
    fn from_entry(entry: &Entry) -> Self {
        match entry {
            Entry::Certificate(cert) => ExportedContent::Certificate(cert.clone()),
            Entry::KeyPair(kp) => ExportedContent::KeyPair {
                spec: kp.key_pair.spec(),
                public_key: kp.key_pair.public_key_bytes().to_vec(),
                private_key: kp.key_pair.private_key().as_bytes().to_vec(),
                chain: kp.chain.clone(),
            },
            Entry::Key(key) => ExportedContent::Key {
                spec: key.spec(),
                material: key.material().as_bytes().to_vec(),
            },
            Entry::KeySet(set) => ExportedContent::KeySet {
                spec: set.spec().clone(),
                keys: set.keys().iter().map(|k| k.as_bytes().to_vec()).collect(),
            },
        }
    }

    fn kind(&self) -> EntryKind {
        match self {
            ExportedContent::Certificate(_) => EntryKind::Certificate,
            ExportedContent::KeyPair { .. } => EntryKind::KeyPair,
            ExportedContent::Key { .. } => EntryKind::Key,
            ExportedContent::KeySet { .. } => EntryKind::KeySet,
        }
    }

    fn to_entry(&self) -> KeyStoreResult<Entry> {
        Ok(match self {
            ExportedContent::Certificate(cert) => Entry::Certificate(cert.clone()),
            ExportedContent::KeyPair {
                spec,
                public_key,
                private_key,
                chain,
            } => Entry::KeyPair(KeyPairEntry::new(
                KeyPair::new(*spec, public_key.clone(), SecureBytes::new(private_key)),
                chain.clone(),
            )),
            ExportedContent::Key { spec, material } => Entry::Key(SymmetricKey::new(*spec, SecureBytes::new(material))?),
            ExportedContent::KeySet { spec, keys } => Entry::KeySet(KeySet::new(
                spec.clone(),
                keys.iter().map(|k| SecureBytes::new(k)).collect(),
            )?),
        })
    }
}

fn malformed(reason: &str) -> KeyStoreError {
    KeyStoreError::data(
        &format!("malformed export: {}", reason),
        error_codes::MALFORMED_CONTAINER,
    )
}

fn read_exact<R: Read>(input: &mut R, buf: &mut [u8]) -> KeyStoreResult<()> {
    input.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            malformed("truncated")
        } else {
            KeyStoreError::io("failed to read export", e, error_codes::READ_FAILED)
        }
    })
}

fn read_frame<R: Read>(input: &mut R, max_len: usize) -> KeyStoreResult<Vec<u8>> {
    let mut length = [0u8; 4];
    read_exact(input, &mut length)?;
    let length = u32::from_le_bytes(length) as usize;
    if length > max_len {
        return Err(malformed(&format!("frame length {} exceeds limit {}", length, max_len)));
    }
    let mut data = vec![0u8; length];
    read_exact(input, &mut data)?;
    Ok(data)
}

fn write_all<W: Write>(out: &mut W, data: &[u8]) -> KeyStoreResult<()> {
    out.write_all(data)
        .map_err(|e| KeyStoreError::io("failed to write export", e, error_codes::WRITE_FAILED))
}

fn unlock_refused(kind: EntryKind) -> KeyStoreError {
    KeyStoreError::security(
        &format!("no lock password supplied for {} export", kind),
        error_codes::UNLOCK_REFUSED,
    )
}

impl KeyStoreGateway<'_> {
    fn lock_password(&self, prompt: LockPrompt<'_>) -> Option<Password> {
        self.lock_resolver.as_ref().and_then(|resolve| resolve(prompt))
    }

    /// Write the entry under `alias` to `out`.
    ///
    /// Secret entries are unsealed with the password resolver and must be
    /// locked: a refused lock prompt is a `Security` error. Certificate
    /// entries are locked only if the lock resolver supplies a password.
    pub fn export_entry<W: Write>(&mut self, alias: &str, out: &mut W) -> KeyStoreResult<()> {
        let kind = self
            .store
            .entry_kind(alias)
            .ok_or_else(|| KeyStoreError::not_found(alias))?;
        let entry = if kind.has_secret() {
            let password = self.resolve_password(alias)?;
            self.store.get(alias, Some(&password))?
        } else {
            self.store.get(alias, None)?
        }
        .ok_or_else(|| KeyStoreError::not_found(alias))?;

        let created_millis = self
            .store
            .creation_date(alias)
            .map(|created| created.timestamp_millis())
            .unwrap_or_default();
        let exported = ExportedEntry {
            alias: alias.to_string(),
            created_millis,
            content: ExportedContent::from_entry(&entry),
        };
        let encoded = Zeroizing::new(utils::encode(&exported)?);

        let lock = self.lock_password(LockPrompt::Lock { alias, kind });
        let (locked, payload) = match lock {
            Some(password) => (1u8, self.store.container().seal(&password, &encoded, LOCK_LABEL)?),
            None if kind.has_secret() => return Err(unlock_refused(kind)),
            None => (0u8, encoded.to_vec()),
        };

        let mut header = Vec::with_capacity(7);
        header.extend_from_slice(EXPORT_MAGIC);
        header.extend_from_slice(&[EXPORT_VERSION, kind.tag(), locked]);
        write_all(out, &header)?;
        utils::write_frame(out, &payload)?;
        log::info!(
            "exported {} entry '{}'{}",
            kind,
            alias,
            if locked == 1 { " (locked)" } else { "" }
        );
        Ok(())
    }

    /// Read one exported entry and store it under its original alias,
    /// keeping its creation date. Returns the alias.
    ///
    /// A locked export asks the lock resolver for its password; secret
    /// entries are re-sealed under the password resolved for their alias.
    pub fn import_entry<R: Read>(&mut self, input: &mut R) -> KeyStoreResult<String> {
        let mut header = [0u8; 7];
        read_exact(input, &mut header)?;
        if &header[..4] != EXPORT_MAGIC {
            return Err(malformed("bad magic"));
        }
        if header[4] != EXPORT_VERSION {
            return Err(KeyStoreError::data(
                &format!("unsupported export version {}", header[4]),
                error_codes::UNSUPPORTED_FORMAT_VERSION,
            ));
        }
        let kind = EntryKind::from_tag(header[5])?;
        let locked = match header[6] {
            0 => false,
            1 => true,
            other => return Err(malformed(&format!("bad lock flag {}", other))),
        };
        let payload = read_frame(input, MAX_EXPORT_SIZE)?;

        let plaintext = if locked {
            let password = self
                .lock_password(LockPrompt::Unlock { kind })
                .ok_or_else(|| unlock_refused(kind))?;
            self.store.container().open(&password, &payload, LOCK_LABEL)?
        } else if kind.has_secret() {
            return Err(malformed(&format!("{} export is not locked", kind)));
        } else {
            SecureBytes::from(payload)
        };

        let exported: ExportedEntry = utils::decode(plaintext.as_bytes(), MAX_EXPORT_SIZE as u64)?;
        if exported.content.kind() != kind {
            return Err(malformed(&format!(
                "header says {}, payload holds {}",
                kind,
                exported.content.kind()
            )));
        }
        let created = utils::from_millis(exported.created_millis)
            .ok_or_else(|| malformed("creation date out of range"))?;
        let entry = exported.content.to_entry()?;
        let alias = exported.alias.clone();

        let password = if kind.has_secret() {
            Some(self.resolve_password(&alias)?)
        } else {
            None
        };
        self.store.insert(&alias, entry, password.as_ref(), created)?;
        log::info!("imported {} entry '{}'", kind, alias);
        Ok(alias)
    }

    /// Write the certificates of `aliases` (certificate entries or key-pair
    /// leaves) as one batch. Returns the number written.
    pub fn export_certificates<W: Write>(&mut self, aliases: &[&str], out: &mut W) -> KeyStoreResult<usize> {
        let certificates = aliases
            .iter()
            .map(|alias| {
                self.store
                    .get_certificate(alias)
                    .ok_or_else(|| KeyStoreError::not_found(alias))
            })
            .collect::<KeyStoreResult<Vec<_>>>()?;
        if certificates.len() > MAX_BATCH_SIZE {
            return Err(malformed("too many certificates for one batch"));
        }

        let mut batch = Vec::new();
        batch.extend_from_slice(CERTIFICATE_BATCH_MAGIC);
        batch.extend_from_slice(&(certificates.len() as u32).to_le_bytes());
        for cert in &certificates {
            utils::write_frame(&mut batch, &cert.to_bytes()?)?;
        }
        write_all(out, &batch)?;
        log::info!("exported {} certificate(s)", certificates.len());
        Ok(certificates.len())
    }

    /// Read a certificate batch and store each certificate.
    ///
    /// A certificate already known to the store keeps its existing alias and
    /// is not stored again. Others are stored under their subject's common
    /// name, suffixed `-2`, `-3`, ... when that alias is taken. The whole
    /// batch is parsed and every alias resolved before anything is stored;
    /// if storing fails part way, the certificates stored so far are removed.
    /// Returns the alias of every certificate in batch order.
    pub fn import_certificates<R: Read>(&mut self, input: &mut R) -> KeyStoreResult<Vec<String>> {
        let mut magic = [0u8; 4];
        read_exact(input, &mut magic)?;
        if &magic != CERTIFICATE_BATCH_MAGIC {
            return Err(malformed("bad certificate batch magic"));
        }
        let mut count = [0u8; 4];
        read_exact(input, &mut count)?;
        let count = u32::from_le_bytes(count) as usize;
        if count > MAX_BATCH_SIZE {
            return Err(malformed(&format!("batch of {} certificates exceeds the limit", count)));
        }
        let certificates = (0..count)
            .map(|_| Certificate::from_bytes(&read_frame(input, MAX_CERTIFICATE_SIZE as usize)?))
            .collect::<KeyStoreResult<Vec<_>>>()?;

        let mut aliases = Vec::with_capacity(certificates.len());
        let mut pending: Vec<(String, Certificate)> = Vec::new();
        for cert in certificates {
            if let Some(alias) = self.store.get_certificate_alias(&cert) {
                log::debug!("certificate {} already stored as '{}'", cert.subject(), alias);
                aliases.push(alias);
                continue;
            }
            if let Some((alias, _)) = pending.iter().find(|(_, queued)| queued == &cert) {
                aliases.push(alias.clone());
                continue;
            }
            let alias = self.free_alias(cert.subject().common_name(), &pending);
            aliases.push(alias.clone());
            pending.push((alias, cert));
        }

        let mut stored: Vec<String> = Vec::with_capacity(pending.len());
        for (alias, cert) in pending {
            if let Err(e) = self.store.set(&alias, Entry::Certificate(cert), None) {
                for added in &stored {
                    self.store.delete(added);
                }
                return Err(e.with_context(ErrorContext::Alias(alias)));
            }
            stored.push(alias);
        }
        log::info!(
            "imported certificate batch of {} ({} new)",
            aliases.len(),
            stored.len()
        );
        Ok(aliases)
    }

    /// An alias free in the store and among the aliases claimed so far
    fn free_alias(&self, common_name: &str, claimed: &[(String, Certificate)]) -> String {
        let taken = |alias: &str| {
            self.store.contains_alias(alias) || claimed.iter().any(|(queued, _)| queued == alias)
        };
        let mut base = truncate_alias(common_name.trim(), MAX_ALIAS_LENGTH - ALIAS_SUFFIX_ROOM).to_string();
        if base.is_empty() {
            base = String::from("certificate");
        }
        if !taken(&base) {
            return base;
        }
        let mut suffix = 2u32;
        loop {
            let candidate = format!("{}-{}", base, suffix);
            if !taken(&candidate) {
                return candidate;
            }
            suffix += 1;
        }
    }
}

/// Longest prefix of `name` within `max_bytes` that ends on a character boundary
fn truncate_alias(name: &str, max_bytes: usize) -> &str {
    if name.len() <= max_bytes {
        return name;
    }
    let mut end = max_bytes;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}
