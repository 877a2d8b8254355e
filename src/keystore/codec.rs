//! Binary container format of a persisted key-store
//!
//! ```text
//! magic "QKS\x01" | version u16 | argon2 m,t,p u32 | salt[16] | nonce[24]
//! | body length u32 | XChaCha20-Poly1305(body) | HMAC-SHA256 tag[32]
//! ```
//!
//! All integers are little-endian. The tag covers every preceding byte and is
//! checked before anything is decrypted. The decrypted body is a record count
//! followed by `tag u8 | alias frame | creation millis i64 | payload frame`
//! records.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use super::entry::EntryKind;
use super::store::{StoredEntry, StoredRecord};
use crate::container::{derive_key_from_password, KeyDerivationParams};
use crate::error::{error_codes, ErrorContext, ErrorKind, KeyStoreError, KeyStoreResult};
use crate::secure_memory::Password;
use crate::utils;

type HmacSha256 = Hmac<Sha256>;

pub const MAGIC: &[u8; 4] = b"QKS\x01";
pub const FORMAT_VERSION: u16 = 1;

/// Largest container accepted on load
pub const MAX_CONTAINER_SIZE: usize = 256 * 1024 * 1024;
pub const MAX_ALIAS_LENGTH: usize = 1024;
const MAX_RECORD_SIZE: usize = 16 * 1024 * 1024;

const SALT_LENGTH: usize = 16;
const NONCE_LENGTH: usize = 24;
const TAG_LENGTH: usize = 32;
const AEAD_TAG_LENGTH: usize = 16;
const HEADER_LENGTH: usize = 4 + 2 + 4 * 3 + SALT_LENGTH + NONCE_LENGTH + 4;
// tag, alias length, creation date, payload length
const MIN_RECORD_LENGTH: usize = 1 + 4 + 8 + 4;

struct ContainerKeys {
    encryption: Zeroizing<[u8; 32]>,
    mac: Zeroizing<[u8; 32]>,
}

fn malformed(reason: &str) -> KeyStoreError {
    KeyStoreError::data(
        &format!("malformed key-store container: {}", reason),
        error_codes::MALFORMED_CONTAINER,
    )
}

/// A short read inside an in-memory body means truncation, not an I/O failure
fn truncated(err: KeyStoreError) -> KeyStoreError {
    if err.kind() == ErrorKind::Io {
        malformed("truncated record")
    } else {
        err
    }
}

fn derive_keys(password: &Password, salt: &[u8], params: &KeyDerivationParams) -> KeyStoreResult<ContainerKeys> {
    let params = KeyDerivationParams {
        key_length: 32,
        ..*params
    };
    let master = derive_key_from_password(password, Some(salt), &params)?;
    let hkdf = Hkdf::<Sha256>::new(Some(salt), &master.key);

    let mut keys = ContainerKeys {
        encryption: Zeroizing::new([0u8; 32]),
        mac: Zeroizing::new([0u8; 32]),
    };
    hkdf.expand(b"qasa-keystore/container/encryption", &mut keys.encryption[..])
        .and_then(|_| hkdf.expand(b"qasa-keystore/container/mac", &mut keys.mac[..]))
        .map_err(|_| KeyStoreError::crypto("HKDF expansion failed", error_codes::KEY_DERIVATION_FAILED))?;
    Ok(keys)
}

fn container_mac(key: &[u8], data: &[u8]) -> KeyStoreResult<HmacSha256> {
    let mut mac = <HmacSha256 as KeyInit>::new_from_slice(key)
        .map_err(|_| KeyStoreError::crypto("invalid container MAC key", error_codes::INVALID_KEY_MATERIAL))?;
    mac.update(data);
    Ok(mac)
}

fn encode_records(entries: &BTreeMap<String, StoredEntry>) -> KeyStoreResult<Zeroizing<Vec<u8>>> {
    let mut body = Zeroizing::new(Vec::new());
    let count = u32::try_from(entries.len()).map_err(|_| malformed("too many entries"))?;
    body.extend_from_slice(&count.to_le_bytes());
    for (alias, stored) in entries {
        let payload = utils::encode(&stored.record)?;
        body.push(stored.record.kind().tag());
        utils::write_frame(&mut *body, alias.as_bytes())?;
        body.extend_from_slice(&stored.created.timestamp_millis().to_le_bytes());
        utils::write_frame(&mut *body, &payload)?;
        log::debug!("encoded {} record '{}' ({} bytes)", stored.record.kind(), alias, payload.len());
    }
    Ok(body)
}

fn decode_record(cursor: &mut Cursor<&[u8]>) -> KeyStoreResult<(String, StoredEntry)> {
    let mut tag = [0u8; 1];
    cursor.read_exact(&mut tag)?;
    let kind = EntryKind::from_tag(tag[0])?;

    let alias = String::from_utf8(utils::read_frame(cursor, MAX_ALIAS_LENGTH)?)
        .map_err(|_| malformed("alias is not UTF-8"))?;

    let mut millis = [0u8; 8];
    cursor.read_exact(&mut millis)?;
    let created = utils::from_millis(i64::from_le_bytes(millis))
        .ok_or_else(|| malformed("creation date out of range"))?;

    let payload = utils::read_frame(cursor, MAX_RECORD_SIZE)?;
    let record: StoredRecord = utils::decode(&payload, MAX_RECORD_SIZE as u64)?;
    if record.kind() != kind {
        return Err(malformed(&format!("record tagged {} holds a {}", kind, record.kind()))
            .with_context(ErrorContext::Alias(alias)));
    }
    Ok((alias, StoredEntry { created, record }))
}

fn decode_records(body: &[u8]) -> KeyStoreResult<BTreeMap<String, StoredEntry>> {
    let mut cursor = Cursor::new(body);
    let count = utils::read_u32(&mut cursor).map_err(truncated)? as usize;
    if count > body.len() / MIN_RECORD_LENGTH {
        return Err(malformed(&format!("record count {} exceeds body size", count)));
    }

    let mut entries = BTreeMap::new();
    for _ in 0..count {
        let (alias, stored) = decode_record(&mut cursor).map_err(truncated)?;
        if entries.contains_key(&alias) {
            return Err(KeyStoreError::data("duplicate alias in container", error_codes::DUPLICATE_ALIAS)
                .with_context(ErrorContext::Alias(alias)));
        }
        entries.insert(alias, stored);
    }
    if cursor.position() as usize != body.len() {
        return Err(malformed("trailing bytes after the last record"));
    }
    Ok(entries)
}

/// Serialize and seal `entries` under `password`
pub(crate) fn encode_container(
    entries: &BTreeMap<String, StoredEntry>,
    password: &Password,
    params: &KeyDerivationParams,
) -> KeyStoreResult<Vec<u8>> {
    params.validate()?;
    let body = encode_records(entries)?;
    let salt = utils::random_array::<SALT_LENGTH>();
    let nonce = utils::random_array::<NONCE_LENGTH>();
    let keys = derive_keys(password, &salt, params)?;

    let sealed_length = u32::try_from(body.len() + AEAD_TAG_LENGTH)
        .map_err(|_| malformed("body exceeds 4 GiB"))?;
    let mut out = Vec::with_capacity(HEADER_LENGTH + sealed_length as usize + TAG_LENGTH);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&params.memory_cost.to_le_bytes());
    out.extend_from_slice(&params.time_cost.to_le_bytes());
    out.extend_from_slice(&params.parallelism.to_le_bytes());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed_length.to_le_bytes());

    let cipher = XChaCha20Poly1305::new_from_slice(&keys.encryption[..])
        .map_err(|_| KeyStoreError::crypto("invalid container key", error_codes::INVALID_KEY_MATERIAL))?;
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: &body[..],
                aad: &out,
            },
        )
        .map_err(|_| KeyStoreError::crypto("container encryption failed", error_codes::CIPHER_FAILED))?;
    out.extend_from_slice(&ciphertext);

    let tag = container_mac(&keys.mac[..], &out)?.finalize().into_bytes();
    out.extend_from_slice(&tag);
    Ok(out)
}

/// Check and open a container produced by [`encode_container`].
///
/// Header shape is checked first (`Data`), then the MAC (`Security`), then
/// the AEAD (`Security`), then the record structure (`Data`).
pub(crate) fn decode_container(bytes: &[u8], password: &Password) -> KeyStoreResult<BTreeMap<String, StoredEntry>> {
    if bytes.len() < HEADER_LENGTH + AEAD_TAG_LENGTH + TAG_LENGTH {
        return Err(malformed("shorter than the fixed header"));
    }
    if &bytes[..4] != MAGIC {
        return Err(malformed("bad magic"));
    }
    let read_u32 = |offset: usize| {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&bytes[offset..offset + 4]);
        u32::from_le_bytes(buf)
    };
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != FORMAT_VERSION {
        return Err(KeyStoreError::data(
            &format!("unsupported container version {}", version),
            error_codes::UNSUPPORTED_FORMAT_VERSION,
        ));
    }
    let params = KeyDerivationParams {
        memory_cost: read_u32(6),
        time_cost: read_u32(10),
        parallelism: read_u32(14),
        key_length: 32,
    };
    params
        .validate()
        .map_err(|_| malformed("unusable key derivation parameters"))?;
    let salt = &bytes[18..18 + SALT_LENGTH];
    let nonce = &bytes[18 + SALT_LENGTH..18 + SALT_LENGTH + NONCE_LENGTH];
    let sealed_length = read_u32(HEADER_LENGTH - 4) as usize;
    if bytes.len() != HEADER_LENGTH + sealed_length + TAG_LENGTH {
        return Err(malformed("length does not match the header"));
    }

    let keys = derive_keys(password, salt, &params)?;
    let (authenticated, tag) = bytes.split_at(bytes.len() - TAG_LENGTH);
    container_mac(&keys.mac[..], authenticated)?
        .verify_slice(tag)
        .map_err(|_| {
            log::warn!("key-store container failed its integrity check");
            KeyStoreError::security(
                "wrong password or tampered container",
                error_codes::INTEGRITY_CHECK_FAILED,
            )
        })?;

    let cipher = XChaCha20Poly1305::new_from_slice(&keys.encryption[..])
        .map_err(|_| KeyStoreError::crypto("invalid container key", error_codes::INVALID_KEY_MATERIAL))?;
    let body = Zeroizing::new(
        cipher
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: &authenticated[HEADER_LENGTH..],
                    aad: &authenticated[..HEADER_LENGTH],
                },
            )
            .map_err(|_| KeyStoreError::security("container decryption failed", error_codes::INTEGRITY_CHECK_FAILED))?,
    );

    decode_records(&body[..])
}
