use bincode::Options;
use chrono::{DateTime, TimeZone, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};

use crate::error::{error_codes, KeyStoreError, KeyStoreResult};

/// Generate random bytes of the specified length
pub fn random_bytes(length: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; length];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Generate a fixed-size random array
pub fn random_array<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Constant-time comparison of two byte slices to avoid timing attacks
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}

/// Convert bytes to a hexadecimal string
pub fn to_hex(data: &[u8]) -> String {
    hex::encode(data)
}

/// Convert a hexadecimal string to bytes
pub fn from_hex(hex_str: &str) -> KeyStoreResult<Vec<u8>> {
    hex::decode(hex_str).map_err(|e| {
        KeyStoreError::data(
            &format!("invalid hex string: {}", e),
            error_codes::ENCODING_FAILED,
        )
    })
}

/// Write a length-prefixed (u32 little-endian) byte string
pub(crate) fn write_frame<W: Write>(out: &mut W, data: &[u8]) -> KeyStoreResult<()> {
    let len = u32::try_from(data.len()).map_err(|_| {
        KeyStoreError::data("frame exceeds 4 GiB", error_codes::ENCODING_FAILED)
    })?;
    out.write_all(&len.to_le_bytes())
        .and_then(|_| out.write_all(data))
        .map_err(|e| KeyStoreError::io("failed to write frame", e, error_codes::WRITE_FAILED))
}

/// Read a u32 little-endian value
pub(crate) fn read_u32<R: Read>(input: &mut R) -> KeyStoreResult<u32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Read a length-prefixed byte string, refusing lengths above `max_len`
pub(crate) fn read_frame<R: Read>(input: &mut R, max_len: usize) -> KeyStoreResult<Vec<u8>> {
    let len = read_u32(input)? as usize;
    if len > max_len {
        return Err(KeyStoreError::data(
            &format!("frame length {} exceeds limit {}", len, max_len),
            error_codes::MALFORMED_CONTAINER,
        ));
    }
    let mut data = vec![0u8; len];
    input.read_exact(&mut data)?;
    Ok(data)
}

fn bincode_options() -> impl Options {
    bincode::DefaultOptions::new().with_fixint_encoding()
}

/// Encode a value with the crate's canonical binary encoding
pub(crate) fn encode<T: Serialize>(value: &T) -> KeyStoreResult<Vec<u8>> {
    Ok(bincode_options().serialize(value)?)
}

/// Decode a value, refusing inputs that would allocate more than `limit` bytes
/// or that carry trailing bytes
pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8], limit: u64) -> KeyStoreResult<T> {
    Ok(bincode_options().with_limit(limit).deserialize(bytes)?)
}

/// Current time truncated to whole milliseconds, the resolution every
/// persisted timestamp is stored at
pub fn now_millis() -> DateTime<Utc> {
    from_millis(Utc::now().timestamp_millis()).unwrap_or_else(Utc::now)
}

/// Convert unix milliseconds to a timestamp
pub fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}
