//! CSR wire messages
//!
//! ```text
//! magic "QCSR" | type u8 | body length u32 | body | tag flag u8 | [HMAC-SHA256 tag; 32]
//! ```
//!
//! The optional tag covers every byte before the tag flag and is keyed with
//! the secret both parties share for the certificate authority's name.

use std::io::{self, Read, Write};

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::certificate::{CertificateChain, KeyUsage, Name, PublicKey};
use crate::error::{error_codes, KeyStoreError, KeyStoreResult};
use crate::utils;

type HmacSha256 = Hmac<Sha256>;

pub const CSR_MAGIC: &[u8; 4] = b"QCSR";

/// Largest message body accepted
pub const MAX_MESSAGE_BODY: usize = 1024 * 1024;

const TAG_LENGTH: usize = 32;

/// Ask a certificate authority to certify a public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRequest {
    pub request_id: Uuid,
    pub subject: Name,
    pub public_key: PublicKey,
    pub usage: KeyUsage,
    /// Authority the request is meant for, if the requester names one
    pub issuer: Option<Name>,
    /// Signature by the requested key over [`CertificateRequest::signed_bytes`]
    pub proof_of_possession: Option<Vec<u8>>,
}

impl CertificateRequest {
    /// Bytes covered by the proof-of-possession signature
    pub fn signed_bytes(&self) -> KeyStoreResult<Vec<u8>> {
        utils::encode(&(
            &self.request_id,
            &self.subject,
            &self.public_key,
            &self.usage,
            &self.issuer,
        ))
    }
}

/// The signed chain answering a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateResponse {
    pub correlation_id: Uuid,
    pub request_id: Uuid,
    pub chain: CertificateChain,
}

/// Confirms that a response was attached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateAck {
    pub correlation_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CsrMessage {
    Request(CertificateRequest),
    Response(CertificateResponse),
    Ack(CertificateAck),
}

impl CsrMessage {
    pub fn type_tag(&self) -> u8 {
        match self {
            CsrMessage::Request(_) => 1,
            CsrMessage::Response(_) => 2,
            CsrMessage::Ack(_) => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CsrMessage::Request(_) => "request",
            CsrMessage::Response(_) => "response",
            CsrMessage::Ack(_) => "ack",
        }
    }
}

/// A parsed message together with what its tag must be checked against
#[derive(Debug)]
pub struct ReceivedMessage {
    pub message: CsrMessage,
    authenticated: Vec<u8>,
    tag: Option<Vec<u8>>,
}

impl ReceivedMessage {
    pub fn is_tagged(&self) -> bool {
        self.tag.is_some()
    }

    /// Check the tag against `secret`.
    ///
    /// With a secret the message must carry a matching tag. Without one a
    /// tag cannot be checked and is ignored.
    pub fn verify(&self, secret: Option<&[u8]>) -> KeyStoreResult<()> {
        match (secret, &self.tag) {
            (Some(secret), Some(tag)) => message_mac(secret, &self.authenticated)?
                .verify_slice(tag)
                .map_err(|_| {
                    KeyStoreError::security(
                        &format!("{} tag does not verify", self.message.name()),
                        error_codes::MAC_MISMATCH,
                    )
                }),
            (Some(_), None) => Err(KeyStoreError::security(
                &format!("untagged {} where a shared secret is configured", self.message.name()),
                error_codes::MAC_MISMATCH,
            )),
            (None, Some(_)) => {
                log::warn!("ignoring {} tag: no shared secret configured", self.message.name());
                Ok(())
            }
            (None, None) => Ok(()),
        }
    }
}

fn message_mac(secret: &[u8], data: &[u8]) -> KeyStoreResult<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|_| KeyStoreError::crypto("invalid shared MAC secret", error_codes::INVALID_KEY_MATERIAL))?;
    mac.update(data);
    Ok(mac)
}

fn malformed(reason: &str) -> KeyStoreError {
    KeyStoreError::protocol(
        &format!("malformed CSR message: {}", reason),
        error_codes::MALFORMED_MESSAGE,
    )
}

/// End of stream in the middle of a message is a protocol failure; any
/// other stream error stays an I/O failure
fn read_exact<R: Read>(input: &mut R, buf: &mut [u8]) -> KeyStoreResult<()> {
    input.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            malformed("truncated")
        } else {
            KeyStoreError::io("failed to read CSR message", e, error_codes::READ_FAILED)
        }
    })
}

/// Write `message`, tagged when `secret` is given
pub fn write_message<W: Write>(out: &mut W, message: &CsrMessage, secret: Option<&[u8]>) -> KeyStoreResult<()> {
    let body = match message {
        CsrMessage::Request(m) => utils::encode(m)?,
        CsrMessage::Response(m) => utils::encode(m)?,
        CsrMessage::Ack(m) => utils::encode(m)?,
    };
    if body.len() > MAX_MESSAGE_BODY {
        return Err(malformed("body exceeds the size limit"));
    }

    let mut frame = Vec::with_capacity(4 + 1 + 4 + body.len() + 1 + TAG_LENGTH);
    frame.extend_from_slice(CSR_MAGIC);
    frame.push(message.type_tag());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    match secret {
        Some(secret) => {
            let tag = message_mac(secret, &frame)?.finalize().into_bytes();
            frame.push(1);
            frame.extend_from_slice(&tag);
        }
        None => frame.push(0),
    }

    out.write_all(&frame)
        .and_then(|_| out.flush())
        .map_err(|e| KeyStoreError::io("failed to write CSR message", e, error_codes::WRITE_FAILED))
}

/// Read one message. Structural problems are `Protocol` errors.
pub fn read_message<R: Read>(input: &mut R) -> KeyStoreResult<ReceivedMessage> {
    let mut header = [0u8; 9];
    read_exact(input, &mut header)?;
    if &header[..4] != CSR_MAGIC {
        return Err(malformed("bad magic"));
    }
    let message_type = header[4];
    let length = u32::from_le_bytes([header[5], header[6], header[7], header[8]]) as usize;
    if length > MAX_MESSAGE_BODY {
        return Err(malformed(&format!("body length {} exceeds the limit", length)));
    }

    let mut authenticated = Vec::with_capacity(header.len() + length);
    authenticated.extend_from_slice(&header);
    authenticated.resize(header.len() + length, 0);
    read_exact(input, &mut authenticated[header.len()..])?;
    let body = &authenticated[header.len()..];

    let decode_failed = |e: KeyStoreError| malformed(&e.to_string());
    let message = match message_type {
        1 => CsrMessage::Request(utils::decode(body, MAX_MESSAGE_BODY as u64).map_err(decode_failed)?),
        2 => CsrMessage::Response(utils::decode(body, MAX_MESSAGE_BODY as u64).map_err(decode_failed)?),
        3 => CsrMessage::Ack(utils::decode(body, MAX_MESSAGE_BODY as u64).map_err(decode_failed)?),
        other => return Err(malformed(&format!("unknown message type {}", other))),
    };

    let mut flag = [0u8; 1];
    read_exact(input, &mut flag)?;
    let tag = match flag[0] {
        0 => None,
        1 => {
            let mut tag = vec![0u8; TAG_LENGTH];
            read_exact(input, &mut tag)?;
            Some(tag)
        }
        other => return Err(malformed(&format!("bad tag flag {}", other))),
    };

    Ok(ReceivedMessage {
        message,
        authenticated,
        tag,
    })
}
