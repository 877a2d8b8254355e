use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{KeyUsage, Name, MAX_CERTIFICATE_SIZE};
use crate::error::{error_codes, ErrorContext, KeyStoreError, KeyStoreResult};
use crate::factory::CryptoFactory;
use crate::spec::KeyPairSpec;
use crate::utils;

/// Encoding version written into every certificate
pub const CERTIFICATE_VERSION: u8 = 1;

const PEM_BEGIN: &str = "-----BEGIN QASA CERTIFICATE-----";
const PEM_END: &str = "-----END QASA CERTIFICATE-----";

/// A public key tagged with the key-pair spec it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey {
    spec: KeyPairSpec,
    bytes: Vec<u8>,
}

impl PublicKey {
    pub fn new(spec: KeyPairSpec, bytes: Vec<u8>) -> Self {
        Self { spec, bytes }
    }

    pub fn spec(&self) -> KeyPairSpec {
        self.spec
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// SHA-256 over the raw key bytes, hex encoded. Safe to log.
    pub fn fingerprint(&self) -> String {
        utils::to_hex(&Sha256::digest(&self.bytes))
    }
}

/// The signed portion of a certificate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TbsCertificate {
    pub version: u8,
    pub serial: [u8; 16],
    pub subject: Name,
    pub issuer: Name,
    pub public_key: PublicKey,
    pub usage: KeyUsage,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub not_before: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub not_after: DateTime<Utc>,
}

impl TbsCertificate {
    /// Fields for a new certificate valid from now for `validity_days`.
    ///
    /// An end date outside the representable range is a `Crypto` error.
    pub fn new(
        subject: Name,
        issuer: Name,
        public_key: PublicKey,
        usage: KeyUsage,
        validity_days: u32,
    ) -> KeyStoreResult<Self> {
        let not_before = utils::now_millis();
        let not_after = Duration::try_days(i64::from(validity_days))
            .and_then(|validity| not_before.checked_add_signed(validity))
            .ok_or_else(|| {
                KeyStoreError::crypto(
                    &format!("validity of {} days is out of range", validity_days),
                    error_codes::INVALID_VALIDITY,
                )
            })?;
        Ok(Self {
            version: CERTIFICATE_VERSION,
            serial: utils::random_array::<16>(),
            subject,
            issuer,
            public_key,
            usage,
            not_before,
            not_after,
        })
    }

    /// Canonical bytes covered by the signature
    pub fn to_be_signed(&self) -> KeyStoreResult<Vec<u8>> {
        utils::encode(self)
    }
}

/// A signed binding of subject name, public key and usage
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Certificate {
    tbs: TbsCertificate,
    signature_spec: KeyPairSpec,
    signature: Vec<u8>,
}

impl Certificate {
    /// Sign `tbs` with the issuer's private key.
    ///
    /// # Arguments
    ///
    /// * `tbs` - The certificate fields
    /// * `signer_spec` - Spec of the issuer's key pair; must be able to sign
    /// * `signer_private_key` - The issuer's private key
    /// * `factory` - The cryptographic factory performing the signature
    ///
    /// # Returns
    ///
    /// The signed certificate. Authorization of the issuer (its usage bits)
    /// is checked by the caller, who holds the issuer's certificate.
    pub fn sign(
        tbs: TbsCertificate,
        signer_spec: KeyPairSpec,
        signer_private_key: &[u8],
        factory: &dyn CryptoFactory,
    ) -> KeyStoreResult<Self> {
        let message = tbs.to_be_signed()?;
        let signature = factory.sign(&signer_spec, signer_private_key, &message)?;
        Ok(Self {
            tbs,
            signature_spec: signer_spec,
            signature,
        })
    }

    /// Verify this certificate's signature under `issuer_key`.
    ///
    /// A key whose spec differs from the declared signature spec, or a
    /// signature that does not verify, is a `Security` error.
    pub fn verify_signature(&self, issuer_key: &PublicKey, factory: &dyn CryptoFactory) -> KeyStoreResult<()> {
        let fail = |reason: &str| {
            KeyStoreError::security(reason, error_codes::SIGNATURE_INVALID)
                .with_context(ErrorContext::Certificate(Box::new(self.clone())))
        };
        if issuer_key.spec() != self.signature_spec {
            return Err(fail("issuer key does not match the signature algorithm"));
        }
        let message = self.tbs.to_be_signed()?;
        let valid = factory.verify(&self.signature_spec, issuer_key.as_bytes(), &message, &self.signature)?;
        if !valid {
            return Err(fail("certificate signature does not verify"));
        }
        Ok(())
    }

    /// Subject equals issuer
    pub fn is_self_signed(&self) -> bool {
        self.tbs.subject == self.tbs.issuer
    }

    pub fn tbs(&self) -> &TbsCertificate {
        &self.tbs
    }

    pub fn subject(&self) -> &Name {
        &self.tbs.subject
    }

    pub fn issuer(&self) -> &Name {
        &self.tbs.issuer
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.tbs.public_key
    }

    pub fn usage(&self) -> KeyUsage {
        self.tbs.usage
    }

    pub fn serial(&self) -> &[u8; 16] {
        &self.tbs.serial
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.tbs.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.tbs.not_after
    }

    pub fn signature_spec(&self) -> KeyPairSpec {
        self.signature_spec
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn is_valid_at(&self, time: DateTime<Utc>) -> bool {
        self.tbs.not_before <= time && time <= self.tbs.not_after
    }

    /// SHA-256 over the encoded certificate, hex encoded
    pub fn fingerprint(&self) -> KeyStoreResult<String> {
        Ok(utils::to_hex(&Sha256::digest(self.to_bytes()?)))
    }

    pub fn to_bytes(&self) -> KeyStoreResult<Vec<u8>> {
        utils::encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> KeyStoreResult<Self> {
        utils::decode(bytes, MAX_CERTIFICATE_SIZE)
    }

    /// Base64 armor with 64-column lines
    pub fn to_pem(&self) -> KeyStoreResult<String> {
        let encoded = base64::encode(self.to_bytes()?);
        let mut pem = String::with_capacity(encoded.len() + 80);
        pem.push_str(PEM_BEGIN);
        pem.push('\n');
        for line in encoded.as_bytes().chunks(64) {
            pem.push_str(&String::from_utf8_lossy(line));
            pem.push('\n');
        }
        pem.push_str(PEM_END);
        pem.push('\n');
        Ok(pem)
    }

    pub fn from_pem(pem: &str) -> KeyStoreResult<Self> {
        let malformed = |reason: &str| {
            KeyStoreError::data(
                &format!("malformed certificate armor: {}", reason),
                error_codes::ENCODING_FAILED,
            )
        };
        let body = pem
            .trim()
            .strip_prefix(PEM_BEGIN)
            .and_then(|rest| rest.strip_suffix(PEM_END))
            .ok_or_else(|| malformed("missing armor lines"))?;
        let joined: String = body.split_whitespace().collect();
        let bytes = base64::decode(joined).map_err(|e| malformed(&e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Display for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (issuer {}, usage {}, key {} {})",
            self.tbs.subject,
            self.tbs.issuer,
            self.tbs.usage,
            self.tbs.public_key.spec(),
            &self.tbs.public_key.fingerprint()[..16]
        )
    }
}
