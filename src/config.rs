//! Key-store configuration
//!
//! Tunable parameters are grouped in [`KeyStoreConfig`] and can be loaded
//! from JSON. Everything has a usable default.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::container::KeyDerivationParams;
use crate::error::{error_codes, ErrorContext, KeyStoreError, KeyStoreResult};

/// File extension of a plain key-store container
pub const KEYSTORE_EXTENSION: &str = "qks";

/// File extension of a password-locked (compressed) key-store container
pub const LOCKED_KEYSTORE_EXTENSION: &str = "qksl";

/// Longest certificate validity accepted, in days (100 years)
pub const MAX_VALIDITY_DAYS: u32 = 36_525;

/// Container flavour, derived from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    Plain,
    Locked,
}

impl ContainerFormat {
    /// Classify `path` by extension; `None` for anything else
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            KEYSTORE_EXTENSION => Some(ContainerFormat::Plain),
            LOCKED_KEYSTORE_EXTENSION => Some(ContainerFormat::Locked),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Plain => KEYSTORE_EXTENSION,
            ContainerFormat::Locked => LOCKED_KEYSTORE_EXTENSION,
        }
    }
}

/// Configuration of a key-store and the operations run against it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyStoreConfig {
    /// Argon2id parameters for entry envelopes and the outer container
    pub kdf: KeyDerivationParams,
    /// Validity of certificates issued to non-root key pairs
    pub certificate_validity_days: u32,
    /// Validity of self-signed root certificates
    pub root_validity_days: u32,
    /// Run the cryptographic factory in restricted mode
    pub restricted_factory: bool,
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self {
            kdf: KeyDerivationParams::default(),
            certificate_validity_days: 365,
            root_validity_days: 3650,
            restricted_factory: false,
        }
    }
}

impl KeyStoreConfig {
    pub fn from_json(json: &str) -> KeyStoreResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| {
            KeyStoreError::data(
                &format!("invalid key-store configuration: {}", e),
                error_codes::ENCODING_FAILED,
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> KeyStoreResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            KeyStoreError::data(
                &format!("failed to serialize configuration: {}", e),
                error_codes::ENCODING_FAILED,
            )
        })
    }

    /// Read a JSON configuration file
    pub fn load(path: &Path) -> KeyStoreResult<Self> {
        let json = fs::read_to_string(path).map_err(|e| {
            KeyStoreError::io("failed to read configuration", e, error_codes::READ_FAILED)
                .with_context(ErrorContext::Path(path.to_path_buf()))
        })?;
        Self::from_json(&json)
    }

    /// Reject configurations no operation could run with
    pub fn validate(&self) -> KeyStoreResult<()> {
        self.kdf.validate()?;
        let days = 1..=MAX_VALIDITY_DAYS;
        if !days.contains(&self.certificate_validity_days) || !days.contains(&self.root_validity_days) {
            return Err(KeyStoreError::data(
                &format!("certificate validity must be within 1..={} days", MAX_VALIDITY_DAYS),
                error_codes::ENCODING_FAILED,
            ));
        }
        Ok(())
    }
}

/// Default location of the user's key-store: `<data dir>/qasa/keystore.qks`
pub fn default_keystore_path() -> KeyStoreResult<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| {
        KeyStoreError::io(
            "could not determine the user data directory",
            std::io::Error::new(std::io::ErrorKind::NotFound, "no data directory"),
            error_codes::READ_FAILED,
        )
    })?;
    Ok(data_dir
        .join("qasa")
        .join(format!("keystore.{}", KEYSTORE_EXTENSION)))
}
