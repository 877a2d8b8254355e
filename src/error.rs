/*!
 * Error Handling for the QaSa Key-Store
 *
 * Every fallible key-store operation reports one of five error kinds
 * (data, security, crypto, I/O, protocol). Each error carries an error code,
 * a message and, where available, the offending context object so that the
 * caller can diagnose the failure without re-deriving it.
 */

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::certificate::Certificate;
use crate::gateway::GatewayState;
use crate::keystore::EntryKind;
use crate::spec::AnySpec;

/// The five failure categories of the key-store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed structure, unexpected shape
    Data,
    /// Wrong password, MAC or signature mismatch
    Security,
    /// Invalid or unsupported spec, violated precondition
    Crypto,
    /// Stream or file failure
    Io,
    /// CSR message out of sequence or malformed
    Protocol,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Data => write!(f, "DATA"),
            ErrorKind::Security => write!(f, "SECURITY"),
            ErrorKind::Crypto => write!(f, "CRYPTO"),
            ErrorKind::Io => write!(f, "IO"),
            ErrorKind::Protocol => write!(f, "PROTOCOL"),
        }
    }
}

/// The object an error is about
#[derive(Debug, Clone)]
pub enum ErrorContext {
    Alias(String),
    Entry { alias: String, kind: EntryKind },
    Spec(AnySpec),
    Certificate(Box<Certificate>),
    CorrelationId(Uuid),
    State(GatewayState),
    Path(PathBuf),
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorContext::Alias(alias) => write!(f, "alias '{}'", alias),
            ErrorContext::Entry { alias, kind } => write!(f, "{} entry '{}'", kind, alias),
            ErrorContext::Spec(spec) => write!(f, "spec {}", spec),
            ErrorContext::Certificate(cert) => write!(f, "certificate '{}'", cert.subject()),
            ErrorContext::CorrelationId(id) => write!(f, "correlation id {}", id),
            ErrorContext::State(state) => write!(f, "gateway state {}", state),
            ErrorContext::Path(path) => write!(f, "path {}", path.display()),
        }
    }
}

/// Error type for all key-store operations
#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("Data error: {message}")]
    Data {
        message: String,
        error_code: u32,
        context: Option<ErrorContext>,
    },

    #[error("Security error: {message}")]
    Security {
        message: String,
        error_code: u32,
        context: Option<ErrorContext>,
    },

    #[error("Crypto error: {message}")]
    Crypto {
        message: String,
        error_code: u32,
        context: Option<ErrorContext>,
    },

    #[error("IO error: {message}")]
    Io {
        message: String,
        error_code: u32,
        context: Option<ErrorContext>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        error_code: u32,
        context: Option<ErrorContext>,
    },
}

/// Error code constants for different error categories
pub mod error_codes {
    // Data errors: 1000-1999
    pub const MALFORMED_CONTAINER: u32 = 1001;
    pub const UNSUPPORTED_FORMAT_VERSION: u32 = 1002;
    pub const UNKNOWN_ENTRY_TAG: u32 = 1003;
    pub const ENTRY_NOT_FOUND: u32 = 1004;
    pub const WRONG_ENTRY_KIND: u32 = 1005;
    pub const MALFORMED_CHAIN: u32 = 1006;
    pub const ENCODING_FAILED: u32 = 1007;
    pub const DUPLICATE_ALIAS: u32 = 1008;

    // Security errors: 2000-2999
    pub const WRONG_PASSWORD: u32 = 2001;
    pub const PASSWORD_REQUIRED: u32 = 2002;
    pub const INTEGRITY_CHECK_FAILED: u32 = 2003;
    pub const SIGNATURE_INVALID: u32 = 2004;
    pub const MAC_MISMATCH: u32 = 2005;
    pub const UNLOCK_REFUSED: u32 = 2006;

    // Crypto errors: 3000-3999
    pub const INVALID_SPEC: u32 = 3001;
    pub const UNSUPPORTED_SPEC: u32 = 3002;
    pub const SIGNER_NOT_AUTHORIZED: u32 = 3003;
    pub const KEY_GENERATION_FAILED: u32 = 3004;
    pub const SIGNING_FAILED: u32 = 3005;
    pub const CIPHER_FAILED: u32 = 3006;
    pub const KEY_DERIVATION_FAILED: u32 = 3007;
    pub const INVALID_KEY_MATERIAL: u32 = 3008;
    pub const INVALID_VALIDITY: u32 = 3009;

    // IO errors: 4000-4999
    pub const READ_FAILED: u32 = 4001;
    pub const WRITE_FAILED: u32 = 4002;

    // Protocol errors: 5000-5999
    pub const UNEXPECTED_STATE: u32 = 5001;
    pub const MALFORMED_MESSAGE: u32 = 5002;
    pub const UNEXPECTED_MESSAGE: u32 = 5003;
    pub const PUBLIC_KEY_MISMATCH: u32 = 5004;
    pub const UNKNOWN_CORRELATION_ID: u32 = 5005;
    pub const NO_CERTIFIER: u32 = 5006;
}

impl KeyStoreError {
    /// The failure category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            KeyStoreError::Data { .. } => ErrorKind::Data,
            KeyStoreError::Security { .. } => ErrorKind::Security,
            KeyStoreError::Crypto { .. } => ErrorKind::Crypto,
            KeyStoreError::Io { .. } => ErrorKind::Io,
            KeyStoreError::Protocol { .. } => ErrorKind::Protocol,
        }
    }

    /// Get the numeric error code for this error
    pub fn error_code(&self) -> u32 {
        match self {
            KeyStoreError::Data { error_code, .. }
            | KeyStoreError::Security { error_code, .. }
            | KeyStoreError::Crypto { error_code, .. }
            | KeyStoreError::Io { error_code, .. }
            | KeyStoreError::Protocol { error_code, .. } => *error_code,
        }
    }

    /// The offending object, if one was attached
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            KeyStoreError::Data { context, .. }
            | KeyStoreError::Security { context, .. }
            | KeyStoreError::Crypto { context, .. }
            | KeyStoreError::Io { context, .. }
            | KeyStoreError::Protocol { context, .. } => context.as_ref(),
        }
    }

    /// Get the error category/type as a string
    pub fn error_type(&self) -> &'static str {
        match self {
            KeyStoreError::Data { .. } => "DataError",
            KeyStoreError::Security { .. } => "SecurityError",
            KeyStoreError::Crypto { .. } => "CryptoError",
            KeyStoreError::Io { .. } => "IoError",
            KeyStoreError::Protocol { .. } => "ProtocolError",
        }
    }

    /// Get a user-friendly error message
    pub fn user_friendly_message(&self) -> String {
        let about = self
            .context()
            .map(|c| format!(" ({})", c))
            .unwrap_or_default();
        match self {
            KeyStoreError::Data { .. } => {
                format!("The key-store data is malformed or not what was expected{}.", about)
            }
            KeyStoreError::Security { .. } => {
                format!("Access was denied: a password, signature or integrity check failed{}.", about)
            }
            KeyStoreError::Crypto { .. } => {
                format!("The cryptographic operation cannot be performed{}.", about)
            }
            KeyStoreError::Io { .. } => {
                format!("Reading or writing failed{}. Check the stream, file permissions and disk space.", about)
            }
            KeyStoreError::Protocol { .. } => {
                format!("The certificate exchange is out of sequence or malformed{}.", about)
            }
        }
    }

    /// Get suggested remediation steps
    pub fn suggested_remediation(&self) -> Option<String> {
        match self.error_code() {
            error_codes::WRONG_PASSWORD | error_codes::PASSWORD_REQUIRED => {
                Some("Supply the password the entry or container was stored with.".to_string())
            }
            error_codes::INTEGRITY_CHECK_FAILED => Some(
                "The container was modified, truncated, or the password is wrong. Restore it from a backup."
                    .to_string(),
            ),
            error_codes::UNSUPPORTED_SPEC => Some(
                "Choose an algorithm the active cryptographic factory supports, or disable restricted mode."
                    .to_string(),
            ),
            error_codes::SIGNER_NOT_AUTHORIZED => Some(
                "Use a signer whose certificate carries the certificate-signing usage.".to_string(),
            ),
            error_codes::INVALID_VALIDITY => Some(format!(
                "Use a certificate validity between 1 and {} days.",
                crate::config::MAX_VALIDITY_DAYS
            )),
            error_codes::UNEXPECTED_STATE => {
                Some("Start a new exchange with create_certificate_request.".to_string())
            }
            _ => None,
        }
    }

    /// Attach (or replace) the context object of this error
    pub fn with_context(mut self, ctx: ErrorContext) -> Self {
        match &mut self {
            KeyStoreError::Data { context, .. }
            | KeyStoreError::Security { context, .. }
            | KeyStoreError::Crypto { context, .. }
            | KeyStoreError::Io { context, .. }
            | KeyStoreError::Protocol { context, .. } => *context = Some(ctx),
        }
        self
    }
}

/// Convenience constructors for common error types
impl KeyStoreError {
    pub fn data(message: &str, error_code: u32) -> Self {
        KeyStoreError::Data {
            message: message.to_string(),
            error_code,
            context: None,
        }
    }

    pub fn security(message: &str, error_code: u32) -> Self {
        KeyStoreError::Security {
            message: message.to_string(),
            error_code,
            context: None,
        }
    }

    pub fn crypto(message: &str, error_code: u32) -> Self {
        KeyStoreError::Crypto {
            message: message.to_string(),
            error_code,
            context: None,
        }
    }

    pub fn protocol(message: &str, error_code: u32) -> Self {
        KeyStoreError::Protocol {
            message: message.to_string(),
            error_code,
            context: None,
        }
    }

    pub fn io(message: &str, source: std::io::Error, error_code: u32) -> Self {
        KeyStoreError::Io {
            message: message.to_string(),
            error_code,
            context: None,
            source: Some(source),
        }
    }

    pub fn wrong_password(alias: &str) -> Self {
        Self::security("wrong password", error_codes::WRONG_PASSWORD)
            .with_context(ErrorContext::Alias(alias.to_string()))
    }

    pub fn not_found(alias: &str) -> Self {
        Self::data("no entry under alias", error_codes::ENTRY_NOT_FOUND)
            .with_context(ErrorContext::Alias(alias.to_string()))
    }

    pub fn invalid_spec(spec: AnySpec) -> Self {
        Self::crypto("spec is structurally invalid", error_codes::INVALID_SPEC)
            .with_context(ErrorContext::Spec(spec))
    }

    pub fn unsupported_spec(spec: AnySpec) -> Self {
        Self::crypto(
            "spec is not supported by the active factory",
            error_codes::UNSUPPORTED_SPEC,
        )
        .with_context(ErrorContext::Spec(spec))
    }
}

// From implementations for automatic error conversion
impl From<std::io::Error> for KeyStoreError {
    fn from(err: std::io::Error) -> Self {
        let message = format!("IO operation failed: {}", err);
        KeyStoreError::io(&message, err, error_codes::READ_FAILED)
    }
}

impl From<bincode::Error> for KeyStoreError {
    fn from(err: bincode::Error) -> Self {
        KeyStoreError::data(
            &format!("binary encoding failed: {}", err),
            error_codes::ENCODING_FAILED,
        )
    }
}

/// Result type alias for key-store operations
pub type KeyStoreResult<T> = Result<T, KeyStoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_code() {
        let error = KeyStoreError::wrong_password("root");
        assert_eq!(error.kind(), ErrorKind::Security);
        assert_eq!(error.error_code(), error_codes::WRONG_PASSWORD);
        assert_eq!(error.error_type(), "SecurityError");
    }

    #[test]
    fn test_context_is_attached() {
        let error = KeyStoreError::not_found("leaf");
        match error.context() {
            Some(ErrorContext::Alias(alias)) => assert_eq!(alias, "leaf"),
            other => panic!("unexpected context: {:?}", other),
        }
        assert!(error.user_friendly_message().contains("alias 'leaf'"));
    }

    #[test]
    fn test_io_conversion_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        let error: KeyStoreError = io.into();
        assert_eq!(error.kind(), ErrorKind::Io);
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn test_remediation_suggestions() {
        let error = KeyStoreError::security("bad mac", error_codes::INTEGRITY_CHECK_FAILED);
        let suggestion = error.suggested_remediation();
        assert!(suggestion.is_some());
        assert!(suggestion.unwrap().contains("backup"));
        assert!(KeyStoreError::data("x", error_codes::ENCODING_FAILED)
            .suggested_remediation()
            .is_none());
    }
}
