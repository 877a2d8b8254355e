/*!
 * KeyStore Gateway
 *
 * Moves key material and certificates between key-stores over byte streams:
 *
 * - the certificate signing request exchange between a requester holding a
 *   key pair and a certificate authority holding a signing key pair
 * - export and import of single entries, locked under a caller-chosen password
 * - export and import of certificate batches
 *
 * Transports are plain `Read`/`Write` streams; the gateway frames its own
 * messages and never assumes more than one message per read.
 */

mod exchange;
mod gateway;
pub mod messages;

#[cfg(test)]
mod tests;

pub use exchange::{CERTIFICATE_BATCH_MAGIC, EXPORT_MAGIC, EXPORT_VERSION, MAX_BATCH_SIZE, MAX_EXPORT_SIZE};
pub use gateway::{GatewayState, KeyStoreGateway, LockPrompt, LockResolver, MacSecretResolver, PasswordResolver};
pub use messages::{
    read_message, write_message, CertificateAck, CertificateRequest, CertificateResponse, CsrMessage,
    ReceivedMessage, CSR_MAGIC, MAX_MESSAGE_BODY,
};
