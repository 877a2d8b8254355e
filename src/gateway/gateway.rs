use std::fmt;
use std::io::{Read, Write};

use uuid::Uuid;

use super::messages::{
    read_message, write_message, CertificateAck, CertificateRequest, CertificateResponse, CsrMessage,
};
use crate::certificate::{Name, PublicKey};
use crate::error::{error_codes, ErrorContext, KeyStoreError, KeyStoreResult};
use crate::keystore::{EntryKind, KeyStore};
use crate::manager::issue_certificate;
use crate::secure_memory::{Password, SecureBytes};

/// Requester-side state of the CSR exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayState {
    Idle,
    RequestSent,
    ResponseReceived,
    AckSent,
}

impl fmt::Display for GatewayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayState::Idle => write!(f, "IDLE"),
            GatewayState::RequestSent => write!(f, "REQUEST_SENT"),
            GatewayState::ResponseReceived => write!(f, "RESPONSE_RECEIVED"),
            GatewayState::AckSent => write!(f, "ACK_SENT"),
        }
    }
}

/// What a lock resolver is asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockPrompt<'a> {
    /// Choose a password locking an export of `alias`
    Lock { alias: &'a str, kind: EntryKind },
    /// Supply the password of a locked export
    Unlock { kind: EntryKind },
}

/// Alias → entry password
pub type PasswordResolver<'a> = Box<dyn Fn(&str) -> Option<Password> + 'a>;

/// Caller-visible lock/unlock prompt; `None` refuses
pub type LockResolver<'a> = Box<dyn Fn(LockPrompt<'_>) -> Option<Password> + 'a>;

/// Certificate-authority name → secret shared out of band for tagging CSR messages
pub type MacSecretResolver<'a> = Box<dyn Fn(&Name) -> Option<SecureBytes> + 'a>;

#[derive(Debug, Clone)]
struct PendingRequest {
    alias: String,
    request_id: Uuid,
    subject: Name,
    public_key: PublicKey,
}

/// Moves entries and certificate requests between key-stores.
///
/// The requester side of the CSR protocol walks
/// `IDLE → REQUEST_SENT → RESPONSE_RECEIVED → ACK_SENT → IDLE`; the signer
/// side (`process_certificate_request`, `process_certificate_ack`) keeps no
/// state between calls. Any failure of a CSR operation resets the gateway
/// to `IDLE`.
///
/// Passwords, lock prompts and shared MAC secrets come from caller-supplied
/// resolvers; the gateway holds none of them itself.
pub struct KeyStoreGateway<'s> {
    pub(super) store: &'s mut KeyStore,
    state: GatewayState,
    pending: Option<PendingRequest>,
    certifier: Option<String>,
    request_issuer: Option<Name>,
    password_resolver: Option<PasswordResolver<'s>>,
    pub(super) lock_resolver: Option<LockResolver<'s>>,
    mac_secret_resolver: Option<MacSecretResolver<'s>>,
}

impl fmt::Debug for KeyStoreGateway<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStoreGateway")
            .field("state", &self.state)
            .field("pending", &self.pending.as_ref().map(|p| &p.alias))
            .field("certifier", &self.certifier)
            .field("request_issuer", &self.request_issuer)
            .finish()
    }
}

impl<'s> KeyStoreGateway<'s> {
    pub fn new(store: &'s mut KeyStore) -> Self {
        Self {
            store,
            state: GatewayState::Idle,
            pending: None,
            certifier: None,
            request_issuer: None,
            password_resolver: None,
            lock_resolver: None,
            mac_secret_resolver: None,
        }
    }

    pub fn with_password_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&str) -> Option<Password> + 's,
    {
        self.password_resolver = Some(Box::new(resolver));
        self
    }

    pub fn with_lock_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(LockPrompt<'_>) -> Option<Password> + 's,
    {
        self.lock_resolver = Some(Box::new(resolver));
        self
    }

    pub fn with_mac_secret_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&Name) -> Option<SecureBytes> + 's,
    {
        self.mac_secret_resolver = Some(Box::new(resolver));
        self
    }

    /// Key-pair alias used to sign incoming requests
    pub fn with_certifier(mut self, alias: &str) -> Self {
        self.certifier = Some(alias.to_string());
        self
    }

    /// Authority outgoing requests are addressed to
    pub fn with_request_issuer(mut self, issuer: Name) -> Self {
        self.request_issuer = Some(issuer);
        self
    }

    pub fn state(&self) -> GatewayState {
        self.state
    }

    pub fn store(&self) -> &KeyStore {
        &*self.store
    }

    /// Alias waiting for a response, if any
    pub fn pending_alias(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.alias.as_str())
    }

    /// Drop any pending request and return to `IDLE`
    pub fn reset(&mut self) {
        if self.state != GatewayState::Idle {
            log::warn!("gateway reset from {}", self.state);
        }
        self.state = GatewayState::Idle;
        self.pending = None;
    }

    fn transition(&mut self, next: GatewayState) {
        log::debug!("gateway {} -> {}", self.state, next);
        self.state = next;
    }

    fn guarded<T>(&mut self, result: KeyStoreResult<T>) -> KeyStoreResult<T> {
        if result.is_err() {
            self.reset();
        }
        result
    }

    pub(super) fn resolve_password(&self, alias: &str) -> KeyStoreResult<Password> {
        self.password_resolver
            .as_ref()
            .and_then(|resolve| resolve(alias))
            .ok_or_else(|| {
                KeyStoreError::security("no password available for entry", error_codes::PASSWORD_REQUIRED)
                    .with_context(ErrorContext::Alias(alias.to_string()))
            })
    }

    fn mac_secret(&self, authority: &Name) -> Option<SecureBytes> {
        self.mac_secret_resolver
            .as_ref()
            .and_then(|resolve| resolve(authority))
    }

    fn unexpected_state(&self) -> KeyStoreError {
        KeyStoreError::protocol("operation not allowed in the current state", error_codes::UNEXPECTED_STATE)
            .with_context(ErrorContext::State(self.state))
    }

    fn unexpected_message(expected: &str, got: &CsrMessage) -> KeyStoreError {
        KeyStoreError::protocol(
            &format!("expected a {}, got a {}", expected, got.name()),
            error_codes::UNEXPECTED_MESSAGE,
        )
    }

    /// Send a request to certify the key pair under `alias`.
    ///
    /// From `IDLE` only. The request carries the pair's public key, the
    /// subject and usage of its current leaf and, when the pair can sign and
    /// its password resolves, a proof-of-possession signature. Returns the
    /// request id. Fails `Data` if `alias` is not a key-pair entry.
    pub fn create_certificate_request<W: Write>(&mut self, alias: &str, out: &mut W) -> KeyStoreResult<Uuid> {
        let result = self.send_request(alias, out);
        self.guarded(result)
    }

    fn send_request<W: Write>(&mut self, alias: &str, out: &mut W) -> KeyStoreResult<Uuid> {
        if self.state != GatewayState::Idle {
            return Err(self.unexpected_state());
        }
        match self.store.entry_kind(alias) {
            Some(EntryKind::KeyPair) => {}
            Some(kind) => {
                return Err(KeyStoreError::data("not a key-pair entry", error_codes::WRONG_ENTRY_KIND)
                    .with_context(ErrorContext::Entry {
                        alias: alias.to_string(),
                        kind,
                    }))
            }
            None => return Err(KeyStoreError::not_found(alias)),
        }
        let leaf = self
            .store
            .get_certificate(alias)
            .ok_or_else(|| KeyStoreError::not_found(alias))?;

        let mut request = CertificateRequest {
            request_id: Uuid::new_v4(),
            subject: leaf.subject().clone(),
            public_key: leaf.public_key().clone(),
            usage: leaf.usage(),
            issuer: self.request_issuer.clone(),
            proof_of_possession: None,
        };
        if leaf.public_key().spec().can_sign() {
            if let Some(password) = self.password_resolver.as_ref().and_then(|resolve| resolve(alias)) {
                let key_pair = self.store.get_key_pair(alias, &password)?;
                request.proof_of_possession = Some(key_pair.sign(self.store.factory(), &request.signed_bytes()?)?);
            }
        }

        let secret = self.request_issuer.as_ref().and_then(|issuer| self.mac_secret(issuer));
        write_message(
            out,
            &CsrMessage::Request(request.clone()),
            secret.as_ref().map(SecureBytes::as_bytes),
        )?;

        self.pending = Some(PendingRequest {
            alias: alias.to_string(),
            request_id: request.request_id,
            subject: request.subject,
            public_key: request.public_key,
        });
        self.transition(GatewayState::RequestSent);
        log::info!("sent certificate request {} for '{}'", request.request_id, alias);
        Ok(request.request_id)
    }

    /// Signer side: read a request, certify it with the configured certifier
    /// and write a response. Returns the new correlation id.
    ///
    /// Malformed or misaddressed requests are `Protocol` errors; a certifier
    /// without certificate-signing usage is a `Crypto` error.
    pub fn process_certificate_request<R: Read, W: Write>(&mut self, input: &mut R, out: &mut W) -> KeyStoreResult<Uuid> {
        let result = self.answer_request(input, out);
        self.guarded(result)
    }

    fn answer_request<R: Read, W: Write>(&mut self, input: &mut R, out: &mut W) -> KeyStoreResult<Uuid> {
        let certifier = self.certifier.clone().ok_or_else(|| {
            KeyStoreError::protocol("no certifier configured", error_codes::NO_CERTIFIER)
        })?;
        let received = read_message(input)?;
        let request = match &received.message {
            CsrMessage::Request(request) => request.clone(),
            other => return Err(Self::unexpected_message("request", other)),
        };

        let password = self.resolve_password(&certifier)?;
        let signer = self.store.get_key_pair_entry(&certifier, &password)?;
        let authority = signer.certificate().subject().clone();
        let secret = self.mac_secret(&authority);
        received.verify(secret.as_ref().map(SecureBytes::as_bytes))?;

        if let Some(issuer) = &request.issuer {
            if issuer != &authority {
                return Err(KeyStoreError::protocol(
                    &format!("request is addressed to {}, not {}", issuer, authority),
                    error_codes::UNEXPECTED_MESSAGE,
                ));
            }
        }
        if let Some(signature) = &request.proof_of_possession {
            let valid = self.store.factory().verify(
                &request.public_key.spec(),
                request.public_key.as_bytes(),
                &request.signed_bytes()?,
                signature,
            )?;
            if !valid {
                return Err(KeyStoreError::security(
                    "proof of possession does not verify",
                    error_codes::SIGNATURE_INVALID,
                ));
            }
        }

        let chain = issue_certificate(
            self.store.factory(),
            &signer,
            request.subject.clone(),
            request.public_key.clone(),
            request.usage,
            self.store.config().certificate_validity_days,
        )?;
        let response = CertificateResponse {
            correlation_id: Uuid::new_v4(),
            request_id: request.request_id,
            chain,
        };
        write_message(
            out,
            &CsrMessage::Response(response.clone()),
            secret.as_ref().map(SecureBytes::as_bytes),
        )?;
        log::info!(
            "answered certificate request {} from {} with correlation id {}",
            request.request_id,
            request.subject,
            response.correlation_id
        );
        Ok(response.correlation_id)
    }

    /// Requester side: read the response to the pending request, attach the
    /// returned chain to the pending alias and write an acknowledgement.
    ///
    /// From `REQUEST_SENT` only. A certificate for a different public key is
    /// a `Protocol` error and leaves the store untouched. If the
    /// acknowledgement cannot be written the previous chain is restored. On success the
    /// gateway passes through `RESPONSE_RECEIVED` and `ACK_SENT` back to
    /// `IDLE`. Returns the responder's correlation id.
    pub fn process_certificate_response<R: Read, W: Write>(&mut self, input: &mut R, out: &mut W) -> KeyStoreResult<Uuid> {
        let result = self.accept_response(input, out);
        self.guarded(result)
    }

    fn accept_response<R: Read, W: Write>(&mut self, input: &mut R, out: &mut W) -> KeyStoreResult<Uuid> {
        let pending = match (&self.state, &self.pending) {
            (GatewayState::RequestSent, Some(pending)) => pending.clone(),
            _ => return Err(self.unexpected_state()),
        };
        let received = read_message(input)?;
        let response = match &received.message {
            CsrMessage::Response(response) => response.clone(),
            other => return Err(Self::unexpected_message("response", other)),
        };

        let leaf = response.chain.leaf();
        let secret = self.mac_secret(leaf.issuer());
        received.verify(secret.as_ref().map(SecureBytes::as_bytes))?;

        if response.request_id != pending.request_id {
            return Err(KeyStoreError::protocol(
                "response answers a different request",
                error_codes::UNKNOWN_CORRELATION_ID,
            )
            .with_context(ErrorContext::CorrelationId(response.correlation_id)));
        }
        if leaf.public_key() != &pending.public_key {
            return Err(KeyStoreError::protocol(
                "certified public key differs from the requested one",
                error_codes::PUBLIC_KEY_MISMATCH,
            )
            .with_context(ErrorContext::Certificate(Box::new(leaf.clone()))));
        }
        if leaf.subject() != &pending.subject {
            return Err(KeyStoreError::protocol(
                "certified subject differs from the requested one",
                error_codes::UNEXPECTED_MESSAGE,
            )
            .with_context(ErrorContext::Certificate(Box::new(leaf.clone()))));
        }
        self.transition(GatewayState::ResponseReceived);

        let mut ack = Vec::new();
        write_message(
            &mut ack,
            &CsrMessage::Ack(CertificateAck {
                correlation_id: response.correlation_id,
            }),
            secret.as_ref().map(SecureBytes::as_bytes),
        )?;
        let previous_chain = self
            .store
            .get_certificate_chain(&pending.alias)
            .ok_or_else(|| KeyStoreError::not_found(&pending.alias))?;
        self.store
            .update_certificate_chain(&pending.alias, response.chain.clone())?;
        if let Err(e) = out.write_all(&ack).and_then(|_| out.flush()) {
            log::warn!("ack for '{}' not delivered, restoring its previous chain", pending.alias);
            self.store.update_certificate_chain(&pending.alias, previous_chain)?;
            return Err(KeyStoreError::io("failed to write CSR message", e, error_codes::WRITE_FAILED));
        }
        self.transition(GatewayState::AckSent);

        log::info!(
            "attached {}-certificate chain to '{}' (correlation id {})",
            response.chain.len(),
            pending.alias,
            response.correlation_id
        );
        self.pending = None;
        self.transition(GatewayState::Idle);
        Ok(response.correlation_id)
    }

    /// Signer side: consume an acknowledgement and return its correlation id
    pub fn process_certificate_ack<R: Read>(&mut self, input: &mut R) -> KeyStoreResult<Uuid> {
        let result = self.consume_ack(input);
        self.guarded(result)
    }

    fn consume_ack<R: Read>(&mut self, input: &mut R) -> KeyStoreResult<Uuid> {
        let received = read_message(input)?;
        let ack = match &received.message {
            CsrMessage::Ack(ack) => *ack,
            other => return Err(Self::unexpected_message("ack", other)),
        };
        let secret = self
            .certifier
            .as_ref()
            .and_then(|alias| self.store.get_certificate(alias))
            .and_then(|cert| self.mac_secret(cert.subject()));
        received.verify(secret.as_ref().map(SecureBytes::as_bytes))?;
        log::info!("certificate exchange {} acknowledged", ack.correlation_id);
        Ok(ack.correlation_id)
    }
}
