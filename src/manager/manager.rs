use crate::certificate::{Certificate, CertificateChain, KeyUsage, Name, PublicKey, TbsCertificate};
use crate::error::{error_codes, ErrorContext, KeyStoreError, KeyStoreResult};
use crate::factory::CryptoFactory;
use crate::keystore::{Entry, KeyPair, KeyPairEntry, KeySet, KeyStore, SymmetricKey};
use crate::secure_memory::Password;
use crate::spec::{ensure_usable, KeyPairSpec, KeySetSpec, KeySpec};

/// An existing key-pair entry and the password that unseals it
#[derive(Debug, Clone, Copy)]
pub struct Credential<'a> {
    pub alias: &'a str,
    pub password: &'a Password,
}

impl<'a> Credential<'a> {
    pub fn new(alias: &'a str, password: &'a Password) -> Self {
        Self { alias, password }
    }
}

/// Sign a certificate for `public_key` with `signer` and prepend it to a
/// copy of the signer's chain.
///
/// The signer's leaf must carry certificate-signing usage and its key must be
/// able to sign; otherwise this is a `Crypto` precondition failure.
pub(crate) fn issue_certificate(
    factory: &dyn CryptoFactory,
    signer: &KeyPairEntry,
    subject: Name,
    public_key: PublicKey,
    usage: KeyUsage,
    validity_days: u32,
) -> KeyStoreResult<CertificateChain> {
    let signer_cert = signer.certificate();
    if !signer_cert.usage().contains(KeyUsage::CERTIFICATE_SIGNING) || !signer.key_pair.spec().can_sign() {
        return Err(KeyStoreError::crypto(
            &format!("'{}' is not allowed to sign certificates", signer_cert.subject()),
            error_codes::SIGNER_NOT_AUTHORIZED,
        )
        .with_context(ErrorContext::Certificate(Box::new(signer_cert.clone()))));
    }

    let tbs = TbsCertificate::new(subject, signer_cert.subject().clone(), public_key, usage, validity_days)?;
    let certificate = Certificate::sign(
        tbs,
        signer.key_pair.spec(),
        signer.key_pair.private_key().as_bytes(),
        factory,
    )?;
    log::info!(
        "issued certificate for {} ({}) signed by {}",
        certificate.subject(),
        usage,
        signer_cert.subject()
    );
    signer.chain.prepend(certificate)
}

/// Creates new material and certificates in a [`KeyStore`]
#[derive(Debug)]
pub struct KeyStoreManager<'s> {
    store: &'s mut KeyStore,
}

impl<'s> KeyStoreManager<'s> {
    pub fn new(store: &'s mut KeyStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &KeyStore {
        &*self.store
    }

    /// Generate a symmetric key bundle and store it under `alias`.
    ///
    /// # Arguments
    ///
    /// * `spec` - The bundle composition; must be valid and supported
    /// * `alias` - Alias for the new entry
    /// * `password` - Password sealing the bundle
    ///
    /// # Returns
    ///
    /// The generated bundle, or a `Crypto` error for an invalid or
    /// unsupported spec
    pub fn create_key_set(&mut self, spec: &KeySetSpec, alias: &str, password: &Password) -> KeyStoreResult<KeySet> {
        ensure_usable(spec, self.store.factory())?;
        let keys = spec
            .steps
            .iter()
            .map(|step| self.store.factory().generate_key(step))
            .collect::<KeyStoreResult<Vec<_>>>()?;
        let key_set = KeySet::new(spec.clone(), keys)?;
        self.store.set(alias, Entry::KeySet(key_set.clone()), Some(password))?;
        log::info!("created key set '{}' ({})", alias, spec);
        Ok(key_set)
    }

    /// Generate a single symmetric key and store it under `alias`
    pub fn create_key(&mut self, spec: &KeySpec, alias: &str, password: &Password) -> KeyStoreResult<SymmetricKey> {
        ensure_usable(spec, self.store.factory())?;
        let key = SymmetricKey::new(*spec, self.store.factory().generate_key(spec)?)?;
        self.store.set(alias, Entry::Key(key.clone()), Some(password))?;
        log::info!("created key '{}' ({})", alias, spec);
        Ok(key)
    }

    /// Generate a key pair with a self-signed certificate (issuer ==
    /// subject) carrying certificate-signing usage. The resulting chain has
    /// length one; this is the only operation producing a trust anchor.
    pub fn create_root_key_pair(
        &mut self,
        spec: &KeyPairSpec,
        subject: Name,
        alias: &str,
        password: &Password,
    ) -> KeyStoreResult<Certificate> {
        ensure_usable(spec, self.store.factory())?;
        if !spec.can_sign() {
            return Err(KeyStoreError::crypto(
                &format!("{} keys cannot self-sign a root certificate", spec),
                error_codes::SIGNER_NOT_AUTHORIZED,
            )
            .with_context(ErrorContext::Spec((*spec).into())));
        }

        let key_pair = KeyPair::from(self.store.factory().generate_key_pair(spec)?);
        let tbs = TbsCertificate::new(
            subject.clone(),
            subject,
            key_pair.public_key(),
            KeyUsage::CERTIFICATE_SIGNING,
            self.store.config().root_validity_days,
        )?;
        let certificate = Certificate::sign(
            tbs,
            key_pair.spec(),
            key_pair.private_key().as_bytes(),
            self.store.factory(),
        )?;
        let entry = KeyPairEntry::new(key_pair, CertificateChain::from_root(certificate.clone()));
        self.store.set(alias, Entry::KeyPair(entry), Some(password))?;
        log::info!(
            "created root key pair '{}' for {} (key {})",
            alias,
            certificate.subject(),
            certificate.public_key().fingerprint()
        );
        Ok(certificate)
    }

    /// Generate a key pair certified by `signer`.
    ///
    /// The new certificate is prepended to a copy of the signer's chain. The
    /// signer must hold certificate-signing usage (`Crypto` otherwise); a
    /// wrong signer password is a `Security` error.
    pub fn create_key_pair(
        &mut self,
        spec: &KeyPairSpec,
        subject: Name,
        usage: KeyUsage,
        signer: &Credential<'_>,
        alias: &str,
        password: &Password,
    ) -> KeyStoreResult<Certificate> {
        ensure_usable(spec, self.store.factory())?;
        let signer_entry = self.store.get_key_pair_entry(signer.alias, signer.password)?;

        let key_pair = KeyPair::from(self.store.factory().generate_key_pair(spec)?);
        let chain = issue_certificate(
            self.store.factory(),
            &signer_entry,
            subject,
            key_pair.public_key(),
            usage,
            self.store.config().certificate_validity_days,
        )?;
        let certificate = chain.leaf().clone();
        self.store
            .set(alias, Entry::KeyPair(KeyPairEntry::new(key_pair, chain)), Some(password))?;
        log::info!("created key pair '{}' signed by '{}'", alias, signer.alias);
        Ok(certificate)
    }

    /// Re-issue a certificate for the key pair of `existing` with a different
    /// usage, signed by `signer`, and store the pair under `alias`.
    ///
    /// The key material is reused; only the certificate changes. The new
    /// entry is sealed under `password`.
    pub fn create_alternate(
        &mut self,
        existing: &Credential<'_>,
        usage: KeyUsage,
        signer: &Credential<'_>,
        alias: &str,
        password: &Password,
    ) -> KeyStoreResult<Certificate> {
        let existing_entry = self.store.get_key_pair_entry(existing.alias, existing.password)?;
        let signer_entry = self.store.get_key_pair_entry(signer.alias, signer.password)?;

        let key_pair = existing_entry.key_pair;
        let chain = issue_certificate(
            self.store.factory(),
            &signer_entry,
            existing_entry.chain.leaf().subject().clone(),
            key_pair.public_key(),
            usage,
            self.store.config().certificate_validity_days,
        )?;
        let certificate = chain.leaf().clone();
        self.store
            .set(alias, Entry::KeyPair(KeyPairEntry::new(key_pair, chain)), Some(password))?;
        log::info!(
            "created alternate '{}' of '{}' with usage {}",
            alias,
            existing.alias,
            usage
        );
        Ok(certificate)
    }
}
