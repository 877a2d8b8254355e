/*!
 * KeyStore Manager
 *
 * Orchestration on top of the entry store: creating key bundles, single
 * keys, self-signed roots, signed key pairs and alternate certificates for
 * existing key pairs.
 *
 * Certificate creation is linear: generate material, attach a signed
 * certificate, store under the alias. Nothing is persisted until the last
 * step, so a failing operation leaves the store untouched.
 */

mod manager;

#[cfg(test)]
mod tests;

pub use manager::{Credential, KeyStoreManager};

pub(crate) use manager::issue_certificate;
