/*!
 * Certificate & Chain Model
 *
 * A [`Certificate`] binds a subject [`Name`] to a [`PublicKey`] and a
 * [`KeyUsage`] bit-set, and carries the issuer's signature over those
 * fields. A [`CertificateChain`] is the ordered sequence `[leaf, ..., root]`
 * ending in a self-signed trust anchor.
 *
 * This is deliberately not a general X.509 implementation: certificates are
 * encoded with the key-store's own canonical binary encoding and the chain
 * rules are the three checks of [`CertificateChain::validate`].
 */

mod certificate;
mod chain;
mod name;
mod usage;


pub use certificate::{Certificate, PublicKey, TbsCertificate, CERTIFICATE_VERSION};
pub use chain::CertificateChain;
pub use name::Name;
pub use usage::KeyUsage;

/// Largest encoded certificate accepted from a stream
pub const MAX_CERTIFICATE_SIZE: u64 = 64 * 1024;

/// Largest chain accepted from a stream
pub const MAX_CHAIN_LENGTH: usize = 16;
