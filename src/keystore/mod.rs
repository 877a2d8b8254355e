/*!
 * Entry Store
 *
 * The persistent alias → entry map at the heart of the key-store. An entry
 * is one of four variants ([`Entry`]): a bare certificate, a key pair with
 * its certificate chain, a single symmetric key, or a symmetric key bundle.
 *
 * Invariants of a [`KeyStore`]:
 *
 * - aliases are unique and case-sensitive; `set` on an existing alias replaces it
 * - every key-pair entry carries a chain that validates and certifies its key
 * - secret material only exists in the store inside a sealed envelope
 * - loading is all-or-nothing: a corrupt container never yields a partial store
 */

mod codec;
mod entry;
mod store;


pub use codec::{FORMAT_VERSION, MAGIC, MAX_ALIAS_LENGTH, MAX_CONTAINER_SIZE};
pub use entry::{Entry, EntryKind, KeyPair, KeyPairEntry, KeySet, SymmetricKey};
pub use store::KeyStore;
