use super::*;
use crate::certificate::{KeyUsage, Name};
use crate::config::KeyStoreConfig;
use crate::container::password::minimal_params;
use crate::error::{error_codes, ErrorKind};
use crate::keystore::KeyStore;
use crate::secure_memory::Password;
use crate::spec::{
    AlgorithmSpec, DigestAlgorithm, DigestSpec, EcCurve, EncryptionSpec, KeyPairSpec, KeySetSpec, KeySetStep,
    KeySpec, MacSpec,
};

fn test_store(restricted: bool) -> KeyStore {
    KeyStore::new(KeyStoreConfig {
        kdf: minimal_params(),
        restricted_factory: restricted,
        ..KeyStoreConfig::default()
    })
}

/// root (Ed25519, cert-signing) and leaf (P-256, digital-signature) signed by it
fn root_and_leaf(store: &mut KeyStore, password: &Password) {
    let mut manager = KeyStoreManager::new(store);
    manager
        .create_root_key_pair(&KeyPairSpec::Ed25519, Name::new("Root CA"), "root", password)
        .unwrap();
    manager
        .create_key_pair(
            &KeyPairSpec::ecdsa_p256(),
            Name::new("leaf"),
            KeyUsage::DIGITAL_SIGNATURE,
            &Credential::new("root", password),
            "leaf",
            password,
        )
        .unwrap();
}

#[test]
fn test_create_key_and_key_set() {
    let mut store = test_store(false);
    let password = Password::new("pw");
    let mut manager = KeyStoreManager::new(&mut store);

    let key_spec = KeySpec::Mac(MacSpec::hmac_sha512());
    let key = manager.create_key(&key_spec, "mac", &password).unwrap();
    assert_eq!(key.material().len(), 64);

    let set_spec = KeySetSpec::new(vec![
        KeySetStep::Encryption(EncryptionSpec::xchacha20_poly1305()),
        KeySetStep::Mac(MacSpec::blake3_keyed()),
    ]);
    let set = manager.create_key_set(&set_spec, "bundle", &password).unwrap();
    assert_eq!(set.keys().len(), 2);

    assert!(store.is_key_entry("mac"));
    assert!(store.is_key_set_entry("bundle"));
    assert_eq!(store.get_key_set("bundle", &password).unwrap(), set);
}

#[test]
fn test_invalid_or_unsupported_spec_stores_nothing() {
    let mut store = test_store(true);
    let password = Password::new("pw");
    let mut manager = KeyStoreManager::new(&mut store);

    let invalid = KeySetSpec::new(vec![KeySetStep::Mac(MacSpec::hmac_sha256())]);
    assert!(!invalid.is_valid());
    let err = manager.create_key_set(&invalid, "bad", &password).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Crypto);
    assert_eq!(err.error_code(), error_codes::INVALID_SPEC);

    // valid, but the restricted factory refuses digests above 256 bits
    let long_mac = KeySpec::Mac(MacSpec::hmac_sha512());
    let err = manager.create_key(&long_mac, "long", &password).unwrap_err();
    assert_eq!(err.error_code(), error_codes::UNSUPPORTED_SPEC);

    let p384 = KeyPairSpec::Ecdsa {
        curve: EcCurve::P384,
        digest: DigestSpec::new(DigestAlgorithm::Sha384),
    };
    let err = manager
        .create_root_key_pair(&p384, Name::new("Root"), "root", &password)
        .unwrap_err();
    assert_eq!(err.error_code(), error_codes::UNSUPPORTED_SPEC);

    assert_eq!(store.size(), 0);
}

#[test]
fn test_root_and_leaf_chain() {
    let mut store = test_store(false);
    let password = Password::new("pw");
    root_and_leaf(&mut store, &password);

    let root_chain = store.get_certificate_chain("root").unwrap();
    assert_eq!(root_chain.len(), 1);
    assert!(root_chain.leaf().is_self_signed());
    assert!(root_chain.leaf().usage().contains(KeyUsage::CERTIFICATE_SIGNING));

    let chain = store.get_certificate_chain("leaf").unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain.leaf().subject(), &Name::new("leaf"));
    assert_eq!(chain.leaf().issuer(), &Name::new("Root CA"));
    assert_eq!(chain.leaf().usage(), KeyUsage::DIGITAL_SIGNATURE);
    assert!(chain.get(1).unwrap().is_self_signed());
    assert_eq!(chain.get(1), store.get_certificate("root").as_ref());
    chain.validate(store.factory()).unwrap();
}

#[test]
fn test_x25519_cannot_be_a_root() {
    let mut store = test_store(false);
    let err = KeyStoreManager::new(&mut store)
        .create_root_key_pair(&KeyPairSpec::X25519, Name::new("Root"), "root", &Password::new("pw"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Crypto);
    assert!(store.is_empty());
}

#[test]
fn test_signer_without_cert_signing_usage() {
    let mut store = test_store(false);
    let password = Password::new("pw");
    root_and_leaf(&mut store, &password);

    let err = KeyStoreManager::new(&mut store)
        .create_key_pair(
            &KeyPairSpec::Ed25519,
            Name::new("grandchild"),
            KeyUsage::DIGITAL_SIGNATURE,
            &Credential::new("leaf", &password),
            "grandchild",
            &password,
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Crypto);
    assert_eq!(err.error_code(), error_codes::SIGNER_NOT_AUTHORIZED);
    assert!(!store.contains_alias("grandchild"));
}

#[test]
fn test_wrong_signer_password() {
    let mut store = test_store(false);
    let password = Password::new("pw");
    root_and_leaf(&mut store, &password);
    let size = store.size();

    let err = KeyStoreManager::new(&mut store)
        .create_key_pair(
            &KeyPairSpec::Ed25519,
            Name::new("other"),
            KeyUsage::DIGITAL_SIGNATURE,
            &Credential::new("root", &Password::new("wrong")),
            "other",
            &password,
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Security);
    assert_eq!(store.size(), size);
}

#[test]
fn test_intermediate_signer() {
    let mut store = test_store(false);
    let password = Password::new("pw");
    let mut manager = KeyStoreManager::new(&mut store);
    manager
        .create_root_key_pair(&KeyPairSpec::ecdsa_p384(), Name::new("Root"), "root", &password)
        .unwrap();
    manager
        .create_key_pair(
            &KeyPairSpec::Ed25519,
            Name::new("Intermediate"),
            KeyUsage::CERTIFICATE_SIGNING,
            &Credential::new("root", &password),
            "intermediate",
            &password,
        )
        .unwrap();
    manager
        .create_key_pair(
            &KeyPairSpec::X25519,
            Name::new("device"),
            KeyUsage::KEY_AGREEMENT,
            &Credential::new("intermediate", &password),
            "device",
            &password,
        )
        .unwrap();

    let chain = store.get_certificate_chain("device").unwrap();
    assert_eq!(chain.len(), 3);
    chain.validate(store.factory()).unwrap();
}

#[test]
fn test_create_alternate_reuses_key_material() {
    let mut store = test_store(false);
    let password = Password::new("pw");
    root_and_leaf(&mut store, &password);

    let alt_password = Password::new("alt");
    let certificate = KeyStoreManager::new(&mut store)
        .create_alternate(
            &Credential::new("leaf", &password),
            KeyUsage::KEY_AGREEMENT,
            &Credential::new("root", &password),
            "leaf-ka",
            &alt_password,
        )
        .unwrap();

    let leaf = store.get_certificate("leaf").unwrap();
    let alternate = store.get_certificate("leaf-ka").unwrap();
    assert_eq!(alternate, certificate);
    assert_ne!(alternate, leaf);
    assert_eq!(alternate.public_key(), leaf.public_key());
    assert_eq!(alternate.subject(), leaf.subject());
    assert_eq!(alternate.usage(), KeyUsage::KEY_AGREEMENT);

    let original = store.get_key_pair("leaf", &password).unwrap();
    let reissued = store.get_key_pair("leaf-ka", &alt_password).unwrap();
    assert_eq!(original, reissued);
    assert!(store.get_key_pair("leaf-ka", &password).is_err());
}

#[test]
fn test_out_of_range_validity_stores_nothing() {
    let mut store = KeyStore::new(KeyStoreConfig {
        kdf: minimal_params(),
        root_validity_days: 4_000_000_000,
        ..KeyStoreConfig::default()
    });
    let password = Password::new("pw");
    let err = KeyStoreManager::new(&mut store)
        .create_root_key_pair(&KeyPairSpec::Ed25519, Name::new("Root CA"), "root", &password)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Crypto);
    assert_eq!(err.error_code(), error_codes::INVALID_VALIDITY);
    assert!(store.is_empty());

    let mut store = KeyStore::new(KeyStoreConfig {
        kdf: minimal_params(),
        certificate_validity_days: u32::MAX,
        ..KeyStoreConfig::default()
    });
    KeyStoreManager::new(&mut store)
        .create_root_key_pair(&KeyPairSpec::Ed25519, Name::new("Root CA"), "root", &password)
        .unwrap();
    let err = KeyStoreManager::new(&mut store)
        .create_key_pair(
            &KeyPairSpec::Ed25519,
            Name::new("leaf"),
            KeyUsage::DIGITAL_SIGNATURE,
            &Credential::new("root", &password),
            "leaf",
            &password,
        )
        .unwrap_err();
    assert_eq!(err.error_code(), error_codes::INVALID_VALIDITY);
    assert!(!store.contains_alias("leaf"));
}
