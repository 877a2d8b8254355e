// Integration tests for the persisted key-store container

use std::io::Cursor;

use qasa_keystore::container::password::minimal_params;
use qasa_keystore::error::error_codes;
use qasa_keystore::prelude::*;
use qasa_keystore::spec::{DigestAlgorithm, EcCurve};

fn config() -> KeyStoreConfig {
    KeyStoreConfig {
        kdf: minimal_params(),
        ..KeyStoreConfig::default()
    }
}

// One entry of every kind, all sealed under `password`
fn populated(password: &Password) -> KeyStore {
    let mut store = KeyStore::new(config());
    let mut manager = KeyStoreManager::new(&mut store);
    manager
        .create_root_key_pair(&KeyPairSpec::Ed25519, Name::new("Root CA"), "root", password)
        .unwrap();
    manager
        .create_key_pair(
            &KeyPairSpec::Ecdsa {
                curve: EcCurve::P256,
                digest: DigestSpec::new(DigestAlgorithm::Sha256),
            },
            Name::new("server").with_organization("Example").with_country("NL"),
            KeyUsage::DIGITAL_SIGNATURE | KeyUsage::KEY_ENCIPHERMENT,
            &Credential::new("root", password),
            "server",
            password,
        )
        .unwrap();
    manager
        .create_key(&KeySpec::Encryption(EncryptionSpec::aes256_gcm()), "session", password)
        .unwrap();
    manager
        .create_key_set(
            &KeySetSpec::new(vec![
                KeySetStep::Encryption(EncryptionSpec::chacha20_poly1305()),
                KeySetStep::Mac(MacSpec::hmac_sha256()),
            ]),
            "bundle",
            password,
        )
        .unwrap();
    let root = store.get_certificate("root").unwrap();
    store.set("trusted-root", Entry::Certificate(root), None).unwrap();
    store
}

#[test]
fn test_every_entry_kind_survives_a_round_trip() {
    let password = Password::new("entry");
    let outer = Password::new("outer");
    let store = populated(&password);

    let mut bytes = Vec::new();
    store.store_to_writer(&mut bytes, &outer).unwrap();
    let mut loaded = KeyStore::new(config());
    loaded.load_from_reader(&mut Cursor::new(bytes), &outer).unwrap();

    assert_eq!(loaded.size(), 5);
    assert_eq!(loaded.list_aliases(), store.list_aliases());
    for alias in store.list_aliases() {
        assert_eq!(loaded.entry_kind(&alias), store.entry_kind(&alias));
        assert_eq!(loaded.creation_date(&alias), store.creation_date(&alias));
    }
    assert_eq!(
        loaded.get_key_pair("server", &password).unwrap(),
        store.get_key_pair("server", &password).unwrap()
    );
    assert_eq!(
        loaded.get_key("session", &password).unwrap(),
        store.get_key("session", &password).unwrap()
    );
    assert_eq!(loaded.get_certificate_chain("server").unwrap().len(), 2);
    assert_eq!(
        loaded.get_certificate_alias(&store.get_certificate("root").unwrap()),
        Some("root".to_string())
    );

    let set = loaded.get_key_set("bundle", &password).unwrap();
    let sealed = set.seal(loaded.factory(), b"payload", b"context").unwrap();
    assert_eq!(set.open(loaded.factory(), &sealed, b"context").unwrap().as_bytes(), b"payload");
}

#[test]
fn test_wrong_container_password_leaves_store_unchanged() {
    let password = Password::new("entry");
    let mut bytes = Vec::new();
    populated(&password)
        .store_to_writer(&mut bytes, &Password::new("outer"))
        .unwrap();

    let mut target = KeyStore::new(config());
    target
        .set(
            "keep",
            Entry::Key(SymmetricKey::new(
                KeySpec::Mac(MacSpec::hmac_sha256()),
                SecureBytes::new(&[9u8; 32]),
            )
            .unwrap()),
            Some(&password),
        )
        .unwrap();

    let err = target
        .load_from_reader(&mut Cursor::new(&bytes), &Password::new("wrong"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Security);
    assert_eq!(target.list_aliases(), vec!["keep".to_string()]);
}

#[test]
fn test_tampering_is_detected_before_records_are_trusted() {
    let outer = Password::new("outer");
    let mut bytes = Vec::new();
    populated(&Password::new("entry"))
        .store_to_writer(&mut bytes, &outer)
        .unwrap();

    let middle = bytes.len() / 2;
    let mut flipped = bytes.clone();
    flipped[middle] ^= 0x01;
    let err = KeyStore::new(config())
        .load_from_reader(&mut Cursor::new(flipped), &outer)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Security);
    assert_eq!(err.error_code(), error_codes::INTEGRITY_CHECK_FAILED);

    let truncated = bytes[..bytes.len() - 1].to_vec();
    assert!(KeyStore::new(config())
        .load_from_reader(&mut Cursor::new(truncated), &outer)
        .is_err());

    assert_eq!(
        KeyStore::new(config())
            .load_from_reader(&mut Cursor::new(b"not a key-store".to_vec()), &outer)
            .unwrap_err()
            .kind(),
        ErrorKind::Data
    );
}

#[test]
fn test_file_round_trip_and_password_change() {
    let password = Password::new("entry");
    let outer = Password::new("outer");
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keystore.qks");

    let mut store = populated(&password);
    let new_password = Password::new("rotated");
    store
        .change_entry_password("session", &password, &new_password)
        .unwrap();
    store.store_to_file(&path, &outer).unwrap();

    let loaded = KeyStore::open(&path, &outer, config()).unwrap();
    assert!(loaded.get_key("session", &password).is_err());
    assert_eq!(
        loaded.get_key("session", &new_password).unwrap(),
        store.get_key("session", &new_password).unwrap()
    );
}

#[test]
fn test_delete_and_overwrite() {
    let password = Password::new("entry");
    let mut store = populated(&password);

    assert!(store.delete("trusted-root"));
    assert!(!store.delete("trusted-root"));
    assert!(!store.contains_alias("trusted-root"));

    let key = SymmetricKey::new(
        KeySpec::Encryption(EncryptionSpec::xchacha20_poly1305()),
        SecureBytes::new(&[3u8; 32]),
    )
    .unwrap();
    store.set("bundle", Entry::Key(key.clone()), Some(&password)).unwrap();
    assert!(store.is_key_entry("bundle"));
    assert_eq!(store.get_key("bundle", &password).unwrap(), key);
    assert_eq!(store.size(), 4);
}
