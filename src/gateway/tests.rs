use std::io::Cursor;

use super::*;
use crate::certificate::{KeyUsage, Name, PublicKey};
use crate::config::KeyStoreConfig;
use crate::container::password::minimal_params;
use crate::error::{error_codes, ErrorKind};
use crate::factory::{CryptoFactory, DefaultFactory};
use crate::keystore::{Entry, EntryKind, KeyStore, SymmetricKey};
use crate::manager::{Credential, KeyStoreManager};
use crate::secure_memory::{Password, SecureBytes};
use crate::spec::{EncryptionSpec, KeyPairSpec, KeySpec};

const PASSWORD: &str = "entry password";
const LOCK: &str = "lock password";

fn test_store() -> KeyStore {
    KeyStore::new(KeyStoreConfig {
        kdf: minimal_params(),
        ..KeyStoreConfig::default()
    })
}

/// Store holding a self-signed Ed25519 root under "ca"
fn authority_store() -> KeyStore {
    let mut store = test_store();
    KeyStoreManager::new(&mut store)
        .create_root_key_pair(&KeyPairSpec::Ed25519, Name::new("Root CA"), "ca", &Password::new(PASSWORD))
        .unwrap();
    store
}

/// Store holding a self-signed P-256 pair under "device", waiting to be certified
fn requester_store() -> KeyStore {
    let mut store = test_store();
    KeyStoreManager::new(&mut store)
        .create_root_key_pair(
            &KeyPairSpec::ecdsa_p256(),
            Name::new("device").with_organization("Example"),
            "device",
            &Password::new(PASSWORD),
        )
        .unwrap();
    store
}

fn gateway(store: &mut KeyStore) -> KeyStoreGateway<'_> {
    KeyStoreGateway::new(store).with_password_resolver(|_| Some(Password::new(PASSWORD)))
}

fn shared_secret(authority: &Name) -> Option<SecureBytes> {
    (authority.common_name() == "Root CA").then(|| SecureBytes::new(b"shared out of band"))
}

#[test]
fn test_full_certificate_exchange() {
    let mut ca_store = authority_store();
    let mut device_store = requester_store();
    let mut ca = gateway(&mut ca_store).with_certifier("ca");
    let mut device = gateway(&mut device_store);

    let mut request = Vec::new();
    let request_id = device.create_certificate_request("device", &mut request).unwrap();
    assert_eq!(device.state(), GatewayState::RequestSent);
    assert_eq!(device.pending_alias(), Some("device"));

    let sent = read_message(&mut Cursor::new(&request)).unwrap();
    match &sent.message {
        CsrMessage::Request(req) => {
            assert_eq!(req.request_id, request_id);
            assert!(req.proof_of_possession.is_some());
        }
        other => panic!("unexpected message {:?}", other),
    }
    assert!(!sent.is_tagged());

    let mut response = Vec::new();
    let correlation_id = ca
        .process_certificate_request(&mut Cursor::new(request), &mut response)
        .unwrap();
    assert_eq!(ca.state(), GatewayState::Idle);

    let mut ack = Vec::new();
    let received_id = device
        .process_certificate_response(&mut Cursor::new(response), &mut ack)
        .unwrap();
    assert_eq!(received_id, correlation_id);
    assert_eq!(device.state(), GatewayState::Idle);
    assert_eq!(device.pending_alias(), None);

    assert_eq!(ca.process_certificate_ack(&mut Cursor::new(ack)).unwrap(), correlation_id);

    let store = device.store();
    assert!(store.is_key_pair_entry("device"));
    let chain = store.get_certificate_chain("device").unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain.leaf().issuer(), &Name::new("Root CA"));
    assert_eq!(chain.leaf().subject().common_name(), "device");
    chain.validate(store.factory()).unwrap();
}

#[test]
fn test_exchange_with_shared_secret() {
    let mut ca_store = authority_store();
    let mut device_store = requester_store();
    let mut ca = gateway(&mut ca_store)
        .with_certifier("ca")
        .with_mac_secret_resolver(shared_secret);
    let mut device = gateway(&mut device_store)
        .with_request_issuer(Name::new("Root CA"))
        .with_mac_secret_resolver(shared_secret);

    let mut request = Vec::new();
    device.create_certificate_request("device", &mut request).unwrap();
    assert!(read_message(&mut Cursor::new(&request)).unwrap().is_tagged());

    let mut response = Vec::new();
    let correlation_id = ca
        .process_certificate_request(&mut Cursor::new(request), &mut response)
        .unwrap();
    let mut ack = Vec::new();
    device
        .process_certificate_response(&mut Cursor::new(response), &mut ack)
        .unwrap();
    assert_eq!(ca.process_certificate_ack(&mut Cursor::new(ack)).unwrap(), correlation_id);
}

#[test]
fn test_stale_response_rejected() {
    let mut ca_store = authority_store();
    let mut device_store = requester_store();
    let mut ca = gateway(&mut ca_store).with_certifier("ca");
    let mut device = gateway(&mut device_store);

    let mut first = Vec::new();
    device.create_certificate_request("device", &mut first).unwrap();
    let mut stale = Vec::new();
    ca.process_certificate_request(&mut Cursor::new(first), &mut stale)
        .unwrap();

    device.reset();
    device.create_certificate_request("device", &mut Vec::new()).unwrap();
    let err = device
        .process_certificate_response(&mut Cursor::new(stale), &mut Vec::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert_eq!(err.error_code(), error_codes::UNKNOWN_CORRELATION_ID);
    assert_eq!(device.state(), GatewayState::Idle);
    assert_eq!(device.store().get_certificate_chain("device").unwrap().len(), 1);
}

#[test]
fn test_untagged_request_rejected_when_secret_exists() {
    let mut ca_store = authority_store();
    let mut device_store = requester_store();
    let mut ca = gateway(&mut ca_store)
        .with_certifier("ca")
        .with_mac_secret_resolver(shared_secret);
    let mut device = gateway(&mut device_store);

    let mut request = Vec::new();
    device.create_certificate_request("device", &mut request).unwrap();
    let err = ca
        .process_certificate_request(&mut Cursor::new(request), &mut Vec::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Security);
    assert_eq!(err.error_code(), error_codes::MAC_MISMATCH);
}

#[test]
fn test_request_addressed_to_other_authority() {
    let mut ca_store = authority_store();
    let mut device_store = requester_store();
    let mut ca = gateway(&mut ca_store).with_certifier("ca");
    let mut device = gateway(&mut device_store).with_request_issuer(Name::new("Other CA"));

    let mut request = Vec::new();
    device.create_certificate_request("device", &mut request).unwrap();
    let err = ca
        .process_certificate_request(&mut Cursor::new(request), &mut Vec::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
}

#[test]
fn test_operations_in_wrong_state() {
    let mut device_store = requester_store();
    let mut device = gateway(&mut device_store);

    let err = device
        .process_certificate_response(&mut Cursor::new(Vec::new()), &mut Vec::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert_eq!(err.error_code(), error_codes::UNEXPECTED_STATE);

    device.create_certificate_request("device", &mut Vec::new()).unwrap();
    let err = device
        .create_certificate_request("device", &mut Vec::new())
        .unwrap_err();
    assert_eq!(err.error_code(), error_codes::UNEXPECTED_STATE);
    // failures drop the pending request
    assert_eq!(device.state(), GatewayState::Idle);
    assert_eq!(device.pending_alias(), None);
}

#[test]
fn test_request_for_non_key_pair() {
    let mut store = test_store();
    let key = SymmetricKey::new(
        KeySpec::Encryption(EncryptionSpec::aes256_gcm()),
        SecureBytes::new(&[7u8; 32]),
    )
    .unwrap();
    store
        .set("key", Entry::Key(key), Some(&Password::new(PASSWORD)))
        .unwrap();
    let mut gw = gateway(&mut store);

    let err = gw.create_certificate_request("key", &mut Vec::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Data);
    assert_eq!(err.error_code(), error_codes::WRONG_ENTRY_KIND);

    let err = gw.create_certificate_request("missing", &mut Vec::new()).unwrap_err();
    assert_eq!(err.error_code(), error_codes::ENTRY_NOT_FOUND);
    assert_eq!(gw.state(), GatewayState::Idle);
}

#[test]
fn test_response_for_other_key_leaves_store_untouched() {
    let mut ca_store = authority_store();
    let mut device_store = requester_store();
    let original_chain = device_store.get_certificate_chain("device").unwrap();
    let mut ca = gateway(&mut ca_store).with_certifier("ca");
    let mut device = gateway(&mut device_store);

    let mut request = Vec::new();
    device.create_certificate_request("device", &mut request).unwrap();

    // swap in a different public key on the way to the authority
    let mut forged = match read_message(&mut Cursor::new(request)).unwrap().message {
        CsrMessage::Request(req) => req,
        other => panic!("unexpected message {:?}", other),
    };
    let other = DefaultFactory::new().generate_key_pair(&KeyPairSpec::Ed25519).unwrap();
    forged.public_key = PublicKey::new(other.spec, other.public_key);
    forged.proof_of_possession = None;
    let mut forged_bytes = Vec::new();
    write_message(&mut forged_bytes, &CsrMessage::Request(forged), None).unwrap();

    let mut response = Vec::new();
    ca.process_certificate_request(&mut Cursor::new(forged_bytes), &mut response)
        .unwrap();
    let mut ack = Vec::new();
    let err = device
        .process_certificate_response(&mut Cursor::new(response), &mut ack)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert_eq!(err.error_code(), error_codes::PUBLIC_KEY_MISMATCH);
    assert!(ack.is_empty());
    assert_eq!(device.state(), GatewayState::Idle);
    assert_eq!(device.store().get_certificate_chain("device").unwrap(), original_chain);
}

#[test]
fn test_forged_proof_of_possession() {
    let mut ca_store = authority_store();
    let mut device_store = requester_store();
    let mut ca = gateway(&mut ca_store).with_certifier("ca");
    let mut device = gateway(&mut device_store);

    let mut request = Vec::new();
    device.create_certificate_request("device", &mut request).unwrap();
    let mut forged = match read_message(&mut Cursor::new(request)).unwrap().message {
        CsrMessage::Request(req) => req,
        other => panic!("unexpected message {:?}", other),
    };
    forged.usage = KeyUsage::CERTIFICATE_SIGNING | KeyUsage::DIGITAL_SIGNATURE;
    let mut forged_bytes = Vec::new();
    write_message(&mut forged_bytes, &CsrMessage::Request(forged), None).unwrap();

    let err = ca
        .process_certificate_request(&mut Cursor::new(forged_bytes), &mut Vec::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Security);
    assert_eq!(err.error_code(), error_codes::SIGNATURE_INVALID);
}

#[test]
fn test_malformed_message() {
    let mut ca_store = authority_store();
    let mut ca = gateway(&mut ca_store).with_certifier("ca");

    let err = ca
        .process_certificate_request(&mut Cursor::new(b"QCSR\x01garbage".to_vec()), &mut Vec::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert_eq!(err.error_code(), error_codes::MALFORMED_MESSAGE);

    let err = ca
        .process_certificate_request(&mut Cursor::new(Vec::new()), &mut Vec::new())
        .unwrap_err();
    assert_eq!(err.error_code(), error_codes::MALFORMED_MESSAGE);
}

#[test]
fn test_ack_where_request_expected() {
    let mut ca_store = authority_store();
    let mut ca = gateway(&mut ca_store).with_certifier("ca");
    let mut ack = Vec::new();
    write_message(
        &mut ack,
        &CsrMessage::Ack(CertificateAck {
            correlation_id: uuid::Uuid::new_v4(),
        }),
        None,
    )
    .unwrap();

    let err = ca
        .process_certificate_request(&mut Cursor::new(ack), &mut Vec::new())
        .unwrap_err();
    assert_eq!(err.error_code(), error_codes::UNEXPECTED_MESSAGE);
}

#[test]
fn test_no_certifier() {
    let mut ca_store = authority_store();
    let mut device_store = requester_store();
    let mut ca = gateway(&mut ca_store);
    let mut device = gateway(&mut device_store);

    let mut request = Vec::new();
    device.create_certificate_request("device", &mut request).unwrap();
    let err = ca
        .process_certificate_request(&mut Cursor::new(request), &mut Vec::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert_eq!(err.error_code(), error_codes::NO_CERTIFIER);
}

#[test]
fn test_certifier_without_signing_usage() {
    let mut ca_store = authority_store();
    let password = Password::new(PASSWORD);
    KeyStoreManager::new(&mut ca_store)
        .create_key_pair(
            &KeyPairSpec::Ed25519,
            Name::new("signer"),
            KeyUsage::DIGITAL_SIGNATURE,
            &Credential::new("ca", &password),
            "signer",
            &password,
        )
        .unwrap();
    let mut device_store = requester_store();
    let mut ca = gateway(&mut ca_store).with_certifier("signer");
    let mut device = gateway(&mut device_store);

    let mut request = Vec::new();
    device.create_certificate_request("device", &mut request).unwrap();
    let err = ca
        .process_certificate_request(&mut Cursor::new(request), &mut Vec::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Crypto);
    assert_eq!(err.error_code(), error_codes::SIGNER_NOT_AUTHORIZED);
}

#[test]
fn test_locked_key_pair_export_import() {
    let mut source = authority_store();
    let source_pair = source.get_key_pair("ca", &Password::new(PASSWORD)).unwrap();
    let created = source.creation_date("ca").unwrap();

    let mut exported = Vec::new();
    gateway(&mut source)
        .with_lock_resolver(|prompt| match prompt {
            LockPrompt::Lock { alias, kind } => {
                assert_eq!(alias, "ca");
                assert_eq!(kind, EntryKind::KeyPair);
                Some(Password::new(LOCK))
            }
            LockPrompt::Unlock { .. } => None,
        })
        .export_entry("ca", &mut exported)
        .unwrap();
    assert_eq!(&exported[..4], EXPORT_MAGIC);
    assert_eq!(exported[6], 1);

    let mut target = test_store();
    let alias = KeyStoreGateway::new(&mut target)
        .with_password_resolver(|_| Some(Password::new("new password")))
        .with_lock_resolver(|prompt| match prompt {
            LockPrompt::Unlock { kind } if kind == EntryKind::KeyPair => Some(Password::new(LOCK)),
            _ => None,
        })
        .import_entry(&mut Cursor::new(exported))
        .unwrap();

    assert_eq!(alias, "ca");
    assert_eq!(target.creation_date("ca"), Some(created));
    let imported = target.get_key_pair("ca", &Password::new("new password")).unwrap();
    assert_eq!(imported, source_pair);
    assert!(target.get_key_pair("ca", &Password::new(PASSWORD)).is_err());
}

#[test]
fn test_secret_export_needs_lock() {
    let mut source = authority_store();

    let err = gateway(&mut source)
        .export_entry("ca", &mut Vec::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Security);
    assert_eq!(err.error_code(), error_codes::UNLOCK_REFUSED);

    let err = gateway(&mut source)
        .with_lock_resolver(|_| None)
        .export_entry("ca", &mut Vec::new())
        .unwrap_err();
    assert_eq!(err.error_code(), error_codes::UNLOCK_REFUSED);
}

#[test]
fn test_import_with_wrong_or_refused_unlock() {
    let mut source = authority_store();
    let mut exported = Vec::new();
    gateway(&mut source)
        .with_lock_resolver(|_| Some(Password::new(LOCK)))
        .export_entry("ca", &mut exported)
        .unwrap();

    let mut target = test_store();
    let err = gateway(&mut target)
        .with_lock_resolver(|_| Some(Password::new("not the lock")))
        .import_entry(&mut Cursor::new(exported.clone()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Security);
    assert_eq!(err.error_code(), error_codes::WRONG_PASSWORD);

    let err = gateway(&mut target)
        .import_entry(&mut Cursor::new(exported))
        .unwrap_err();
    assert_eq!(err.error_code(), error_codes::UNLOCK_REFUSED);
    assert!(target.is_empty());
}

#[test]
fn test_unlocked_certificate_export() {
    let mut source = authority_store();
    let certificate = source.get_certificate("ca").unwrap();
    source
        .set("root-cert", Entry::Certificate(certificate.clone()), None)
        .unwrap();

    let mut exported = Vec::new();
    KeyStoreGateway::new(&mut source)
        .export_entry("root-cert", &mut exported)
        .unwrap();
    assert_eq!(exported[5], EntryKind::Certificate.tag());
    assert_eq!(exported[6], 0);

    let mut target = test_store();
    let alias = KeyStoreGateway::new(&mut target)
        .import_entry(&mut Cursor::new(exported))
        .unwrap();
    assert_eq!(alias, "root-cert");
    assert_eq!(target.get_certificate("root-cert"), Some(certificate));
}

#[test]
fn test_import_rejects_malformed_exports() {
    let mut source = authority_store();
    let mut exported = Vec::new();
    gateway(&mut source)
        .with_lock_resolver(|_| Some(Password::new(LOCK)))
        .export_entry("ca", &mut exported)
        .unwrap();
    let mut target = test_store();
    let mut gw = gateway(&mut target).with_lock_resolver(|_| Some(Password::new(LOCK)));

    let mut bad_magic = exported.clone();
    bad_magic[0] ^= 0xff;
    assert_eq!(gw.import_entry(&mut Cursor::new(bad_magic)).unwrap_err().kind(), ErrorKind::Data);

    let mut bad_version = exported.clone();
    bad_version[4] = EXPORT_VERSION + 1;
    let err = gw.import_entry(&mut Cursor::new(bad_version)).unwrap_err();
    assert_eq!(err.error_code(), error_codes::UNSUPPORTED_FORMAT_VERSION);

    // header claims a symmetric key, payload holds a key pair
    let mut wrong_kind = exported.clone();
    wrong_kind[5] = EntryKind::Key.tag();
    assert_eq!(gw.import_entry(&mut Cursor::new(wrong_kind)).unwrap_err().kind(), ErrorKind::Data);

    // a secret entry claiming to be unlocked
    let mut unlocked = exported.clone();
    unlocked[6] = 0;
    assert_eq!(gw.import_entry(&mut Cursor::new(unlocked)).unwrap_err().kind(), ErrorKind::Data);

    let truncated = exported[..exported.len() - 10].to_vec();
    assert_eq!(gw.import_entry(&mut Cursor::new(truncated)).unwrap_err().kind(), ErrorKind::Data);

    assert!(gw.store().is_empty());
}

#[test]
fn test_certificate_batch() {
    let mut source = authority_store();
    let password = Password::new(PASSWORD);
    KeyStoreManager::new(&mut source)
        .create_key_pair(
            &KeyPairSpec::ecdsa_p256(),
            Name::new("leaf"),
            KeyUsage::DIGITAL_SIGNATURE,
            &Credential::new("ca", &password),
            "leaf",
            &password,
        )
        .unwrap();

    let mut batch = Vec::new();
    let written = KeyStoreGateway::new(&mut source)
        .export_certificates(&["ca", "leaf"], &mut batch)
        .unwrap();
    assert_eq!(written, 2);

    let mut target = test_store();
    let placeholder = SymmetricKey::new(
        KeySpec::Encryption(EncryptionSpec::aes256_gcm()),
        SecureBytes::new(&[1u8; 32]),
    )
    .unwrap();
    target
        .set("Root CA", Entry::Key(placeholder), Some(&password))
        .unwrap();

    let mut gw = KeyStoreGateway::new(&mut target);
    let aliases = gw.import_certificates(&mut Cursor::new(batch.clone())).unwrap();
    assert_eq!(aliases, vec!["Root CA-2".to_string(), "leaf".to_string()]);

    // already known certificates keep their aliases
    let again = gw.import_certificates(&mut Cursor::new(batch)).unwrap();
    assert_eq!(again, aliases);
    assert_eq!(gw.store().size(), 3);
    assert!(gw.store().is_key_entry("Root CA"));
    assert!(gw.store().is_certificate_entry("Root CA-2"));
    assert_eq!(
        gw.store().get_certificate("leaf"),
        source.get_certificate("leaf")
    );
}

#[test]
fn test_certificate_batch_errors() {
    let mut source = authority_store();
    let err = KeyStoreGateway::new(&mut source)
        .export_certificates(&["ca", "missing"], &mut Vec::new())
        .unwrap_err();
    assert_eq!(err.error_code(), error_codes::ENTRY_NOT_FOUND);

    let mut batch = Vec::new();
    KeyStoreGateway::new(&mut source)
        .export_certificates(&["ca"], &mut batch)
        .unwrap();
    batch.truncate(batch.len() - 1);

    let mut target = test_store();
    let err = KeyStoreGateway::new(&mut target)
        .import_certificates(&mut Cursor::new(batch))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Data);
    assert!(target.is_empty());
}

#[test]
fn test_certificate_batch_with_long_multibyte_names() {
    let long_name = "\u{1F600}".repeat(400);
    let password = Password::new(PASSWORD);
    let mut source = test_store();
    let mut manager = KeyStoreManager::new(&mut source);
    manager
        .create_root_key_pair(&KeyPairSpec::Ed25519, Name::new("alpha"), "alpha", &password)
        .unwrap();
    manager
        .create_root_key_pair(&KeyPairSpec::Ed25519, Name::new(&long_name), "wide-1", &password)
        .unwrap();
    manager
        .create_root_key_pair(&KeyPairSpec::Ed25519, Name::new(&long_name), "wide-2", &password)
        .unwrap();

    let mut batch = Vec::new();
    KeyStoreGateway::new(&mut source)
        .export_certificates(&["alpha", "wide-1", "wide-2", "wide-1"], &mut batch)
        .unwrap();

    let mut target = test_store();
    let aliases = KeyStoreGateway::new(&mut target)
        .import_certificates(&mut Cursor::new(batch))
        .unwrap();
    assert_eq!(aliases.len(), 4);
    assert_eq!(aliases[0], "alpha");
    assert!(aliases[1].len() <= crate::keystore::MAX_ALIAS_LENGTH);
    assert!(long_name.starts_with(aliases[1].as_str()));
    assert_eq!(aliases[2], format!("{}-2", aliases[1]));
    assert!(aliases[2].len() <= crate::keystore::MAX_ALIAS_LENGTH);
    assert_eq!(aliases[3], aliases[1]);

    assert_eq!(target.size(), 3);
    assert_eq!(target.get_certificate(&aliases[1]), source.get_certificate("wide-1"));
    assert_eq!(target.get_certificate(&aliases[2]), source.get_certificate("wide-2"));
}

struct BrokenPipe;

impl std::io::Write for BrokenPipe {
    fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
        Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer went away"))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_undelivered_ack_restores_previous_chain() {
    let mut ca_store = authority_store();
    let mut device_store = requester_store();
    let before = device_store.get_certificate_chain("device").unwrap();
    let mut ca = gateway(&mut ca_store).with_certifier("ca");
    let mut device = gateway(&mut device_store);

    let mut request = Vec::new();
    device.create_certificate_request("device", &mut request).unwrap();
    let mut response = Vec::new();
    ca.process_certificate_request(&mut Cursor::new(request), &mut response)
        .unwrap();

    let err = device
        .process_certificate_response(&mut Cursor::new(response), &mut BrokenPipe)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(device.state(), GatewayState::Idle);
    assert_eq!(device.store().get_certificate_chain("device").unwrap(), before);
}
