// Integration tests for moving certificates and entries between key-stores

use std::io::Cursor;

use qasa_keystore::container::password::minimal_params;
use qasa_keystore::error::error_codes;
use qasa_keystore::prelude::*;

const PASSWORD: &str = "entry";

fn config() -> KeyStoreConfig {
    KeyStoreConfig {
        kdf: minimal_params(),
        ..KeyStoreConfig::default()
    }
}

fn store_with_root(alias: &str, name: &str, spec: KeyPairSpec) -> KeyStore {
    let mut store = KeyStore::new(config());
    KeyStoreManager::new(&mut store)
        .create_root_key_pair(&spec, Name::new(name), alias, &Password::new(PASSWORD))
        .unwrap();
    store
}

fn resolve(_: &str) -> Option<Password> {
    Some(Password::new(PASSWORD))
}

#[test]
fn test_csr_exchange_then_persist() {
    let mut authority = store_with_root("ca", "Issuing CA", KeyPairSpec::Ed25519);
    let mut requester = store_with_root("client", "client", KeyPairSpec::ecdsa_p256());

    let mut request = Vec::new();
    let mut response = Vec::new();
    let mut ack = Vec::new();
    {
        let mut client = KeyStoreGateway::new(&mut requester).with_password_resolver(resolve);
        let mut ca = KeyStoreGateway::new(&mut authority)
            .with_password_resolver(resolve)
            .with_certifier("ca");

        client.create_certificate_request("client", &mut request).unwrap();
        let issued = ca
            .process_certificate_request(&mut Cursor::new(&request), &mut response)
            .unwrap();
        let received = client
            .process_certificate_response(&mut Cursor::new(&response), &mut ack)
            .unwrap();
        assert_eq!(issued, received);
        assert_eq!(ca.process_certificate_ack(&mut Cursor::new(&ack)).unwrap(), issued);
        assert_eq!(client.state(), GatewayState::Idle);
    }

    let chain = requester.get_certificate_chain("client").unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain.root(), &authority.get_certificate("ca").unwrap());

    // the new chain validates again after a reload
    let outer = Password::new("outer");
    let mut bytes = Vec::new();
    requester.store_to_writer(&mut bytes, &outer).unwrap();
    let mut reloaded = KeyStore::new(config());
    reloaded.load_from_reader(&mut Cursor::new(bytes), &outer).unwrap();
    assert_eq!(reloaded.get_certificate_chain("client"), Some(chain));
}

#[test]
fn test_replayed_response_is_rejected() {
    let mut authority = store_with_root("ca", "Issuing CA", KeyPairSpec::Ed25519);
    let mut requester = store_with_root("client", "client", KeyPairSpec::Ed25519);
    let mut client = KeyStoreGateway::new(&mut requester).with_password_resolver(resolve);
    let mut ca = KeyStoreGateway::new(&mut authority)
        .with_password_resolver(resolve)
        .with_certifier("ca");

    let mut first_request = Vec::new();
    client.create_certificate_request("client", &mut first_request).unwrap();
    let mut first_response = Vec::new();
    ca.process_certificate_request(&mut Cursor::new(&first_request), &mut first_response)
        .unwrap();
    client
        .process_certificate_response(&mut Cursor::new(&first_response), &mut Vec::new())
        .unwrap();

    client.create_certificate_request("client", &mut Vec::new()).unwrap();
    let err = client
        .process_certificate_response(&mut Cursor::new(&first_response), &mut Vec::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert_eq!(err.error_code(), error_codes::UNEXPECTED_MESSAGE);
    assert_eq!(client.state(), GatewayState::Idle);
}

#[test]
fn test_move_key_pair_between_stores() {
    let mut source = store_with_root("signer", "Signer", KeyPairSpec::ecdsa_p256());
    let original = source
        .get_key_pair_entry("signer", &Password::new(PASSWORD))
        .unwrap();

    let mut exported = Vec::new();
    KeyStoreGateway::new(&mut source)
        .with_password_resolver(resolve)
        .with_lock_resolver(|_| Some(Password::new("transport")))
        .export_entry("signer", &mut exported)
        .unwrap();

    let mut target = KeyStore::new(config());
    let alias = KeyStoreGateway::new(&mut target)
        .with_password_resolver(|_| Some(Password::new("target")))
        .with_lock_resolver(|prompt| match prompt {
            LockPrompt::Unlock { .. } => Some(Password::new("transport")),
            LockPrompt::Lock { .. } => None,
        })
        .import_entry(&mut Cursor::new(exported))
        .unwrap();

    assert_eq!(alias, "signer");
    let moved = target
        .get_key_pair_entry("signer", &Password::new("target"))
        .unwrap();
    assert_eq!(moved, original);

    // the moved key still signs for its certificate
    let signature = moved.key_pair.sign(target.factory(), b"message").unwrap();
    assert!(target
        .factory()
        .verify(
            &moved.key_pair.spec(),
            moved.certificate().public_key().as_bytes(),
            b"message",
            &signature
        )
        .unwrap());
}

#[test]
fn test_certificate_batch_between_stores() {
    let mut source = store_with_root("a", "Alpha", KeyPairSpec::Ed25519);
    KeyStoreManager::new(&mut source)
        .create_root_key_pair(&KeyPairSpec::Ed25519, Name::new("Beta"), "b", &Password::new(PASSWORD))
        .unwrap();

    let mut batch = Vec::new();
    assert_eq!(
        KeyStoreGateway::new(&mut source)
            .export_certificates(&["a", "b"], &mut batch)
            .unwrap(),
        2
    );

    let mut target = KeyStore::new(config());
    let aliases = KeyStoreGateway::new(&mut target)
        .import_certificates(&mut Cursor::new(batch))
        .unwrap();
    assert_eq!(aliases, vec!["Alpha".to_string(), "Beta".to_string()]);
    assert!(target.is_certificate_entry("Alpha"));
    assert_eq!(target.get_certificate("Beta"), source.get_certificate("b"));
}
