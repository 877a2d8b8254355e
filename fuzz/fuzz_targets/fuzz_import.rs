#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use qasa_keystore::container::password::minimal_params;
use qasa_keystore::prelude::*;

#[derive(Arbitrary, Debug)]
struct ImportFuzzInput {
    entry: Vec<u8>,
    batch: Vec<u8>,
    lock: Vec<u8>,
}

fuzz_target!(|input: ImportFuzzInput| {
    let mut store = KeyStore::new(KeyStoreConfig {
        kdf: minimal_params(),
        ..KeyStoreConfig::default()
    });
    let lock = input.lock;
    let mut gateway = KeyStoreGateway::new(&mut store)
        .with_password_resolver(|_| Some(Password::new("fuzz")))
        .with_lock_resolver(move |_| Some(Password::from_bytes(lock.clone())));

    if gateway.import_entry(&mut input.entry.as_slice()).is_err() {
        assert!(gateway.store().is_empty());
    }
    let before = gateway.store().size();
    if gateway.import_certificates(&mut input.batch.as_slice()).is_err() {
        assert_eq!(gateway.store().size(), before);
    }
});
