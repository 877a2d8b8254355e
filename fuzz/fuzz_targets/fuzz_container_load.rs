#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use qasa_keystore::container::password::minimal_params;
use qasa_keystore::prelude::*;

#[derive(Arbitrary, Debug)]
struct ContainerFuzzInput {
    password: Vec<u8>,
    bytes: Vec<u8>,
    flip: Option<(usize, u8)>,
}

fn config() -> KeyStoreConfig {
    KeyStoreConfig {
        kdf: minimal_params(),
        ..KeyStoreConfig::default()
    }
}

fuzz_target!(|input: ContainerFuzzInput| {
    let password = Password::from_bytes(input.password);

    // Arbitrary bytes must never load into a non-empty store
    let mut store = KeyStore::new(config());
    if store.load_from_reader(&mut input.bytes.as_slice(), &password).is_err() {
        assert!(store.is_empty());
    }

    // A genuine container with one flipped byte must be rejected
    if let Some((position, mask)) = input.flip.filter(|(_, mask)| *mask != 0) {
        let mut source = KeyStore::new(config());
        let _ = source.set(
            "fuzz",
            Entry::Key(
                match SymmetricKey::new(KeySpec::Mac(MacSpec::hmac_sha256()), SecureBytes::new(&[7u8; 32])) {
                    Ok(key) => key,
                    Err(_) => return,
                },
            ),
            Some(&password),
        );
        let mut bytes = Vec::new();
        // past magic, version and the Argon2 cost fields
        const COSTS_END: usize = 18;
        if source.store_to_writer(&mut bytes, &password).is_ok() && bytes.len() > COSTS_END {
            let position = COSTS_END + position % (bytes.len() - COSTS_END);
            bytes[position] ^= mask;
            let mut target = KeyStore::new(config());
            assert!(target.load_from_reader(&mut bytes.as_slice(), &password).is_err());
            assert!(target.is_empty());
        }
    }
});
