#![no_main]

use libfuzzer_sys::fuzz_target;
use qasa_keystore::gateway::{read_message, write_message};

fuzz_target!(|data: &[u8]| {
    // Parsing must never panic; whatever parses must re-encode and parse back equal
    if let Ok(received) = read_message(&mut &data[..]) {
        let _ = received.verify(Some(b"fuzz secret"));
        let _ = received.verify(None);
        let mut encoded = Vec::new();
        if write_message(&mut encoded, &received.message, None).is_ok() {
            let reparsed = read_message(&mut encoded.as_slice()).map(|m| m.message);
            assert_eq!(reparsed.ok(), Some(received.message));
        }
    }
});
