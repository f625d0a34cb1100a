#![no_main]

use std::sync::OnceLock;

use handoff::encryption::{PrivateKey, decrypt, encrypt_secret};
use libfuzzer_sys::fuzz_target;

fn key() -> &'static PrivateKey {
    static KEY: OnceLock<PrivateKey> = OnceLock::new();
    KEY.get_or_init(|| PrivateKey::generate(1024).expect("generate key"))
}

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Arbitrary envelopes must be rejected, never panic.
    let _ = decrypt(text, key());

    // Sealed values always open again.
    let sealed = encrypt_secret(text, &key().public_key()).expect("seal");
    let json = serde_json::to_string(&sealed).expect("json");
    assert_eq!(decrypt(&json, key()).expect("open"), text);
});
