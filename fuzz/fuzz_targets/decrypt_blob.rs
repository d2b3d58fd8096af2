#![no_main]

use libfuzzer_sys::fuzz_target;
use shhh_core::{decrypt, CipherError};

fuzz_target!(|data: &[u8]| {
    // Random bytes are never a valid sealed blob for a fixed passphrase.
    // Slow per input because of Argon2id; run with a small -max_len.
    match decrypt(data, "fuzz") {
        Err(CipherError::MalformedCiphertext) | Err(CipherError::AuthenticationFailed) => {}
        other => panic!("unexpected result: {:?}", other.map(|p| p.len())),
    }
});
