#![no_main]

use libfuzzer_sys::fuzz_target;
use shhh_core::SealedBlob;

fuzz_target!(|data: &[u8]| {
    // Parsing arbitrary bytes must return Ok or Err, never panic
    if let Ok(blob) = SealedBlob::from_bytes(data) {
        // Anything that parses serializes back to the same bytes
        assert_eq!(blob.to_bytes(), data);
    }
});
