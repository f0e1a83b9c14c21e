#![no_main]

use libfuzzer_sys::fuzz_target;
use wa_protocol::core::{decode, encode};

fuzz_target!(|data: &[u8]| {
    // Fuzz node decoding - test for panics, crashes, unbounded allocation
    if let Ok(node) = decode(data) {
        // Whatever decodes must encode again
        let _ = encode(&node);
    }
});
