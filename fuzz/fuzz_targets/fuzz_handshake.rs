#![no_main]

use libfuzzer_sys::fuzz_target;
use wa_protocol::protocol::SessionCrypto;

fuzz_target!(|data: &[u8]| {
    // Fuzz pairing secret handling; a forged secret must never yield keys
    let Ok(mut crypto) = SessionCrypto::from_parts(&[1; 16], &[2; 32]) else {
        return;
    };
    if crypto.build_new_pair(data).is_err() {
        assert!(!crypto.usable());
    }
});
