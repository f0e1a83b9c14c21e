//! Server-side helpers shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value;
use std::time::Duration;
use wa_protocol::config::ClientConfig;
use wa_protocol::protocol::handshake::{aes_cbc_encrypt, expand_shared_secret, hmac_sha256};
use wa_protocol::protocol::{SessionCrypto, SessionRecord};
use x25519_dalek::{PublicKey, StaticSecret};

pub const CLIENT_ID: [u8; 16] = [1; 16];
pub const SEED: [u8; 32] = [2; 32];
pub const ENC_KEY: [u8; 32] = [0x11; 32];
pub const MAC_KEY: [u8; 32] = [0x22; 32];

/// Heartbeats far enough apart that they never fire during a test.
pub fn quiet_config() -> ClientConfig {
    ClientConfig {
        heartbeat_interval: Duration::from_secs(3600),
        ..ClientConfig::default()
    }
}

pub fn fresh_crypto() -> SessionCrypto {
    SessionCrypto::from_parts(&CLIENT_ID, &SEED).unwrap()
}

/// A record for a client that already paired, as loaded from disk.
pub fn paired_record() -> SessionRecord {
    let mut crypto = fresh_crypto();
    crypto.set_server_token("server-token").unwrap();
    crypto.set_client_token("client-token").unwrap();
    crypto
        .load_keys(&STANDARD.encode(ENC_KEY), &STANDARD.encode(MAC_KEY))
        .unwrap();
    crypto.serialize()
}

/// The server's view of the session keys, for sealing and opening frames.
pub fn server_crypto() -> SessionCrypto {
    let mut crypto = SessionCrypto::from_parts(&[9; 16], &[9; 32]).unwrap();
    crypto
        .load_keys(&STANDARD.encode(ENC_KEY), &STANDARD.encode(MAC_KEY))
        .unwrap();
    crypto
}

/// Base64 pairing secret carrying `ENC_KEY || MAC_KEY` for `client_public`.
pub fn pairing_secret(client_public: [u8; 32]) -> String {
    let server_private = StaticSecret::from([77u8; 32]);
    let server_public = PublicKey::from(&server_private);
    let shared = server_private.diffie_hellman(&PublicKey::from(client_public));
    let expanded = expand_shared_secret(shared.as_bytes()).unwrap();

    let keys = [ENC_KEY, MAC_KEY].concat();
    let encrypted = aes_cbc_encrypt(&expanded[..32], &expanded[64..80], &keys).unwrap();
    let tag = hmac_sha256(
        &expanded[32..64],
        &[&server_public.as_bytes()[..], &encrypted[..]].concat(),
    )
    .unwrap();

    STANDARD.encode([&server_public.as_bytes()[..], &tag[..], &encrypted[..]].concat())
}

/// Split a control request into its tag and JSON body.
pub fn split_request(text: &str) -> (String, Value) {
    let (tag, body) = text.split_once(',').expect("control request has a tag");
    (tag.to_owned(), serde_json::from_str(body).expect("control body is JSON"))
}
