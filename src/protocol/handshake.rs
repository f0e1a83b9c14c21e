//! Session cryptography using X25519 key agreement.
//!
//! Holds the long-lived client identity (client id plus the seed of a
//! deterministic X25519 keypair), the tokens the server hands out, and the
//! `encKey`/`macKey` pair established by the pairing handshake.
//!
//! **Pairing handshake** ([`SessionCrypto::build_new_pair`])
//! ```text
//! secret   = serverPub(32) || tag(32) || encrypted(N)
//! shared   = X25519(seed, serverPub)
//! expanded = HKDF-SHA256(shared, 80)
//! check      HMAC(expanded[32..64], serverPub || encrypted) == tag
//! keys     = AES-256-CBC-decrypt(key = expanded[0..32], iv = expanded[64..80], encrypted)
//! encKey   = keys[0..32], macKey = keys[32..64]
//! ```
//!
//! **Frames** are `HMAC(macKey, iv || ct) || iv || ct` with AES-256-CBC under
//! `encKey`. Tags are always compared in constant time.

use aes::Aes256;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::session::SessionRecord;

use tracing::{debug, instrument, warn};

type HmacSha256 = Hmac<Sha256>;

pub const CLIENT_ID_LEN: usize = 16;
pub const SEED_LEN: usize = 32;
pub const KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 32;
pub const IV_LEN: usize = 16;

/// Length of the HKDF output used by the pairing handshake.
pub const EXPANDED_LEN: usize = 80;

/// Shortest pairing secret accepted: public key, tag, then at least 24 bytes
/// of key material. Real secrets carry 80 bytes of it.
pub const MIN_SECRET_LEN: usize = 88;

/// HMAC-SHA256 over `data` keyed by `key`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; SIGNATURE_LEN]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|_| ProtocolError::CryptoConfig(constants::ERR_HMAC_KEY))?;
    mac.update(data);
    let mut out = [0u8; SIGNATURE_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Constant-time check of `tag` against HMAC-SHA256 over the concatenated `parts`.
pub fn verify_hmac(key: &[u8], parts: &[&[u8]], tag: &[u8]) -> Result<()> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|_| ProtocolError::CryptoConfig(constants::ERR_HMAC_KEY))?;
    for part in parts {
        mac.update(part);
    }
    mac.verify_slice(tag)
        .map_err(|_| ProtocolError::SignatureMismatch)
}

/// HKDF-SHA256 without salt or info, expanded to [`EXPANDED_LEN`] bytes.
pub fn expand_shared_secret(shared: &[u8]) -> Result<Zeroizing<[u8; EXPANDED_LEN]>> {
    let hk = Hkdf::<Sha256>::new(None, shared);
    let mut expanded = Zeroizing::new([0u8; EXPANDED_LEN]);
    hk.expand(&[], &mut expanded[..])
        .map_err(|_| ProtocolError::HandshakeError(constants::ERR_HKDF_EXPAND))?;
    Ok(expanded)
}

pub fn aes_cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
        .map_err(|_| ProtocolError::CryptoConfig(constants::ERR_SESSION_KEY_LENGTH))?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| ProtocolError::DecryptionFailure)
}

pub fn aes_cbc_encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    Ok(cbc::Encryptor::<Aes256>::new_from_slices(key, iv)
        .map_err(|_| ProtocolError::EncryptionFailure)?
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    getrandom::fill(&mut buf).map_err(|_| ProtocolError::CryptoConfig(constants::ERR_RNG_FAILURE))?;
    Ok(buf)
}

fn decode_fixed<const N: usize>(
    encoded: &str,
    empty: &'static str,
    wrong_length: &'static str,
) -> Result<Zeroizing<[u8; N]>> {
    if encoded.is_empty() {
        return Err(ProtocolError::CryptoConfig(empty));
    }
    let raw = Zeroizing::new(
        STANDARD
            .decode(encoded)
            .map_err(|_| ProtocolError::CryptoConfig(wrong_length))?,
    );
    fixed(&raw, wrong_length)
}

fn fixed<const N: usize>(raw: &[u8], wrong_length: &'static str) -> Result<Zeroizing<[u8; N]>> {
    let array: [u8; N] = raw
        .try_into()
        .map_err(|_| ProtocolError::CryptoConfig(wrong_length))?;
    Ok(Zeroizing::new(array))
}

fn validate_token(token: &str) -> Result<()> {
    if token.is_empty() {
        return Err(ProtocolError::CryptoConfig(constants::ERR_TOKEN_EMPTY));
    }
    Ok(())
}

struct SessionKeys {
    enc_key: Zeroizing<[u8; KEY_LEN]>,
    mac_key: Zeroizing<[u8; KEY_LEN]>,
}

/// Identity, tokens and session keys of one client.
pub struct SessionCrypto {
    client_id: [u8; CLIENT_ID_LEN],
    seed: Zeroizing<[u8; SEED_LEN]>,
    private_key: Zeroizing<StaticSecret>,
    public_key: PublicKey,
    keys: Option<SessionKeys>,
    server_token: Option<String>,
    client_token: Option<String>,
}

impl SessionCrypto {
    /// Fresh identity from the operating system RNG.
    pub fn generate() -> Result<Self> {
        let client_id = random_bytes::<CLIENT_ID_LEN>()?;
        let seed = Zeroizing::new(random_bytes::<SEED_LEN>()?);
        Self::from_parts(&client_id, &seed[..])
    }

    /// Identity from raw bytes: a 16-byte client id and a 32-byte seed.
    pub fn from_parts(client_id: &[u8], seed: &[u8]) -> Result<Self> {
        if client_id.is_empty() {
            return Err(ProtocolError::CryptoConfig(constants::ERR_CLIENT_ID_EMPTY));
        }
        if seed.is_empty() {
            return Err(ProtocolError::CryptoConfig(constants::ERR_SEED_EMPTY));
        }
        let client_id: [u8; CLIENT_ID_LEN] = client_id
            .try_into()
            .map_err(|_| ProtocolError::CryptoConfig(constants::ERR_CLIENT_ID_LENGTH))?;
        let seed = fixed::<SEED_LEN>(seed, constants::ERR_SEED_LENGTH)?;
        Ok(Self::with_seed(client_id, seed))
    }

    /// Identity from base64 strings.
    pub fn from_base64(client_id: &str, seed: &str) -> Result<Self> {
        let client_id = decode_fixed::<CLIENT_ID_LEN>(
            client_id,
            constants::ERR_CLIENT_ID_EMPTY,
            constants::ERR_CLIENT_ID_LENGTH,
        )?;
        let seed = decode_fixed::<SEED_LEN>(seed, constants::ERR_SEED_EMPTY, constants::ERR_SEED_LENGTH)?;
        Ok(Self::with_seed(*client_id, seed))
    }

    fn with_seed(client_id: [u8; CLIENT_ID_LEN], seed: Zeroizing<[u8; SEED_LEN]>) -> Self {
        let private_key = StaticSecret::from(*seed);
        let public_key = PublicKey::from(&private_key);
        Self {
            client_id,
            seed,
            private_key: Zeroizing::new(private_key),
            public_key,
            keys: None,
            server_token: None,
            client_token: None,
        }
    }

    /// Rebuild a session from its persisted record.
    ///
    /// Keys are loaded only when both are present. An empty token is rejected.
    pub fn restore(record: &SessionRecord) -> Result<Self> {
        let mut crypto = Self::from_base64(&record.client_id, &record.ec_keys_seed)?;
        if let Some(token) = &record.server_token {
            crypto.set_server_token(token)?;
        }
        if let Some(token) = &record.client_token {
            crypto.set_client_token(token)?;
        }
        if let (Some(enc_key), Some(mac_key)) = (&record.enc_key, &record.mac_key) {
            crypto.load_keys(enc_key, mac_key)?;
        }
        debug!(usable = crypto.usable(), "restored session");
        Ok(crypto)
    }

    /// Install base64 session keys.
    pub fn load_keys(&mut self, enc_key: &str, mac_key: &str) -> Result<()> {
        let enc_key = decode_fixed::<KEY_LEN>(
            enc_key,
            constants::ERR_SESSION_KEY_LENGTH,
            constants::ERR_SESSION_KEY_LENGTH,
        )?;
        let mac_key = decode_fixed::<KEY_LEN>(
            mac_key,
            constants::ERR_SESSION_KEY_LENGTH,
            constants::ERR_SESSION_KEY_LENGTH,
        )?;
        self.keys = Some(SessionKeys { enc_key, mac_key });
        Ok(())
    }

    /// Whether both session keys are established.
    pub fn usable(&self) -> bool {
        self.keys.is_some()
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.public_key.to_bytes()
    }

    pub fn public_key_base64(&self) -> String {
        STANDARD.encode(self.public_key.as_bytes())
    }

    pub fn client_id(&self) -> &[u8] {
        &self.client_id
    }

    pub fn client_id_base64(&self) -> String {
        STANDARD.encode(self.client_id)
    }

    pub fn server_token(&self) -> Option<&str> {
        self.server_token.as_deref()
    }

    pub fn client_token(&self) -> Option<&str> {
        self.client_token.as_deref()
    }

    pub fn set_server_token(&mut self, token: &str) -> Result<()> {
        validate_token(token)?;
        self.server_token = Some(token.to_owned());
        Ok(())
    }

    pub fn set_client_token(&mut self, token: &str) -> Result<()> {
        validate_token(token)?;
        self.client_token = Some(token.to_owned());
        Ok(())
    }

    /// [`build_new_pair`](Self::build_new_pair) on a base64 secret.
    pub fn build_new_pair_base64(&mut self, secret: &str) -> Result<()> {
        if secret.is_empty() {
            return Err(ProtocolError::HandshakeError(constants::ERR_SECRET_MISSING));
        }
        let secret = STANDARD
            .decode(secret)
            .map_err(|_| ProtocolError::HandshakeError(constants::ERR_SECRET_TOO_SHORT))?;
        self.build_new_pair(&secret)
    }

    /// Derive `encKey`/`macKey` from the server's pairing secret.
    ///
    /// # Errors
    /// `SignatureMismatch` when the embedded tag does not verify. No key is
    /// set on any error.
    #[instrument(skip_all, fields(len = secret.len()))]
    pub fn build_new_pair(&mut self, secret: &[u8]) -> Result<()> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(ProtocolError::HandshakeError(constants::ERR_SECRET_TOO_SHORT));
        }
        let (server_public, rest) = secret.split_at(KEY_LEN);
        let (tag, encrypted) = rest.split_at(SIGNATURE_LEN);

        let server_public: [u8; KEY_LEN] = server_public
            .try_into()
            .map_err(|_| ProtocolError::HandshakeError(constants::ERR_SECRET_TOO_SHORT))?;
        let shared = self
            .private_key
            .diffie_hellman(&PublicKey::from(server_public));
        let expanded = expand_shared_secret(shared.as_bytes())?;

        if let Err(e) = verify_hmac(&expanded[32..64], &[&server_public[..], encrypted], tag) {
            warn!("pairing secret failed verification");
            return Err(e);
        }

        let plaintext = Zeroizing::new(aes_cbc_decrypt(&expanded[..32], &expanded[64..80], encrypted)?);
        if plaintext.len() < 2 * KEY_LEN {
            return Err(ProtocolError::HandshakeError(constants::ERR_KEY_MATERIAL_LENGTH));
        }

        self.keys = Some(SessionKeys {
            enc_key: fixed(&plaintext[..KEY_LEN], constants::ERR_KEY_MATERIAL_LENGTH)?,
            mac_key: fixed(&plaintext[KEY_LEN..2 * KEY_LEN], constants::ERR_KEY_MATERIAL_LENGTH)?,
        });
        debug!("session keys established");
        Ok(())
    }

    fn keys(&self) -> Result<&SessionKeys> {
        self.keys.as_ref().ok_or(ProtocolError::SessionNotReady)
    }

    /// HMAC-SHA256 keyed by `macKey`.
    pub fn hmac(&self, data: &[u8]) -> Result<[u8; SIGNATURE_LEN]> {
        hmac_sha256(&self.keys()?.mac_key[..], data)
    }

    /// Decrypt `iv || ct` under `encKey`.
    pub fn aes_decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let keys = self.keys()?;
        if ciphertext.len() < IV_LEN {
            return Err(ProtocolError::MalformedFrame(constants::ERR_CIPHERTEXT_TOO_SHORT));
        }
        let (iv, body) = ciphertext.split_at(IV_LEN);
        aes_cbc_decrypt(&keys.enc_key[..], iv, body)
    }

    /// Encrypt under `encKey` with a random IV, returning `iv || ct`.
    pub fn aes_encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let keys = self.keys()?;
        let iv = random_bytes::<IV_LEN>()?;
        let mut out = Vec::with_capacity(IV_LEN + plaintext.len() + IV_LEN);
        out.extend_from_slice(&iv);
        out.extend(aes_cbc_encrypt(&keys.enc_key[..], &iv, plaintext)?);
        Ok(out)
    }

    /// Verify and decrypt the body of an encrypted frame.
    pub fn open_frame(&self, body: &[u8]) -> Result<Vec<u8>> {
        let keys = self.keys()?;
        if body.len() < SIGNATURE_LEN {
            return Err(ProtocolError::MalformedFrame(constants::ERR_FRAME_TOO_SHORT));
        }
        let (signature, ciphertext) = body.split_at(SIGNATURE_LEN);
        verify_hmac(&keys.mac_key[..], &[ciphertext], signature)?;
        self.aes_decrypt(ciphertext)
    }

    /// Encrypt and sign a plaintext into an encrypted frame body.
    pub fn seal_frame(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let ciphertext = self.aes_encrypt(plaintext)?;
        let signature = self.hmac(&ciphertext)?;
        let mut body = Vec::with_capacity(SIGNATURE_LEN + ciphertext.len());
        body.extend_from_slice(&signature);
        body.extend(ciphertext);
        Ok(body)
    }

    pub fn serialize(&self) -> SessionRecord {
        SessionRecord {
            client_id: self.client_id_base64(),
            ec_keys_seed: STANDARD.encode(&self.seed[..]),
            enc_key: self.keys.as_ref().map(|k| STANDARD.encode(&k.enc_key[..])),
            mac_key: self.keys.as_ref().map(|k| STANDARD.encode(&k.mac_key[..])),
            server_token: self.server_token.clone(),
            client_token: self.client_token.clone(),
        }
    }
}

impl fmt::Debug for SessionCrypto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCrypto")
            .field("client_id", &self.client_id_base64())
            .field("public_key", &self.public_key_base64())
            .field("usable", &self.usable())
            .field("has_server_token", &self.server_token.is_some())
            .field("has_client_token", &self.client_token.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_validation() {
        assert!(matches!(
            SessionCrypto::from_parts(&[], &[1; 32]),
            Err(ProtocolError::CryptoConfig(constants::ERR_CLIENT_ID_EMPTY))
        ));
        assert!(matches!(
            SessionCrypto::from_parts(&[1; 16], &[1; 31]),
            Err(ProtocolError::CryptoConfig(constants::ERR_SEED_LENGTH))
        ));
        assert!(matches!(
            SessionCrypto::from_base64("", "AAAA"),
            Err(ProtocolError::CryptoConfig(constants::ERR_CLIENT_ID_EMPTY))
        ));
        assert!(matches!(
            SessionCrypto::from_base64("not base64!", "AAAA"),
            Err(ProtocolError::CryptoConfig(_))
        ));
    }

    #[test]
    fn test_seed_determines_public_key() {
        let a = SessionCrypto::from_parts(&[7; 16], &[42; 32]).unwrap();
        let b = SessionCrypto::from_parts(&[7; 16], &[42; 32]).unwrap();
        let c = SessionCrypto::from_parts(&[7; 16], &[43; 32]).unwrap();
        assert_eq!(a.public_key(), b.public_key());
        assert_ne!(a.public_key(), c.public_key());
    }

    #[test]
    fn test_generated_identities_differ() {
        let a = SessionCrypto::generate().unwrap();
        let b = SessionCrypto::generate().unwrap();
        assert_ne!(a.client_id(), b.client_id());
        assert_ne!(a.public_key(), b.public_key());
        assert!(!a.usable());
    }

    #[test]
    fn test_keys_required_for_frames() {
        let crypto = SessionCrypto::generate().unwrap();
        assert!(matches!(crypto.hmac(b"x"), Err(ProtocolError::SessionNotReady)));
        assert!(matches!(crypto.open_frame(&[0; 64]), Err(ProtocolError::SessionNotReady)));
    }

    #[test]
    fn test_empty_token_rejected() {
        let mut crypto = SessionCrypto::generate().unwrap();
        assert!(crypto.set_server_token("").is_err());
        assert!(crypto.set_client_token("tok").is_ok());
        assert_eq!(crypto.client_token(), Some("tok"));
    }

    #[test]
    fn test_short_secret_rejected() {
        let mut crypto = SessionCrypto::generate().unwrap();
        for len in [0, 2 * KEY_LEN + IV_LEN, MIN_SECRET_LEN - 1] {
            assert!(matches!(
                crypto.build_new_pair(&vec![0; len]),
                Err(ProtocolError::HandshakeError(constants::ERR_SECRET_TOO_SHORT))
            ));
        }
        assert!(!crypto.usable());
    }

    #[test]
    fn test_frame_seal_open() {
        let mut crypto = SessionCrypto::generate().unwrap();
        crypto
            .load_keys(&STANDARD.encode([3u8; 32]), &STANDARD.encode([4u8; 32]))
            .unwrap();

        let body = crypto.seal_frame(b"node bytes").unwrap();
        assert_eq!(crypto.open_frame(&body).unwrap(), b"node bytes");

        let mut tampered = body.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        assert!(matches!(
            crypto.open_frame(&tampered),
            Err(ProtocolError::SignatureMismatch)
        ));
    }

    #[test]
    fn test_debug_hides_keys() {
        let crypto = SessionCrypto::from_parts(&[1; 16], &[2; 32]).unwrap();
        let record = crypto.serialize();
        assert!(!format!("{crypto:?}").contains(&record.ec_keys_seed));
    }
}
