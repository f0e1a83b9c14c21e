//! Persisted session record.
//!
//! Everything needed to resume a paired session without a new handshake. The
//! keypair is derived from the seed, so the restored identity is identical to
//! the one that paired.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::Result;

/// Serialized form of a [`SessionCrypto`](crate::protocol::handshake::SessionCrypto).
///
/// Binary fields are base64 (standard alphabet). Keys and tokens are absent
/// until the first successful authentication.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(rename = "CLIENT_ID")]
    pub client_id: String,

    #[serde(rename = "EC_KEYS_SEED")]
    pub ec_keys_seed: String,

    #[serde(rename = "ENC_KEY", default, skip_serializing_if = "Option::is_none")]
    pub enc_key: Option<String>,

    #[serde(rename = "MAC_KEY", default, skip_serializing_if = "Option::is_none")]
    pub mac_key: Option<String>,

    #[serde(rename = "SERVER_TOKEN", default, skip_serializing_if = "Option::is_none")]
    pub server_token: Option<String>,

    #[serde(rename = "CLIENT_TOKEN", default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
}

impl SessionRecord {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }

    /// Whether the record carries established session keys.
    pub fn has_keys(&self) -> bool {
        self.enc_key.is_some() && self.mac_key.is_some()
    }
}

// Key material stays out of logs.
impl fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRecord")
            .field("client_id", &self.client_id)
            .field("ec_keys_seed", &"<redacted>")
            .field("enc_key", &self.enc_key.as_ref().map(|_| "<redacted>"))
            .field("mac_key", &self.mac_key.as_ref().map(|_| "<redacted>"))
            .field("server_token", &self.server_token.as_ref().map(|_| "<redacted>"))
            .field("client_token", &self.client_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names_on_the_wire() {
        let record = SessionRecord {
            client_id: "AAAA".into(),
            ec_keys_seed: "BBBB".into(),
            enc_key: Some("CCCC".into()),
            mac_key: Some("DDDD".into()),
            server_token: Some("srv".into()),
            client_token: Some("cli".into()),
        };
        let value: serde_json::Value = serde_json::from_str(&record.to_json().unwrap()).unwrap();
        for key in [
            "CLIENT_ID",
            "EC_KEYS_SEED",
            "ENC_KEY",
            "MAC_KEY",
            "SERVER_TOKEN",
            "CLIENT_TOKEN",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(SessionRecord::from_json(&record.to_json().unwrap()).unwrap(), record);
    }

    #[test]
    fn test_unpaired_record_omits_keys() {
        let json = r#"{"CLIENT_ID":"AAAA","EC_KEYS_SEED":"BBBB"}"#;
        let record = SessionRecord::from_json(json).unwrap();
        assert!(!record.has_keys());
        assert!(record.server_token.is_none());
        assert!(!record.to_json().unwrap().contains("ENC_KEY"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let record = SessionRecord {
            client_id: "AAAA".into(),
            ec_keys_seed: "very-secret-seed".into(),
            enc_key: Some("very-secret-key".into()),
            mac_key: None,
            server_token: None,
            client_token: None,
        };
        let debug = format!("{record:?}");
        assert!(!debug.contains("very-secret"));
        assert!(debug.contains("AAAA"));
    }
}
