//! Token tables and tag bytes of the binary node format.
//!
//! The single-byte table is compiled in and never changes. The four extension
//! dictionaries are data handed to the client at runtime (see
//! [`TokenDictionary`]) because the server revises them independently of the
//! wire format.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::error::{ProtocolError, Result};

/// Tag byte values.
pub mod tags {
    pub const LIST_EMPTY: u8 = 0;
    pub const STREAM_END: u8 = 2;
    pub const DICTIONARY_0: u8 = 236;
    pub const DICTIONARY_1: u8 = 237;
    pub const DICTIONARY_2: u8 = 238;
    pub const DICTIONARY_3: u8 = 239;
    pub const LIST_8: u8 = 248;
    pub const LIST_16: u8 = 249;
    pub const JID_PAIR: u8 = 250;
    pub const HEX_8: u8 = 251;
    pub const BINARY_8: u8 = 252;
    pub const BINARY_20: u8 = 253;
    pub const BINARY_32: u8 = 254;
    pub const NIBBLE_8: u8 = 255;

    /// Highest byte that may carry a single-byte token.
    pub const SINGLE_BYTE_MAX: u8 = 235;
}

/// Number of entries addressable through one extension dictionary.
pub const DICTIONARY_SIZE: usize = 256;

/// Number of extension dictionaries.
pub const DICTIONARY_COUNT: usize = 4;

/// Token the server uses for the user domain.
pub const LEGACY_USER_SERVER: &str = "s.whatsapp.net";

/// Domain the client exposes in place of [`LEGACY_USER_SERVER`].
pub const USER_SERVER: &str = "c.us";

/// Single-byte tokens. Indices 0-2 are reserved.
#[rustfmt::skip]
pub static SINGLE_BYTE_TOKENS: [Option<&str>; 162] = [
    None, None, None, Some("200"), Some("400"), Some("404"), Some("500"), Some("501"), Some("502"), Some("action"),
    Some("add"), Some("after"), Some("archive"), Some("author"), Some("available"), Some("battery"), Some("before"), Some("body"), Some("broadcast"), Some("chat"),
    Some("clear"), Some("code"), Some("composing"), Some("contacts"), Some("count"), Some("create"), Some("debug"), Some("delete"), Some("demote"), Some("duplicate"),
    Some("encoding"), Some("error"), Some("false"), Some("filehash"), Some("from"), Some("g.us"), Some("group"), Some("groups_v2"), Some("height"), Some("id"),
    Some("image"), Some("in"), Some("index"), Some("invis"), Some("item"), Some("jid"), Some("kind"), Some("last"), Some("leave"), Some("live"),
    Some("log"), Some("media"), Some("message"), Some("mimetype"), Some("missing"), Some("modify"), Some("name"), Some("notification"), Some("notify"), Some("out"),
    Some("owner"), Some("participant"), Some("paused"), Some("picture"), Some("played"), Some("presence"), Some("preview"), Some("promote"), Some("query"), Some("raw"),
    Some("read"), Some("receipt"), Some("received"), Some("recipient"), Some("recording"), Some("relay"), Some("remove"), Some("response"), Some("resume"), Some("retry"),
    Some("s.whatsapp.net"), Some("seconds"), Some("set"), Some("size"), Some("status"), Some("subject"), Some("subscribe"), Some("t"), Some("text"), Some("to"),
    Some("true"), Some("type"), Some("unarchive"), Some("unavailable"), Some("url"), Some("user"), Some("value"), Some("web"), Some("width"), Some("mute"),
    Some("read_only"), Some("admin"), Some("creator"), Some("short"), Some("update"), Some("powersave"), Some("checksum"), Some("epoch"), Some("block"), Some("previous"),
    Some("409"), Some("replaced"), Some("reason"), Some("spam"), Some("modify_tag"), Some("message_info"), Some("delivery"), Some("emoji"), Some("title"), Some("description"),
    Some("canonical-url"), Some("matched-text"), Some("star"), Some("unstar"), Some("media_key"), Some("filename"), Some("identity"), Some("unread"), Some("page"), Some("page_count"),
    Some("search"), Some("media_message"), Some("security"), Some("call_log"), Some("profile"), Some("ciphertext"), Some("invite"), Some("gif"), Some("vcard"), Some("frequent"),
    Some("privacy"), Some("blacklist"), Some("whitelist"), Some("verify"), Some("location"), Some("document"), Some("elapsed"), Some("revoke_invite"), Some("expiration"), Some("unsubscribe"),
    Some("disable"), Some("vname"), Some("old_jid"), Some("new_jid"), Some("announcement"), Some("locked"), Some("prop"), Some("label"), Some("color"), Some("call"),
    Some("offer"), Some("call-id"),
];

/// Resolve a single-byte token.
pub fn single_byte_token(index: u8) -> Result<&'static str> {
    SINGLE_BYTE_TOKENS
        .get(index as usize)
        .copied()
        .flatten()
        .ok_or(ProtocolError::UnknownToken {
            dictionary: None,
            index: index as usize,
        })
}

/// Reverse lookup into the single-byte table, built on first use.
pub fn single_byte_index(token: &str) -> Option<u8> {
    static INDEX: OnceLock<HashMap<&'static str, u8>> = OnceLock::new();
    INDEX
        .get_or_init(|| {
            SINGLE_BYTE_TOKENS
                .iter()
                .enumerate()
                .filter_map(|(i, t)| t.map(|t| (t, i as u8)))
                .collect()
        })
        .get(token)
        .copied()
}

/// The four extension dictionaries, flattened so that dictionary `d` entry
/// `i` lives at `d * 256 + i`.
#[derive(Debug, Clone, Default)]
pub struct TokenDictionary {
    entries: Vec<Option<String>>,
    reverse: HashMap<String, (u8, u8)>,
}

impl TokenDictionary {
    /// An empty dictionary set; every extension lookup fails.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the flat layout the server publishes.
    pub fn from_flat<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut dict = Self::new();
        for (n, token) in tokens
            .into_iter()
            .take(DICTIONARY_SIZE * DICTIONARY_COUNT)
            .enumerate()
        {
            dict.insert_at(n, token.into());
        }
        dict
    }

    /// Replace the contents of one dictionary.
    pub fn set_dictionary<I, S>(&mut self, id: u8, tokens: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if id as usize >= DICTIONARY_COUNT {
            return Err(ProtocolError::UnknownToken {
                dictionary: Some(id),
                index: 0,
            });
        }

        let base = id as usize * DICTIONARY_SIZE;
        let end = (base + DICTIONARY_SIZE).min(self.entries.len());
        for slot in base..end {
            if let Some(old) = self.entries[slot].take() {
                let position = ((slot / DICTIONARY_SIZE) as u8, (slot % DICTIONARY_SIZE) as u8);
                if self.reverse.get(&old) == Some(&position) {
                    self.reverse.remove(&old);
                }
            }
        }

        for (i, token) in tokens.into_iter().take(DICTIONARY_SIZE).enumerate() {
            self.insert_at(base + i, token.into());
        }
        Ok(())
    }

    fn insert_at(&mut self, n: usize, token: String) {
        if self.entries.len() <= n {
            self.entries.resize(n + 1, None);
        }
        let position = ((n / DICTIONARY_SIZE) as u8, (n % DICTIONARY_SIZE) as u8);
        self.reverse.entry(token.clone()).or_insert(position);
        self.entries[n] = Some(token);
    }

    /// Resolve `(dictionary, index)`.
    pub fn get(&self, dictionary: u8, index: u8) -> Result<&str> {
        let n = dictionary as usize * DICTIONARY_SIZE + index as usize;
        self.entries
            .get(n)
            .and_then(|t| t.as_deref())
            .ok_or(ProtocolError::UnknownToken {
                dictionary: Some(dictionary),
                index: index as usize,
            })
    }

    /// Position of `token` in the extension dictionaries, if present.
    pub fn position(&self, token: &str) -> Option<(u8, u8)> {
        self.reverse.get(token).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.reverse.is_empty()
    }
}
