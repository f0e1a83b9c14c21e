//! Binary node decoder.
//!
//! Reads untrusted plaintext through a bounds-checked cursor. Every read that
//! would pass the end of the buffer fails with [`ProtocolError::EndOfStream`],
//! and the first failure aborts the whole decode; no partial node is ever
//! returned.
//!
//! Each tag byte is classified into a [`Tag`] first and then handled by exactly
//! one routine, so an unrecognised byte can only surface as
//! [`ProtocolError::InvalidTag`].

use bytes::Bytes;
use tracing::trace;

use crate::core::node::{Attributes, Node, NodeContent};
use crate::core::token::{self, tags, TokenDictionary};
use crate::error::{ProtocolError, Result};

/// Guards recursion through nested lists and JID pairs.
pub const MAX_NESTING_DEPTH: usize = 256;

/// Classified tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    ListEmpty,
    StreamEnd,
    Token(u8),
    Dictionary(u8),
    List8,
    List16,
    JidPair,
    Hex8,
    Binary8,
    Binary20,
    Binary32,
    Nibble8,
    Invalid(u8),
}

impl Tag {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            tags::LIST_EMPTY => Tag::ListEmpty,
            tags::STREAM_END => Tag::StreamEnd,
            3..=tags::SINGLE_BYTE_MAX => Tag::Token(byte),
            tags::DICTIONARY_0..=tags::DICTIONARY_3 => Tag::Dictionary(byte - tags::DICTIONARY_0),
            tags::LIST_8 => Tag::List8,
            tags::LIST_16 => Tag::List16,
            tags::JID_PAIR => Tag::JidPair,
            tags::HEX_8 => Tag::Hex8,
            tags::BINARY_8 => Tag::Binary8,
            tags::BINARY_20 => Tag::Binary20,
            tags::BINARY_32 => Tag::Binary32,
            tags::NIBBLE_8 => Tag::Nibble8,
            other => Tag::Invalid(other),
        }
    }
}

/// Decode one node using only the compiled single-byte table.
pub fn decode(bytes: &[u8]) -> Result<Node> {
    static EMPTY: std::sync::OnceLock<TokenDictionary> = std::sync::OnceLock::new();
    decode_with(bytes, EMPTY.get_or_init(TokenDictionary::new))
}

/// Decode one node, resolving extension tokens through `dictionary`.
pub fn decode_with(bytes: &[u8], dictionary: &TokenDictionary) -> Result<Node> {
    let node = Decoder::new(bytes, dictionary).read_node()?;
    trace!(description = node.description(), "decoded node");
    Ok(node)
}

/// Cursor over a plaintext node stream.
pub struct Decoder<'a> {
    bytes: &'a [u8],
    index: usize,
    depth: usize,
    dictionary: &'a TokenDictionary,
}

impl<'a> Decoder<'a> {
    pub fn new(bytes: &'a [u8], dictionary: &'a TokenDictionary) -> Self {
        Self {
            bytes,
            index: 0,
            depth: 0,
            dictionary,
        }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.index
    }

    fn check_eos(&self, length: usize) -> Result<()> {
        if self.bytes.len() - self.index < length {
            return Err(ProtocolError::EndOfStream);
        }
        Ok(())
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        self.check_eos(1)?;
        let byte = self.bytes[self.index];
        self.index += 1;
        Ok(byte)
    }

    /// Unsigned integer of `n` (1..=4) bytes.
    pub fn read_int_n(&mut self, n: usize, little_endian: bool) -> Result<u32> {
        debug_assert!((1..=4).contains(&n));
        self.check_eos(n)?;
        let raw = &self.bytes[self.index..self.index + n];
        let value = if little_endian {
            raw.iter().rev().fold(0u32, |acc, &b| (acc << 8) | b as u32)
        } else {
            raw.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32)
        };
        self.index += n;
        Ok(value)
    }

    pub fn read_int8(&mut self) -> Result<u32> {
        self.read_int_n(1, false)
    }

    pub fn read_int16(&mut self, little_endian: bool) -> Result<u32> {
        self.read_int_n(2, little_endian)
    }

    pub fn read_int32(&mut self, little_endian: bool) -> Result<u32> {
        self.read_int_n(4, little_endian)
    }

    /// Three bytes, big-endian, top nibble of the first byte ignored.
    pub fn read_int20(&mut self) -> Result<u32> {
        self.check_eos(3)?;
        let b = &self.bytes[self.index..self.index + 3];
        let value = ((b[0] as u32 & 0x0F) << 16) | ((b[1] as u32) << 8) | b[2] as u32;
        self.index += 3;
        Ok(value)
    }

    fn read_raw(&mut self, length: usize) -> Result<&'a [u8]> {
        self.check_eos(length)?;
        let bytes: &'a [u8] = self.bytes;
        let raw = &bytes[self.index..self.index + length];
        self.index += length;
        Ok(raw)
    }

    /// Length prefix belonging to one of the BINARY_* tags.
    fn read_binary_length(&mut self, tag: Tag) -> Result<usize> {
        let length = match tag {
            Tag::Binary8 => self.read_int8()?,
            Tag::Binary20 => self.read_int20()?,
            Tag::Binary32 => self.read_int32(false)?,
            _ => return Err(self.invalid(tag)),
        };
        Ok(length as usize)
    }

    fn invalid(&self, tag: Tag) -> ProtocolError {
        let byte = match tag {
            Tag::ListEmpty => tags::LIST_EMPTY,
            Tag::StreamEnd => tags::STREAM_END,
            Tag::Token(b) | Tag::Invalid(b) => b,
            Tag::Dictionary(d) => tags::DICTIONARY_0 + d,
            Tag::List8 => tags::LIST_8,
            Tag::List16 => tags::LIST_16,
            Tag::JidPair => tags::JID_PAIR,
            Tag::Hex8 => tags::HEX_8,
            Tag::Binary8 => tags::BINARY_8,
            Tag::Binary20 => tags::BINARY_20,
            Tag::Binary32 => tags::BINARY_32,
            Tag::Nibble8 => tags::NIBBLE_8,
        };
        ProtocolError::InvalidTag {
            tag: byte,
            position: self.index,
        }
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(ProtocolError::MalformedNode("nesting too deep"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn read_packed8(&mut self, tag: Tag) -> Result<String> {
        let start = self.read_byte()?;
        let count = (start & 0x7F) as usize;
        let packed = self.read_raw(count)?;

        let mut out = String::with_capacity(count * 2);
        for &byte in packed {
            unpack_digit(tag, byte >> 4, &mut out)?;
            unpack_digit(tag, byte & 0x0F, &mut out)?;
        }

        if start & 0x80 != 0 {
            out.pop();
        }
        Ok(out)
    }

    pub fn read_list_size(&mut self, tag: u8) -> Result<usize> {
        match Tag::from_byte(tag) {
            Tag::ListEmpty => Ok(0),
            Tag::List8 => Ok(self.read_int8()? as usize),
            Tag::List16 => Ok(self.read_int16(false)? as usize),
            Tag::StreamEnd => Err(ProtocolError::UnexpectedStreamEnd),
            other => Err(self.invalid(other)),
        }
    }

    /// Decode the string selected by `tag`. `LIST_EMPTY` yields `None`.
    pub fn read_string(&mut self, tag: u8) -> Result<Option<String>> {
        match Tag::from_byte(tag) {
            Tag::Token(index) => {
                let token = token::single_byte_token(index)?;
                let token = if token == token::LEGACY_USER_SERVER {
                    token::USER_SERVER
                } else {
                    token
                };
                Ok(Some(token.to_owned()))
            }
            Tag::Dictionary(id) => {
                let index = self.read_byte()?;
                Ok(Some(self.dictionary.get(id, index)?.to_owned()))
            }
            Tag::ListEmpty => Ok(None),
            binary @ (Tag::Binary8 | Tag::Binary20 | Tag::Binary32) => {
                let length = self.read_binary_length(binary)?;
                let raw = self.read_raw(length)?;
                Ok(Some(String::from_utf8_lossy(raw).into_owned()))
            }
            Tag::JidPair => {
                self.enter()?;
                let jid = self.read_jid_pair();
                self.leave();
                jid.map(Some)
            }
            packed @ (Tag::Nibble8 | Tag::Hex8) => self.read_packed8(packed).map(Some),
            other @ (Tag::StreamEnd | Tag::List8 | Tag::List16 | Tag::Invalid(_)) => {
                Err(self.invalid(other))
            }
        }
    }

    fn read_jid_pair(&mut self) -> Result<String> {
        let user_tag = self.read_byte()?;
        let user = self.read_string(user_tag)?;
        let server_tag = self.read_byte()?;
        let server = self.read_string(server_tag)?;

        match (user, server) {
            (Some(user), Some(server)) if !user.is_empty() && !server.is_empty() => {
                Ok(format!("{user}@{server}"))
            }
            (user, server) => Err(ProtocolError::InvalidJid { user, server }),
        }
    }

    /// `n` key/value pairs, each string preceded by its own tag.
    pub fn read_attributes(&mut self, n: usize) -> Result<Attributes> {
        let mut pairs = Vec::with_capacity(n.min(self.bytes.len() - self.index));
        for _ in 0..n {
            let key_tag = self.read_byte()?;
            let key = self.read_string(key_tag)?.unwrap_or_default();
            let value_tag = self.read_byte()?;
            let value = self.read_string(value_tag)?.unwrap_or_default();
            pairs.push((key, value));
        }
        Ok(Attributes::from_pairs(pairs))
    }

    fn read_list(&mut self, tag: u8) -> Result<Vec<Node>> {
        let size = self.read_list_size(tag)?;
        let mut children = Vec::with_capacity(size.min(self.bytes.len() - self.index));
        for _ in 0..size {
            children.push(self.read_node()?);
        }
        Ok(children)
    }

    pub fn read_node(&mut self) -> Result<Node> {
        self.enter()?;
        let node = self.read_node_inner();
        self.leave();
        node
    }

    fn read_node_inner(&mut self) -> Result<Node> {
        let size_tag = self.read_byte()?;
        let list_size = self.read_list_size(size_tag)?;

        let description_tag = self.read_byte()?;
        if description_tag == tags::STREAM_END {
            return Err(ProtocolError::UnexpectedStreamEnd);
        }
        let description = self.read_string(description_tag)?;

        if list_size == 0 {
            return Err(ProtocolError::MalformedNode("zero list size"));
        }
        let node = description
            .and_then(Node::new)
            .ok_or(ProtocolError::MalformedNode("empty description"))?;

        let attributes = self.read_attributes((list_size - 1) >> 1)?;
        let node = node.with_attributes(attributes);

        if list_size % 2 == 1 {
            return Ok(node);
        }

        let content_tag = self.read_byte()?;
        let content = match Tag::from_byte(content_tag) {
            Tag::ListEmpty | Tag::List8 | Tag::List16 => {
                Some(NodeContent::List(self.read_list(content_tag)?))
            }
            binary @ (Tag::Binary8 | Tag::Binary20 | Tag::Binary32) => {
                let length = self.read_binary_length(binary)?;
                let raw = self.read_raw(length)?;
                Some(NodeContent::Bytes(Bytes::copy_from_slice(raw)))
            }
            _ => self.read_string(content_tag)?.map(NodeContent::Text),
        };

        Ok(match content {
            Some(content) => node.with_content(content),
            None => node,
        })
    }
}

fn unpack_digit(tag: Tag, value: u8, out: &mut String) -> Result<()> {
    match (tag, value) {
        (Tag::Nibble8, 0..=9) | (Tag::Hex8, 0..=9) => out.push((b'0' + value) as char),
        (Tag::Nibble8, 10) => out.push('-'),
        (Tag::Nibble8, 11) => out.push('.'),
        (Tag::Nibble8, 15) => out.push('\0'),
        (Tag::Hex8, 10..=15) => {
            out.push('A');
            out.push((b'0' + value - 10) as char);
        }
        (Tag::Nibble8, _) => {
            return Err(ProtocolError::InvalidPackedDigit {
                tag: tags::NIBBLE_8,
                value,
            })
        }
        (Tag::Hex8, _) => {
            return Err(ProtocolError::InvalidPackedDigit {
                tag: tags::HEX_8,
                value,
            })
        }
        (_, value) => return Err(ProtocolError::InvalidPackedDigit { tag: 0, value }),
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn decoder(bytes: &[u8]) -> Decoder<'_> {
        static EMPTY: std::sync::OnceLock<TokenDictionary> = std::sync::OnceLock::new();
        Decoder::new(bytes, EMPTY.get_or_init(TokenDictionary::new))
    }

    #[test]
    fn test_legacy_user_server_is_rewritten() {
        assert_eq!(decoder(&[]).read_string(80).unwrap().unwrap(), "c.us");
    }

    #[test]
    fn test_nibble_packed_digits() {
        let mut d = decoder(&[0x02, 0x12, 0x34]);
        assert_eq!(d.read_string(tags::NIBBLE_8).unwrap().unwrap(), "1234");

        let mut d = decoder(&[0x82, 0x12, 0x34]);
        assert_eq!(d.read_string(tags::NIBBLE_8).unwrap().unwrap(), "123");

        let mut d = decoder(&[0x02, 0xAB, 0x3F]);
        assert_eq!(d.read_string(tags::NIBBLE_8).unwrap().unwrap(), "-.3\0");
    }

    #[test]
    fn test_nibble_rejects_reserved_values() {
        for bad in [0x1C, 0xD1, 0x3E] {
            let buf = [0x01, bad];
            let mut d = decoder(&buf);
            assert!(matches!(
                d.read_string(tags::NIBBLE_8),
                Err(ProtocolError::InvalidPackedDigit { .. })
            ));
        }
    }

    #[test]
    fn test_hex_packed_digits() {
        let mut d = decoder(&[0x02, 0x09, 0xAF]);
        assert_eq!(d.read_string(tags::HEX_8).unwrap().unwrap(), "09A0A5");

        let mut d = decoder(&[0x81, 0x1B]);
        assert_eq!(d.read_string(tags::HEX_8).unwrap().unwrap(), "1A");
    }

    #[test]
    fn test_jid_pair() {
        let mut d = decoder(&[9, 35]);
        assert_eq!(
            d.read_string(tags::JID_PAIR).unwrap().unwrap(),
            "action@g.us"
        );
    }

    #[test]
    fn test_jid_pair_requires_both_halves() {
        let mut d = decoder(&[tags::LIST_EMPTY, 35]);
        assert!(matches!(
            d.read_string(tags::JID_PAIR),
            Err(ProtocolError::InvalidJid { user: None, .. })
        ));
    }

    #[test]
    fn test_int_readers() {
        let mut d = decoder(&[0x12, 0x34, 0x12, 0x34, 0xF1, 0x02, 0x03]);
        assert_eq!(d.read_int16(false).unwrap(), 0x1234);
        assert_eq!(d.read_int16(true).unwrap(), 0x3412);
        assert_eq!(d.read_int20().unwrap(), 0x010203);
        assert!(matches!(d.read_byte(), Err(ProtocolError::EndOfStream)));
    }

    #[test]
    fn test_binary_string_past_end() {
        let mut d = decoder(&[0x05, b'a', b'b']);
        assert!(matches!(
            d.read_string(tags::BINARY_8),
            Err(ProtocolError::EndOfStream)
        ));

        let mut d = decoder(&[0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(matches!(
            d.read_string(tags::BINARY_32),
            Err(ProtocolError::EndOfStream)
        ));
    }

    #[test]
    fn test_invalid_tags() {
        for tag in [1u8, 240, 247, tags::STREAM_END, tags::LIST_8] {
            assert!(matches!(
                decoder(&[]).read_string(tag),
                Err(ProtocolError::InvalidTag { .. })
            ));
        }
        assert!(matches!(
            decoder(&[]).read_string(200),
            Err(ProtocolError::UnknownToken {
                dictionary: None,
                index: 200
            })
        ));
    }

    #[test]
    fn test_dictionary_index_out_of_range() {
        let mut dict = TokenDictionary::new();
        dict.set_dictionary(1, ["first"]).unwrap();
        let bytes = [0u8, 1u8];
        let mut d = Decoder::new(&bytes, &dict);
        assert_eq!(d.read_string(tags::DICTIONARY_1).unwrap().unwrap(), "first");
        assert!(matches!(
            d.read_string(tags::DICTIONARY_1),
            Err(ProtocolError::UnknownToken {
                dictionary: Some(1),
                index: 1
            })
        ));
    }

    #[test]
    fn test_node_with_attributes_only() {
        // LIST_8(3) "action" ["type" -> "chat"]
        let bytes = [tags::LIST_8, 3, 9, 91, 19];
        let node = decode(&bytes).unwrap();
        assert_eq!(node.description(), "action");
        assert_eq!(node.kind(), Some("chat"));
        assert!(node.content().is_none());
    }

    #[test]
    fn test_many_repeated_attribute_keys() {
        let pairs = 20_000usize;
        let size = 1 + 2 * pairs;
        let mut bytes = vec![tags::LIST_16, (size >> 8) as u8, size as u8, 9];
        for i in 0..pairs {
            let key = format!("k{}", i % 1000);
            let value = i.to_string();
            for s in [key, value] {
                bytes.extend_from_slice(&[tags::BINARY_8, s.len() as u8]);
                bytes.extend_from_slice(s.as_bytes());
            }
        }

        let node = decode(&bytes).unwrap();
        let attributes = node.attributes().unwrap();
        assert_eq!(attributes.len(), 1000);
        assert_eq!(attributes.iter().next(), Some(("k0", "19000")));
        assert_eq!(attributes.get("k7"), Some("19007"));
    }

    #[test]
    fn test_node_with_binary_content_is_not_string_decoded() {
        let bytes = [tags::LIST_8, 2, 17, tags::BINARY_8, 3, 0xFF, 0x00, 0xFE];
        let node = decode(&bytes).unwrap();
        assert_eq!(
            node.content(),
            Some(&NodeContent::Bytes(Bytes::from_static(&[0xFF, 0x00, 0xFE])))
        );
    }

    #[test]
    fn test_malformed_nodes() {
        assert!(matches!(
            decode(&[tags::LIST_EMPTY, 9]),
            Err(ProtocolError::MalformedNode(_))
        ));
        assert!(matches!(
            decode(&[tags::LIST_8, 1, tags::LIST_EMPTY]),
            Err(ProtocolError::MalformedNode(_))
        ));
        assert!(matches!(
            decode(&[tags::LIST_8, 1, tags::STREAM_END]),
            Err(ProtocolError::UnexpectedStreamEnd)
        ));
    }

    #[test]
    fn test_stream_end_inside_child_list() {
        // "action" with one child whose size tag is STREAM_END
        let bytes = [tags::LIST_8, 2, 9, tags::LIST_8, 1, tags::STREAM_END];
        assert!(matches!(
            decode(&bytes),
            Err(ProtocolError::UnexpectedStreamEnd)
        ));
    }

    #[test]
    fn test_truncated_child_aborts_whole_decode() {
        let bytes = [tags::LIST_8, 2, 9, tags::LIST_8, 2, tags::LIST_8, 1, 52, tags::LIST_8];
        assert!(matches!(decode(&bytes), Err(ProtocolError::EndOfStream)));
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let mut bytes = Vec::new();
        for _ in 0..(MAX_NESTING_DEPTH + 1) {
            bytes.extend_from_slice(&[tags::LIST_8, 2, 9, tags::LIST_8, 1]);
        }
        assert!(matches!(
            decode(&bytes),
            Err(ProtocolError::MalformedNode("nesting too deep"))
        ));
    }
}
