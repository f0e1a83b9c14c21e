//! Binary node encoder.
//!
//! Produces the same tag-length-value layout the decoder reads. Strings pick
//! the most compact representation available: a single-byte token, an
//! extension dictionary entry, a JID pair, nibble-packed digits, then raw
//! bytes.
//!
//! Text content that falls through to raw bytes reads back as
//! [`NodeContent::Bytes`], since the format cannot tell the two apart.

use bytes::{BufMut, Bytes, BytesMut};

use crate::core::node::{Node, NodeContent};
use crate::core::token::{self, tags, TokenDictionary};
use crate::error::{ProtocolError, Result};

/// Longest digit string that still fits one NIBBLE_8 length byte.
const MAX_PACKED_DIGITS: usize = 0x7F * 2;

/// Encode one node using only the compiled single-byte table.
pub fn encode(node: &Node) -> Result<Bytes> {
    let dictionary = TokenDictionary::new();
    encode_with(node, &dictionary)
}

/// Encode one node, using `dictionary` for extension tokens.
pub fn encode_with(node: &Node, dictionary: &TokenDictionary) -> Result<Bytes> {
    let mut encoder = Encoder::new(dictionary);
    encoder.write_node(node)?;
    Ok(encoder.finish())
}

pub struct Encoder<'a> {
    buf: BytesMut,
    dictionary: &'a TokenDictionary,
}

impl<'a> Encoder<'a> {
    pub fn new(dictionary: &'a TokenDictionary) -> Self {
        Self {
            buf: BytesMut::with_capacity(64),
            dictionary,
        }
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn write_node(&mut self, node: &Node) -> Result<()> {
        let attribute_count = node.attributes().map_or(0, |a| a.len());
        let list_size = 1 + 2 * attribute_count + usize::from(node.content().is_some());

        self.write_list_start(list_size)?;
        self.write_string(node.description())?;

        if let Some(attributes) = node.attributes() {
            for (key, value) in attributes.iter() {
                self.write_string(key)?;
                self.write_string(value)?;
            }
        }

        match node.content() {
            None => {}
            Some(NodeContent::List(children)) => {
                self.write_list_start(children.len())?;
                for child in children {
                    self.write_node(child)?;
                }
            }
            Some(NodeContent::Bytes(bytes)) => self.write_binary(bytes)?,
            Some(NodeContent::Text(text)) => self.write_string(text)?,
        }
        Ok(())
    }

    fn write_list_start(&mut self, size: usize) -> Result<()> {
        if size == 0 {
            self.buf.put_u8(tags::LIST_EMPTY);
        } else if size < 256 {
            self.buf.put_u8(tags::LIST_8);
            self.buf.put_u8(size as u8);
        } else if size <= u16::MAX as usize {
            self.buf.put_u8(tags::LIST_16);
            self.buf.put_u16(size as u16);
        } else {
            return Err(ProtocolError::MalformedNode("list too long"));
        }
        Ok(())
    }

    pub fn write_string(&mut self, value: &str) -> Result<()> {
        if let Some(index) = token::single_byte_index(value) {
            self.buf.put_u8(index);
            return Ok(());
        }
        if value == token::USER_SERVER {
            if let Some(index) = token::single_byte_index(token::LEGACY_USER_SERVER) {
                self.buf.put_u8(index);
                return Ok(());
            }
        }
        if let Some((dictionary, index)) = self.dictionary.position(value) {
            self.buf.put_u8(tags::DICTIONARY_0 + dictionary);
            self.buf.put_u8(index);
            return Ok(());
        }
        // One `@` only: a nested pair would recurse once per separator.
        if let Some((user, server)) = value.split_once('@') {
            if !user.is_empty() && !server.is_empty() && !server.contains('@') {
                self.buf.put_u8(tags::JID_PAIR);
                self.write_string(user)?;
                return self.write_string(server);
            }
        }
        if is_packable(value) {
            self.write_packed(value);
            return Ok(());
        }
        self.write_binary(value.as_bytes())
    }

    fn write_packed(&mut self, digits: &str) {
        let count = digits.len().div_ceil(2);
        let trim = if digits.len() % 2 == 1 { 0x80 } else { 0 };
        self.buf.put_u8(tags::NIBBLE_8);
        self.buf.put_u8(trim | count as u8);

        let mut nibbles = digits.bytes().map(nibble_of).chain(std::iter::once(0x0F));
        for _ in 0..count {
            let high = nibbles.next().unwrap_or(0x0F);
            let low = nibbles.next().unwrap_or(0x0F);
            self.buf.put_u8((high << 4) | low);
        }
    }

    fn write_binary(&mut self, bytes: &[u8]) -> Result<()> {
        let length = bytes.len();
        if length < 256 {
            self.buf.put_u8(tags::BINARY_8);
            self.buf.put_u8(length as u8);
        } else if length < 1 << 20 {
            self.buf.put_u8(tags::BINARY_20);
            self.buf.put_u8(((length >> 16) & 0x0F) as u8);
            self.buf.put_u16((length & 0xFFFF) as u16);
        } else if let Ok(length) = u32::try_from(length) {
            self.buf.put_u8(tags::BINARY_32);
            self.buf.put_u32(length);
        } else {
            return Err(ProtocolError::MalformedNode("binary too long"));
        }
        self.buf.put_slice(bytes);
        Ok(())
    }
}

fn is_packable(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_PACKED_DIGITS
        && value.bytes().all(|b| b.is_ascii_digit() || b == b'-' || b == b'.')
}

fn nibble_of(byte: u8) -> u8 {
    match byte {
        b'-' => 10,
        b'.' => 11,
        digit => digit - b'0',
    }
}
