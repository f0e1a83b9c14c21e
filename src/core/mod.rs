//! # Core Protocol Components
//!
//! The binary node format carried inside encrypted frames.
//!
//! ## Components
//! - **Token**: compiled single-byte table, tag values and the runtime extension dictionaries
//! - **Node**: the decoded tree (description, attributes, content)
//! - **Decoder**: bounds-checked reader for untrusted plaintext
//! - **Encoder**: writer for outgoing nodes
//!
//! ## Wire Format
//! ```text
//! node    := list-size-tag  description  (key value){n}  [content]
//! content := list | binary | string
//! list    := LIST_EMPTY | LIST_8 u8 node* | LIST_16 u16be node*
//! string  := token | DICTIONARY_d u8 | JID_PAIR string string
//!          | NIBBLE_8/HEX_8 len packed | BINARY_8/20/32 len bytes
//! ```
//!
//! A node with list size `s` carries `(s - 1) / 2` attribute pairs and has
//! content only when `s` is even.
//!
//! ## Security
//! - Every read is bounds-checked before slicing
//! - Allocation is capped by the bytes actually remaining in the input
//! - Nesting depth is limited to [`decoder::MAX_NESTING_DEPTH`]

pub mod decoder;
pub mod encoder;
pub mod node;
pub mod token;

pub use decoder::{decode, decode_with, Decoder};
pub use encoder::{encode, encode_with, Encoder};
pub use node::{Attributes, Node, NodeContent};
pub use token::TokenDictionary;
