//! # wa-protocol
//!
//! Client side of the WhatsApp Web socket protocol.
//!
//! The crate is layered bottom-up:
//! - [`core`]: the token-compressed binary node format
//! - [`protocol`]: session crypto, frame classification, request correlation
//! - [`transport`]: the socket abstraction, with in-memory and WebSocket implementations
//! - [`service`]: the session client state machine
//!
//! ```no_run
//! use wa_protocol::config::ClientConfig;
//! use wa_protocol::protocol::SessionCrypto;
//! use wa_protocol::service::SessionClient;
//! use wa_protocol::transport::memory;
//!
//! # async fn run() -> wa_protocol::Result<()> {
//! let (transport, _server) = memory::pair();
//! let mut client = SessionClient::new(transport, SessionCrypto::generate()?, ClientConfig::default());
//! let mut pairing = client.subscribe_pairing();
//! client.connect().await?;
//! if let Ok(code) = pairing.try_recv() {
//!     println!("scan: {code}");
//! }
//! client.run().await
//! # }
//! ```

#![deny(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::core::node::{Attributes, Node, NodeContent};
pub use config::{ClientConfig, LoggingConfig, ProtocolConfig};
pub use error::{ProtocolError, Result};
pub use protocol::{SessionCrypto, SessionRecord};
pub use service::{SessionClient, SessionState};
