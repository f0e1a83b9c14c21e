//! # Transport Layer
//!
//! The session client talks to one message-oriented socket through the
//! [`Transport`] trait. Messages are either text (control frames, heartbeats)
//! or binary (encrypted frames).
//!
//! ## Implementations
//! - **memory**: in-process channel pair, used for embedding and tests
//! - **websocket**: `tokio-tungstenite` client (feature `websocket`)

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

pub mod memory;
#[cfg(feature = "websocket")]
pub mod websocket;

/// One whole message as delivered by the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Bytes),
}

impl WireMessage {
    pub fn len(&self) -> usize {
        match self {
            WireMessage::Text(text) => text.len(),
            WireMessage::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for WireMessage {
    fn from(text: String) -> Self {
        WireMessage::Text(text)
    }
}

impl From<&str> for WireMessage {
    fn from(text: &str) -> Self {
        WireMessage::Text(text.to_owned())
    }
}

impl From<Bytes> for WireMessage {
    fn from(data: Bytes) -> Self {
        WireMessage::Binary(data)
    }
}

/// A connected, message-oriented socket.
///
/// `recv` must be cancel safe: the session loop races it against the
/// heartbeat timer.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, message: WireMessage) -> Result<()>;

    /// Next message, or `None` once the peer has closed the connection.
    async fn recv(&mut self) -> Result<Option<WireMessage>>;

    async fn close(&mut self) -> Result<()>;
}
