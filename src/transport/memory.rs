//! In-process transport over tokio channels.
//!
//! [`pair`] returns the client end, which implements [`Transport`], and a
//! [`MemoryPeer`] that plays the server.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{ProtocolError, Result};
use crate::transport::{Transport, WireMessage};

const CHANNEL_CAPACITY: usize = 64;

pub struct MemoryTransport {
    tx: Option<mpsc::Sender<WireMessage>>,
    rx: mpsc::Receiver<WireMessage>,
}

/// The far end of a [`MemoryTransport`].
pub struct MemoryPeer {
    tx: Option<mpsc::Sender<WireMessage>>,
    rx: mpsc::Receiver<WireMessage>,
}

pub fn pair() -> (MemoryTransport, MemoryPeer) {
    let (client_tx, peer_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (peer_tx, client_rx) = mpsc::channel(CHANNEL_CAPACITY);
    (
        MemoryTransport {
            tx: Some(client_tx),
            rx: client_rx,
        },
        MemoryPeer {
            tx: Some(peer_tx),
            rx: peer_rx,
        },
    )
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, message: WireMessage) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(ProtocolError::ConnectionClosed)?;
        tx.send(message)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    async fn recv(&mut self) -> Result<Option<WireMessage>> {
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self) -> Result<()> {
        if self.tx.take().is_some() {
            debug!("memory transport closed");
        }
        self.rx.close();
        Ok(())
    }
}

impl MemoryPeer {
    pub async fn send(&self, message: impl Into<WireMessage>) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(ProtocolError::ConnectionClosed)?;
        tx.send(message.into())
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Next message from the client, `None` once the client has closed.
    pub async fn recv(&mut self) -> Option<WireMessage> {
        self.rx.recv().await
    }

    /// Next text message from the client, skipping binary ones.
    pub async fn recv_text(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await? {
                WireMessage::Text(text) => return Some(text),
                WireMessage::Binary(_) => continue,
            }
        }
    }

    /// Hang up; the client's `recv` returns `None` once drained.
    pub fn close(&mut self) {
        self.tx = None;
    }
}
