//! WebSocket transport.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, protocol::Message as WsMessage},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, instrument};

use crate::config::ClientConfig;
use crate::error::{ProtocolError, Result};
use crate::transport::{Transport, WireMessage};

pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WebSocketTransport {
    /// Open the socket at `config.endpoint`, presenting `config.origin`.
    #[instrument(skip(config), fields(endpoint = %config.endpoint))]
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let mut request = config
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| ProtocolError::TransportError(e.to_string()))?;
        let origin = HeaderValue::from_str(&config.origin)
            .map_err(|e| ProtocolError::ConfigError(e.to_string()))?;
        request.headers_mut().insert("Origin", origin);

        let (stream, response) = connect_async(request)
            .await
            .map_err(|e| ProtocolError::TransportError(e.to_string()))?;
        info!(status = %response.status(), "websocket connected");
        Ok(Self { stream })
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: WireMessage) -> Result<()> {
        let message = match message {
            WireMessage::Text(text) => WsMessage::Text(text),
            WireMessage::Binary(data) => WsMessage::Binary(data.to_vec()),
        };
        self.stream
            .send(message)
            .await
            .map_err(|e| ProtocolError::TransportError(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<WireMessage>> {
        while let Some(message) = self.stream.next().await {
            match message.map_err(|e| ProtocolError::TransportError(e.to_string()))? {
                WsMessage::Text(text) => return Ok(Some(WireMessage::Text(text))),
                WsMessage::Binary(data) => return Ok(Some(WireMessage::Binary(Bytes::from(data)))),
                WsMessage::Close(frame) => {
                    debug!(reason = ?frame.map(|f| f.reason.to_string()), "websocket closed by peer");
                    return Ok(None);
                }
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => continue,
            }
        }
        Ok(None)
    }

    async fn close(&mut self) -> Result<()> {
        self.stream
            .close(None)
            .await
            .map_err(|e| ProtocolError::TransportError(e.to_string()))
    }
}
