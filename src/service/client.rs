//! Session client.
//!
//! Owns the transport, the [`SessionCrypto`] and the [`MessageCorrelator`] of
//! one connection and drives them through the session lifecycle:
//!
//! ```text
//! Disconnected -> Connecting -> AwaitingAuth -> Authenticated -> Online -> Disconnected
//!                                    \                        /
//!                                     AwaitingChallengeResponse
//! (any) -> Destroyed
//! ```
//!
//! All frame handling happens on the task that calls into the client. Waiting
//! for a response pumps the transport, so several requests may be outstanding
//! at once and each completes when the server names its tag.
//!
//! Events are published on one broadcast channel per kind. Subscribe before
//! calling [`SessionClient::connect`] to observe the pairing code.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::ClientConfig;
use crate::core::decoder::decode_with;
use crate::core::encoder::encode_with;
use crate::core::node::Node;
use crate::core::token::TokenDictionary;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::correlator::MessageCorrelator;
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::handshake::SessionCrypto;
use crate::protocol::message::{
    control_request, encrypted_frame, ConnInfo, ControlMessage, ControlPayload, IncomingFrame,
    HEARTBEAT,
};
use crate::protocol::session::SessionRecord;
use crate::transport::{Transport, WireMessage};
use crate::utils::metrics::Metrics;
use crate::utils::timeout::{deadline_after, sleep_until_deadline};

const EVENT_CAPACITY: usize = 16;

/// Lifecycle state of a [`SessionClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    AwaitingAuth,
    Authenticated,
    AwaitingChallengeResponse,
    Online,
    Destroyed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::AwaitingAuth => "awaiting_auth",
            SessionState::Authenticated => "authenticated",
            SessionState::AwaitingChallengeResponse => "awaiting_challenge_response",
            SessionState::Online => "online",
            SessionState::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data a phone needs to pair with this client, usually shown as a QR code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingCode {
    pub reference: String,
    pub public_key: String,
    pub client_id: String,
    /// How long the server keeps the reference valid, if it said so.
    pub ttl: Option<u64>,
}

impl fmt::Display for PairingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.reference, self.public_key, self.client_id)
    }
}

/// Account details carried by the authentication message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OnlineInfo {
    pub wid: Option<String>,
    pub pushname: Option<String>,
}

struct Events {
    pairing: broadcast::Sender<PairingCode>,
    challenged: broadcast::Sender<()>,
    online: broadcast::Sender<OnlineInfo>,
    offline: broadcast::Sender<()>,
    session_updated: broadcast::Sender<SessionRecord>,
}

impl Events {
    fn new() -> Self {
        Self {
            pairing: broadcast::channel(EVENT_CAPACITY).0,
            challenged: broadcast::channel(EVENT_CAPACITY).0,
            online: broadcast::channel(EVENT_CAPACITY).0,
            offline: broadcast::channel(EVENT_CAPACITY).0,
            session_updated: broadcast::channel(EVENT_CAPACITY).0,
        }
    }
}

/// A request on the wire whose response has not been collected yet.
#[derive(Debug)]
pub struct PendingResponse {
    tag: String,
    rx: oneshot::Receiver<ControlPayload>,
}

impl PendingResponse {
    pub fn tag(&self) -> &str {
        &self.tag
    }
}

pub struct SessionClient<T: Transport> {
    transport: T,
    crypto: SessionCrypto,
    correlator: MessageCorrelator<ControlPayload>,
    dispatcher: Dispatcher,
    dictionary: TokenDictionary,
    config: ClientConfig,
    state: SessionState,
    heartbeat: Option<Interval>,
    pending_challenge: Option<String>,
    metrics: Arc<Metrics>,
    events: Events,
}

impl<T: Transport> SessionClient<T> {
    /// Wrap an already open transport. Nothing is sent until [`connect`](Self::connect).
    pub fn new(transport: T, crypto: SessionCrypto, config: ClientConfig) -> Self {
        Self {
            transport,
            crypto,
            correlator: MessageCorrelator::new(),
            dispatcher: Dispatcher::new(),
            dictionary: TokenDictionary::new(),
            config,
            state: SessionState::Disconnected,
            heartbeat: None,
            pending_challenge: None,
            metrics: Arc::new(Metrics::new()),
            events: Events::new(),
        }
    }

    /// Resume a persisted session over `transport`.
    pub fn restore(transport: T, record: &SessionRecord, config: ClientConfig) -> Result<Self> {
        Ok(Self::new(transport, SessionCrypto::restore(record)?, config))
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn crypto(&self) -> &SessionCrypto {
        &self.crypto
    }

    /// Current credentials, for external persistence.
    pub fn session_record(&self) -> SessionRecord {
        self.crypto.serialize()
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Handler registry for decoded nodes.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Replace the extension token dictionaries used for encrypted frames.
    pub fn set_token_dictionary(&mut self, dictionary: TokenDictionary) {
        self.dictionary = dictionary;
    }

    /// Number of requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.correlator.len()
    }

    pub fn subscribe_pairing(&self) -> broadcast::Receiver<PairingCode> {
        self.events.pairing.subscribe()
    }

    pub fn subscribe_challenged(&self) -> broadcast::Receiver<()> {
        self.events.challenged.subscribe()
    }

    pub fn subscribe_online(&self) -> broadcast::Receiver<OnlineInfo> {
        self.events.online.subscribe()
    }

    pub fn subscribe_offline(&self) -> broadcast::Receiver<()> {
        self.events.offline.subscribe()
    }

    pub fn subscribe_session_updated(&self) -> broadcast::Receiver<SessionRecord> {
        self.events.session_updated.subscribe()
    }

    /// Announce the client and either resume the stored session or start pairing.
    ///
    /// # Errors
    /// `ConfigError` for a zero heartbeat interval; `ProtocolStatus` when the
    /// server rejects `init` or `login`. The transport is closed on any
    /// failure after the first request.
    #[instrument(skip(self), fields(client_id = %self.crypto.client_id_base64()))]
    pub async fn connect(&mut self) -> Result<()> {
        match self.state {
            SessionState::Disconnected => {}
            SessionState::Destroyed => {
                return Err(ProtocolError::InvalidState(constants::ERR_DESTROYED))
            }
            _ => return Err(ProtocolError::InvalidState(constants::ERR_ALREADY_CONNECTED)),
        }
        if self.config.heartbeat_interval.is_zero() {
            return Err(ProtocolError::ConfigError(
                constants::ERR_HEARTBEAT_ZERO.to_string(),
            ));
        }

        self.state = SessionState::Connecting;
        let period = self.config.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some(heartbeat);

        match self.open_session().await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(error = %e, "connect failed");
                self.abort().await;
                Err(e)
            }
        }
    }

    async fn open_session(&mut self) -> Result<()> {
        let init = json!([
            "admin",
            "init",
            self.config.client_version,
            self.config.platform,
            self.crypto.client_id_base64(),
            self.config.reconnect_capable,
        ]);
        let response = self.query(init).await?;
        check_status("init", &response)?;
        self.state = SessionState::AwaitingAuth;

        if self.crypto.usable() {
            let login = json!([
                "admin",
                "login",
                self.crypto.client_token(),
                self.crypto.server_token(),
                self.crypto.client_id_base64(),
                "takeover",
            ]);
            let response = self.query(login).await?;
            check_status("login", &response)?;
            if self.state == SessionState::AwaitingAuth {
                self.state = SessionState::Authenticated;
            }
            info!("session takeover accepted");
        } else {
            let body = response.as_json();
            let reference = body
                .and_then(|b| b.get("ref"))
                .and_then(Value::as_str)
                .ok_or(ProtocolError::HandshakeError(constants::ERR_PAIRING_REF_MISSING))?;
            let code = PairingCode {
                reference: reference.to_owned(),
                public_key: self.crypto.public_key_base64(),
                client_id: self.crypto.client_id_base64(),
                ttl: body.and_then(|b| b.get("ttl")).and_then(Value::as_u64),
            };
            info!(ttl = ?code.ttl, "waiting for pairing");
            let _ = self.events.pairing.send(code);
        }
        Ok(())
    }

    /// Process frames and heartbeats until the connection closes.
    ///
    /// Returns `Ok(())` when the peer closes the connection and the error
    /// when a fatal one ends it.
    #[instrument(skip(self))]
    pub async fn run(&mut self) -> Result<()> {
        self.ensure_connected()?;
        while self.pump_once(None).await? {}
        Ok(())
    }

    /// Send a control request and return the handle for its response.
    pub async fn send_request(&mut self, body: Value) -> Result<PendingResponse> {
        self.ensure_connected()?;
        let (tag, rx) = self.correlator.issue();
        self.metrics.request_issued();
        if let Err(e) = self.send_control(&tag, &body).await {
            self.correlator.cancel(&tag);
            return Err(e);
        }
        Ok(PendingResponse { tag, rx })
    }

    /// Process frames until the response for `pending` arrives.
    ///
    /// The deadline only interrupts waiting for the next message; a frame
    /// that has started processing is always handled to the end.
    ///
    /// # Errors
    /// `Timeout` once `response_timeout` passes (the request is forgotten);
    /// `ConnectionClosed` if the connection ends first.
    pub async fn wait_response(&mut self, pending: PendingResponse) -> Result<ControlPayload> {
        let PendingResponse { tag, mut rx } = pending;
        let deadline = deadline_after(self.config.response_timeout);
        let result = self.pump_until(&mut rx, deadline).await;
        if matches!(result, Err(ProtocolError::Timeout)) && self.correlator.cancel(&tag) {
            warn!(%tag, "request timed out");
            self.metrics.requests_evicted(1);
        }
        result
    }

    /// Send a control request and wait for its response.
    pub async fn query(&mut self, body: Value) -> Result<ControlPayload> {
        let pending = self.send_request(body).await?;
        self.wait_response(pending).await
    }

    /// Encode, encrypt and send a node. Returns the tag it went out with.
    pub async fn send_node(&mut self, node: &Node) -> Result<String> {
        self.ensure_connected()?;
        let plaintext = encode_with(node, &self.dictionary)?;
        let body = self.crypto.seal_frame(&plaintext)?;
        let tag = self.correlator.next_tag();
        self.send(WireMessage::Binary(encrypted_frame(&tag, &body)))
            .await?;
        debug!(%tag, description = node.description(), "sent node");
        Ok(tag)
    }

    /// Close the transport, drop pending requests and refuse further use.
    #[instrument(skip(self))]
    pub async fn destroy(&mut self) -> Result<()> {
        if self.state == SessionState::Destroyed {
            return Ok(());
        }
        if let Err(e) = self.transport.close().await {
            warn!(error = %e, "transport close failed");
        }
        self.on_closed();
        self.state = SessionState::Destroyed;
        self.metrics.log_summary();
        info!("session destroyed");
        Ok(())
    }

    fn ensure_connected(&self) -> Result<()> {
        match self.state {
            SessionState::Destroyed => Err(ProtocolError::InvalidState(constants::ERR_DESTROYED)),
            SessionState::Disconnected => {
                Err(ProtocolError::InvalidState(constants::ERR_NOT_CONNECTED))
            }
            _ => Ok(()),
        }
    }

    async fn send(&mut self, message: WireMessage) -> Result<()> {
        self.transport.send(message).await?;
        self.metrics.frame_sent();
        Ok(())
    }

    async fn send_control(&mut self, tag: &str, body: &Value) -> Result<()> {
        trace!(%tag, "sending control request");
        self.send(WireMessage::Text(control_request(tag, body)))
            .await
    }

    async fn pump_until(
        &mut self,
        rx: &mut oneshot::Receiver<ControlPayload>,
        deadline: Option<Instant>,
    ) -> Result<ControlPayload> {
        loop {
            match rx.try_recv() {
                Ok(payload) => return Ok(payload),
                Err(oneshot::error::TryRecvError::Closed) => {
                    return Err(ProtocolError::ConnectionClosed)
                }
                Err(oneshot::error::TryRecvError::Empty) => {}
            }
            if !self.pump_once(deadline).await? {
                return Err(ProtocolError::ConnectionClosed);
            }
        }
    }

    /// Handle one transport message or heartbeat tick. `false` once closed.
    ///
    /// `deadline` races only the wait; the chosen branch always runs to completion.
    async fn pump_once(&mut self, deadline: Option<Instant>) -> Result<bool> {
        tokio::select! {
            message = self.transport.recv() => match message {
                Ok(Some(message)) => {
                    self.process(message).await?;
                    Ok(true)
                }
                Ok(None) => {
                    info!("connection closed by peer");
                    self.on_closed();
                    Ok(false)
                }
                Err(e) => {
                    error!(error = %e, "transport failed");
                    self.on_closed();
                    Err(e)
                }
            },
            _ = next_tick(&mut self.heartbeat) => {
                if let Err(e) = self.on_heartbeat().await {
                    error!(error = %e, "heartbeat failed");
                    self.on_closed();
                    return Err(e);
                }
                Ok(true)
            }
            _ = sleep_until_deadline(deadline) => Err(ProtocolError::Timeout),
        }
    }

    async fn on_heartbeat(&mut self) -> Result<()> {
        self.send(WireMessage::Text(HEARTBEAT.to_owned())).await?;
        self.metrics.heartbeat_sent();
        if let Some(max_age) = self.config.response_timeout {
            let evicted = self.correlator.evict_expired(max_age);
            self.metrics.requests_evicted(evicted as u64);
        }
        Ok(())
    }

    /// Handle one message; fatal errors end the connection, others drop the frame.
    async fn process(&mut self, message: WireMessage) -> Result<()> {
        self.metrics.frame_received();
        match self.handle_message(message).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => {
                error!(error = %e, state = %self.state, "fatal error, closing connection");
                self.abort().await;
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, decode = e.is_decode_error(), "dropping frame");
                self.metrics.decode_failure();
                Ok(())
            }
        }
    }

    async fn handle_message(&mut self, message: WireMessage) -> Result<()> {
        match IncomingFrame::parse(message)? {
            IncomingFrame::HeartbeatAck => {
                trace!("heartbeat acknowledged");
                self.metrics.heartbeat_ack();
                Ok(())
            }
            IncomingFrame::Control { tag, payload } => {
                self.metrics.control_frame();
                self.handle_control(tag, payload).await
            }
            IncomingFrame::Encrypted { tag, body } => {
                self.metrics.encrypted_frame();
                self.handle_encrypted(&tag, &body)
            }
        }
    }

    async fn handle_control(&mut self, tag: String, payload: ControlPayload) -> Result<()> {
        match payload.classify() {
            ControlMessage::Ignored(category) => {
                debug!(%category, "ignoring control message");
                Ok(())
            }
            ControlMessage::Authentication(info) => self.on_authentication(info),
            ControlMessage::Challenge(challenge) => self.on_challenge(&challenge).await,
            ControlMessage::Response if self.pending_challenge.as_deref() == Some(tag.as_str()) => {
                self.pending_challenge = None;
                check_status("challenge", &payload)?;
                self.state = SessionState::Online;
                info!("challenge accepted");
                Ok(())
            }
            ControlMessage::Response => match self.correlator.resolve(&tag, payload) {
                Ok(()) => {
                    self.metrics.response_matched();
                    Ok(())
                }
                Err(ProtocolError::UnexpectedMessage(tag)) => {
                    warn!(%tag, "response matches no pending request");
                    self.metrics.unexpected_response();
                    Ok(())
                }
                Err(e) => Err(e),
            },
        }
    }

    fn on_authentication(&mut self, info: ConnInfo) -> Result<()> {
        let (Some(server_token), Some(client_token)) = (&info.server_token, &info.client_token)
        else {
            return Err(ProtocolError::HandshakeError(constants::ERR_TOKENS_MISSING));
        };
        self.crypto.set_server_token(server_token)?;
        self.crypto.set_client_token(client_token)?;

        if !self.crypto.usable() {
            let secret = info
                .secret
                .as_deref()
                .ok_or(ProtocolError::HandshakeError(constants::ERR_SECRET_MISSING))?;
            if let Err(e) = self.crypto.build_new_pair_base64(secret) {
                self.metrics.handshake_failed();
                if matches!(e, ProtocolError::SignatureMismatch) {
                    self.metrics.signature_failure();
                }
                return Err(e);
            }
            self.metrics.handshake_success();
        }

        self.state = SessionState::Online;
        info!(wid = ?info.wid, "session online");
        let _ = self.events.online.send(OnlineInfo {
            wid: info.wid,
            pushname: info.pushname,
        });
        let _ = self.events.session_updated.send(self.crypto.serialize());
        Ok(())
    }

    async fn on_challenge(&mut self, challenge: &str) -> Result<()> {
        let challenge = STANDARD
            .decode(challenge)
            .map_err(|_| ProtocolError::MalformedFrame(constants::ERR_CHALLENGE_ENCODING))?;
        let server_token = self
            .crypto
            .server_token()
            .ok_or(ProtocolError::SessionNotReady)?
            .to_owned();
        let signature = self.crypto.hmac(&challenge)?;

        let mut signed = Vec::with_capacity(signature.len() + challenge.len());
        signed.extend_from_slice(&signature);
        signed.extend_from_slice(&challenge);
        let body = json!([
            "admin",
            "challenge",
            STANDARD.encode(signed),
            server_token,
            self.crypto.client_id_base64(),
        ]);

        let tag = self.correlator.next_tag();
        self.state = SessionState::AwaitingChallengeResponse;
        self.pending_challenge = Some(tag.clone());
        self.send_control(&tag, &body).await?;
        self.metrics.challenge_answered();
        debug!(%tag, "answered challenge");
        let _ = self.events.challenged.send(());
        Ok(())
    }

    fn handle_encrypted(&mut self, tag: &str, body: &[u8]) -> Result<()> {
        let plaintext = match self.crypto.open_frame(body) {
            Ok(plaintext) => plaintext,
            Err(ProtocolError::SignatureMismatch) => {
                self.metrics.signature_failure();
                return Err(ProtocolError::SignatureMismatch);
            }
            Err(e) => return Err(e),
        };
        let node = decode_with(&plaintext, &self.dictionary)?;
        trace!(%tag, description = node.description(), kind = ?node.kind(), "decoded node");

        if self.dispatcher.dispatch(&node)? {
            self.metrics.node_dispatched();
        } else {
            debug!(
                %tag,
                description = node.description(),
                kind = ?node.kind(),
                "no handler for node"
            );
        }
        Ok(())
    }

    async fn abort(&mut self) {
        if let Err(e) = self.transport.close().await {
            debug!(error = %e, "transport close failed");
        }
        self.on_closed();
    }

    fn on_closed(&mut self) {
        let was_connected = !matches!(
            self.state,
            SessionState::Disconnected | SessionState::Destroyed
        );
        let dropped = self.correlator.clear();
        if dropped > 0 {
            debug!(dropped, "dropped pending requests");
        }
        self.pending_challenge = None;
        self.heartbeat = None;
        if was_connected {
            self.state = SessionState::Disconnected;
            let _ = self.events.offline.send(());
        }
    }
}

impl<T: Transport> fmt::Debug for SessionClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionClient")
            .field("state", &self.state)
            .field("crypto", &self.crypto)
            .field("pending_requests", &self.correlator.len())
            .finish()
    }
}

fn check_status(request: &str, payload: &ControlPayload) -> Result<()> {
    if payload.is_success() {
        return Ok(());
    }
    Err(ProtocolError::ProtocolStatus {
        request: request.to_owned(),
        status: payload.status().unwrap_or_else(|| String::from("missing")),
    })
}

async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
