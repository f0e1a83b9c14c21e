//! # Error Types
//!
//! Error handling for the binary codec, session crypto and session client.
//!
//! Every failure on an expected path is returned as a [`ProtocolError`] value;
//! nothing in this crate panics on untrusted input.
//!
//! ## Error Categories
//! - **Decode Errors**: truncated streams, unknown tags and tokens, malformed nodes
//! - **Crypto Errors**: invalid identity material, integrity (HMAC) failures,
//!   AES failures during the handshake or on incoming frames
//! - **Session Errors**: non-success status on `init`/`login`, responses nobody
//!   is waiting for, operations in the wrong lifecycle state
//! - **Transport Errors**: socket failures reported by the transport layer
//!
//! ## Fatality
//! [`ProtocolError::is_fatal`] decides whether a failure while handling a single
//! incoming frame ends the connection. Decode failures only drop the frame;
//! a signature mismatch always terminates the connection.
//!
//! ## Example Usage
//! ```rust
//! use wa_protocol::error::{ProtocolError, Result};
//! use tracing::{info, warn};
//!
//! fn parse_status(raw: &str) -> Result<u16> {
//!     raw.parse::<u16>().map_err(|_| ProtocolError::ProtocolStatus {
//!         request: "init".into(),
//!         status: raw.into(),
//!     })
//! }
//!
//! match parse_status("200") {
//!     Ok(status) => info!(status, "init accepted"),
//!     Err(e) => warn!(error = %e, fatal = e.is_fatal(), "init rejected"),
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Dispatcher-related error messages
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";

    /// Identity material errors
    pub const ERR_CLIENT_ID_EMPTY: &str = "client id is empty";
    pub const ERR_CLIENT_ID_LENGTH: &str = "client id must be 16 bytes";
    pub const ERR_SEED_EMPTY: &str = "ec keys seed is empty";
    pub const ERR_SEED_LENGTH: &str = "ec keys seed must be 32 bytes";
    pub const ERR_SESSION_KEY_LENGTH: &str = "session keys must be 32 bytes each";
    pub const ERR_TOKEN_EMPTY: &str = "token must be a non-empty string";
    pub const ERR_RNG_FAILURE: &str = "operating system RNG unavailable";

    /// Handshake errors
    pub const ERR_SECRET_TOO_SHORT: &str = "server secret shorter than 88 bytes";
    pub const ERR_SECRET_MISSING: &str = "authentication message carries no secret";
    pub const ERR_HKDF_EXPAND: &str = "HKDF expansion failed";
    pub const ERR_HMAC_KEY: &str = "HMAC key rejected";
    pub const ERR_KEY_MATERIAL_LENGTH: &str = "decrypted key material must be 64 bytes";
    pub const ERR_TOKENS_MISSING: &str = "authentication message carries no tokens";
    pub const ERR_PAIRING_REF_MISSING: &str = "init response carries no pairing reference";
    pub const ERR_CHALLENGE_ENCODING: &str = "challenge is not valid base64";

    /// Frame errors
    pub const ERR_FRAME_NO_SEPARATOR: &str = "frame has no tag separator";
    pub const ERR_FRAME_TOO_SHORT: &str = "encrypted frame shorter than signature";
    pub const ERR_CIPHERTEXT_TOO_SHORT: &str = "ciphertext shorter than IV";

    /// Lifecycle errors
    pub const ERR_ALREADY_CONNECTED: &str = "client is already connected";
    pub const ERR_DESTROYED: &str = "client has been destroyed";
    pub const ERR_NOT_CONNECTED: &str = "client is not connected";
    pub const ERR_DUPLICATE_TAG: &str = "correlation tag already pending";

    /// Configuration errors
    pub const ERR_HEARTBEAT_ZERO: &str = "heartbeat interval must be greater than zero";
}

/// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("end of stream reached")]
    EndOfStream,

    #[error("invalid tag {tag} at position {position}")]
    InvalidTag { tag: u8, position: usize },

    #[error("unknown token {index} in dictionary {dictionary:?}")]
    UnknownToken {
        /// `None` for the single-byte table, otherwise the extension dictionary id
        dictionary: Option<u8>,
        index: usize,
    },

    #[error("malformed node: {0}")]
    MalformedNode(&'static str),

    #[error("invalid jid pair: {user:?} @ {server:?}")]
    InvalidJid {
        user: Option<String>,
        server: Option<String>,
    },

    #[error("invalid packed digit {value} for tag {tag}")]
    InvalidPackedDigit { tag: u8, value: u8 },

    #[error("unexpected stream end inside a node")]
    UnexpectedStreamEnd,

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("invalid identity material: {0}")]
    CryptoConfig(&'static str),

    #[error("{request} failed with status {status}")]
    ProtocolStatus { request: String, status: String },

    #[error("unexpected message with tag {0}")]
    UnexpectedMessage(String),

    #[error("Handshake failed: {0}")]
    HandshakeError(&'static str),

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    #[error("session keys are not established")]
    SessionNotReady,

    #[error("operation not allowed in state {0}")]
    InvalidState(&'static str),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Whether this error, raised while handling one incoming frame, must
    /// terminate the connection rather than just drop the frame.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::SignatureMismatch
                | ProtocolError::ProtocolStatus { .. }
                | ProtocolError::Io(_)
                | ProtocolError::TransportError(_)
                | ProtocolError::ConnectionClosed
        )
    }

    /// Whether this error came out of the binary node decoder.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::EndOfStream
                | ProtocolError::InvalidTag { .. }
                | ProtocolError::UnknownToken { .. }
                | ProtocolError::MalformedNode(_)
                | ProtocolError::InvalidJid { .. }
                | ProtocolError::InvalidPackedDigit { .. }
                | ProtocolError::UnexpectedStreamEnd
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_mismatch_is_fatal() {
        assert!(ProtocolError::SignatureMismatch.is_fatal());
        assert!(!ProtocolError::SignatureMismatch.is_decode_error());
    }

    #[test]
    fn test_decode_errors_are_not_fatal() {
        let errors = [
            ProtocolError::EndOfStream,
            ProtocolError::InvalidTag {
                tag: 247,
                position: 3,
            },
            ProtocolError::UnknownToken {
                dictionary: Some(1),
                index: 12,
            },
            ProtocolError::MalformedNode("empty description"),
            ProtocolError::UnexpectedStreamEnd,
        ];
        for err in errors {
            assert!(err.is_decode_error(), "{err} should be a decode error");
            assert!(!err.is_fatal(), "{err} should not be fatal");
        }
    }

    #[test]
    fn test_status_error_display() {
        let err = ProtocolError::ProtocolStatus {
            request: "init".into(),
            status: "401".into(),
        };
        assert_eq!(err.to_string(), "init failed with status 401");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_lifecycle_errors_do_not_count_as_frame_failures() {
        // Raised by public calls, never while handling a frame.
        assert!(!ProtocolError::InvalidState(constants::ERR_DESTROYED).is_fatal());
        assert!(!ProtocolError::Timeout.is_fatal());
        assert!(ProtocolError::ConnectionClosed.is_fatal());
    }

    #[test]
    fn test_unexpected_message_is_not_fatal() {
        let err = ProtocolError::UnexpectedMessage("1690000000--3".into());
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "unexpected message with tag 1690000000--3");
    }
}
