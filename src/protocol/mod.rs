//! # Session Protocol
//!
//! Everything above the binary codec and below the client state machine.
//!
//! ## Components
//! - **Handshake**: key agreement with the pairing secret, frame encryption and signing
//! - **Session**: the persisted credential record
//! - **Message**: classification of text and binary socket messages
//! - **Correlator**: request tags and the table of pending responses
//! - **Dispatcher**: routing of decoded nodes to registered handlers
//!
//! ## Frame Formats
//! ```text
//! control   := tag "," json
//! encrypted := tag "," hmac(32) iv(16) ciphertext
//! heartbeat := "?,,"        (sent)
//! ack       := "!" digits    (received)
//! ```
//!
//! ## Security
//! - Signatures are checked in constant time before anything is decrypted
//! - Private key, seed and session keys are zeroed on drop
//! - `Debug` output never contains key material

pub mod correlator;
pub mod dispatcher;
pub mod handshake;
pub mod message;
pub mod session;


pub use correlator::MessageCorrelator;
pub use dispatcher::Dispatcher;
pub use handshake::SessionCrypto;
pub use message::{ControlMessage, ControlPayload, IncomingFrame};
pub use session::SessionRecord;
