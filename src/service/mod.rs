//! # Session Service
//!
//! [`SessionClient`] drives one connection from `init` to an online session
//! and keeps it alive. It works over any [`Transport`](crate::transport::Transport).

pub mod client;

pub use client::{OnlineInfo, PairingCode, PendingResponse, SessionClient, SessionState};
