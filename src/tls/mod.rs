//! In-process TLS termination — the record bridge between the transport and
//! the request parser.
//!
//! Cryptography is delegated to rustls. This module owns only the framing:
//! ciphertext staging, the handshake drive loop, plaintext delivery and the
//! per-connection state machine.
//!
//! ```text
//! Handshaking ──► Established ──► ShuttingDown
//!      │               │
//!      └───────────────┴────────► Failed
//! ```
//!
//! ## Core types
//!
//! - [`TlsSession`] — one per accepted connection on a TLS listener.
//! - [`TlsState`] — where a session is in its lifecycle.
//! - [`TlsError`] — bridge failures, classified by [`TlsError::is_retryable`].
//! - [`TlsSettings`] / [`build_server_config`] — listener-wide rustls setup.

use thiserror::Error;

mod config;
mod session;

pub use config::{TlsConfigError, TlsSettings, TlsVersion, build_server_config};
pub use session::TlsSession;

/// Lifecycle of a [`TlsSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsState {
    /// Negotiating; application data cannot be sent yet.
    #[default]
    Handshaking,
    /// Handshake complete; records carry application data both ways.
    Established,
    /// A close_notify was sent or received. No further data is accepted.
    ShuttingDown,
    /// A fatal handshake or record error occurred. Terminal.
    Failed,
}

impl TlsState {
    /// Returns `true` for the two states no session ever leaves.
    pub fn is_terminal(self) -> bool {
        matches!(self, TlsState::ShuttingDown | TlsState::Failed)
    }
}

/// Errors produced by the TLS bridge.
#[derive(Debug, Error)]
pub enum TlsError {
    /// Application data was offered before the handshake completed.
    #[error("TLS session is not established")]
    NotEstablished,

    /// The handshake was rejected by the TLS engine.
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] rustls::Error),

    /// A record could not be decrypted or verified after the handshake.
    #[error("TLS record error: {0}")]
    Record(#[source] rustls::Error),

    /// Moving bytes in or out of the engine failed.
    #[error("TLS I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The session has already shut down or failed.
    #[error("TLS session is closed")]
    Closed,
}

impl TlsError {
    /// Returns `true` when the condition only means "not now": the engine
    /// wants more input or has output to flush. Every other error is fatal
    /// to the connection.
    pub fn is_retryable(&self) -> bool {
        match self {
            TlsError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}
