//! Typed error definitions for the price-feed system.
//!
//! Each layer gets its own enum so callers can branch on the failure class:
//!
//! - [`ConnectError`] — DNS/TCP/TLS failures while opening the feed socket.
//!   Fatal to the attempt, never retried internally.
//! - [`DecodeError`] — a single line could not be turned into a message.
//!   Logged and skipped by the read loop.
//! - [`RequestError`] — a correlated request failed (timeout, rejection,
//!   connection closed, not authenticated).
//! - [`StoreError`] — a persistence write failed, split into transient
//!   (retryable) and fatal.

use thiserror::Error;

/// Failure to establish the encrypted feed socket.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// DNS resolution or TCP connect failed.
    #[error("tcp connect to {addr} failed: {source}")]
    Tcp {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// TLS handshake or certificate validation failed.
    #[error("tls handshake with {host} failed: {reason}")]
    Tls { host: String, reason: String },

    /// The connect + handshake did not finish within the configured bound.
    #[error("connect to {addr} timed out")]
    Timeout { addr: String },
}

/// Failure to decode one line into a protocol message.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The line is not valid JSON or does not match the variant's shape.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The `op` discriminator names a message outside the supported set.
    #[error("unknown op `{0}`")]
    UnknownOp(String),

    /// The object carries no `op` field at all.
    #[error("message has no op discriminator")]
    MissingOp,
}

/// Failure of a request sent through the correlator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    /// No response arrived before the request deadline.
    #[error("request {id} ({op}) timed out")]
    Timeout { id: u64, op: &'static str },

    /// The connection closed (or was never open) while the request was pending.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation requires a completed authentication handshake.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The feed answered with a non-success status.
    #[error("request {id} rejected: {} {}", .error_code.as_deref().unwrap_or("-"), .error_message.as_deref().unwrap_or(""))]
    Rejected {
        id: u64,
        error_code: Option<String>,
        error_message: Option<String>,
    },

    /// Writing the encoded line to the socket failed.
    #[error("socket write failed: {0}")]
    Io(String),
}

/// Failure of a single persistence write.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// Lock contention, busy database, pool exhaustion or I/O; retried.
    #[error("transient store error: {0}")]
    Transient(String),

    /// Schema, constraint or type error; not retried.
    #[error("store error: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
