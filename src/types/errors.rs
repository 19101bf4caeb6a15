//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use thiserror::Error;

use super::ids::ClientId;
use crate::protocol::CommandKind;
use crate::transport::ConnectionMethod;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the simlink client and server.
#[derive(Error, Debug)]
pub enum Error {
    /// Operation referenced an id with no live slot.
    #[error("client {0} is not connected")]
    NotConnected(ClientId),

    /// The registry already holds its maximum number of connections.
    #[error("connection capacity exceeded ({capacity} open connections)")]
    CapacityExceeded { capacity: usize },

    /// A second interactive connection was attempted.
    #[error("an interactive connection is already open, cannot connect with {0}")]
    ExclusivityViolation(ConnectionMethod),

    /// Post-connect synchronization did not complete.
    #[error("handshake failed for {method} connection: {reason}")]
    HandshakeFailed {
        method: ConnectionMethod,
        reason: String,
    },

    /// A submitted command did not return its expected completion.
    #[error("{kind} command failed: {reason}")]
    CommandFailed { kind: CommandKind, reason: String },

    /// The transport broke while a command was in flight.
    #[error("connection lost during {0} command")]
    Disconnected(CommandKind),

    /// The concrete transport could not be opened.
    #[error("failed to open {method} transport: {reason}")]
    TransportOpen {
        method: ConnectionMethod,
        reason: String,
    },

    /// Connection options did not fit the selected method.
    #[error("invalid connection options: {0}")]
    InvalidOptions(String),

    /// Peer violated the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Advisory transport time-out elapsed.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Msgpack encoding errors.
    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Msgpack decoding errors.
    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// JSON (de)serialization errors on RPC bodies.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable error code carried in RPC error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotConnected(_) => "NOT_CONNECTED",
            Error::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            Error::ExclusivityViolation(_) => "EXCLUSIVITY_VIOLATION",
            Error::HandshakeFailed { .. } => "HANDSHAKE_FAILED",
            Error::CommandFailed { .. } => "COMMAND_FAILED",
            Error::Disconnected(_) => "DISCONNECTED",
            Error::TransportOpen { .. } => "UNAVAILABLE",
            Error::InvalidOptions(_) => "INVALID_ARGUMENT",
            Error::Protocol(_) | Error::Encode(_) | Error::Decode(_) => "INVALID_ARGUMENT",
            Error::Timeout(_) => "DEADLINE_EXCEEDED",
            Error::Serialization(_) | Error::Io(_) => "INTERNAL",
        }
    }
}

// Convenience constructors
impl Error {
    pub fn transport_open(method: ConnectionMethod, reason: impl Into<String>) -> Self {
        Self::TransportOpen {
            method,
            reason: reason.into(),
        }
    }

    pub fn handshake(method: ConnectionMethod, reason: impl Into<String>) -> Self {
        Self::HandshakeFailed {
            method,
            reason: reason.into(),
        }
    }

    pub fn command_failed(kind: CommandKind, reason: impl Into<String>) -> Self {
        Self::CommandFailed {
            kind,
            reason: reason.into(),
        }
    }

    pub fn invalid_options(msg: impl Into<String>) -> Self {
        Self::InvalidOptions(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }
}
