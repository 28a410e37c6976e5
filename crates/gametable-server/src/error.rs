//! Server error types.
//!
//! Provides strongly-typed errors for server operations:
//! - Connection lifecycle (registration, lookup)
//! - Event handling (state machine rejections, room membership)
//! - Persistence (document load and flush)

use std::fmt;

use gametable_core::StateError;
use gametable_proto::ConnectionId;

use crate::storage::StoreError;

/// Errors that can occur during server operations.
#[derive(Debug)]
pub enum ServerError {
    /// Connection not found.
    ///
    /// Occurs when handling an event for a connection the coordinator never
    /// registered, or one already torn down. Transient if the client races
    /// its own disconnect; otherwise a caller bug.
    ConnectionNotFound(ConnectionId),

    /// The connection's lifecycle state does not permit the event.
    ///
    /// Wraps [`StateError`]. The client receives a rejection event; the
    /// connection stays open.
    State(StateError),

    /// Storage operation failed.
    ///
    /// Wraps errors from the document store (seeding a room, flushing on
    /// drain). May be transient (I/O errors) or fatal (serialization).
    Store(StoreError),

    /// Event encoding/decoding error.
    ///
    /// Invalid event received from a client or failed to encode a response.
    /// Fatal for that connection.
    Protocol(String),

    /// Low-level network I/O error.
    ///
    /// Bind, accept, or socket failures. Check the message for details.
    Io(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionNotFound(id) => write!(f, "connection not found: {id}"),
            Self::State(err) => write!(f, "invalid event for connection state: {err}"),
            Self::Store(err) => write!(f, "storage error: {err}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Io(msg) => write!(f, "i/o error: {msg}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::State(err) => Some(err),
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StateError> for ServerError {
    fn from(err: StateError) -> Self {
        Self::State(err)
    }
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl From<gametable_proto::ProtocolError> for ServerError {
    fn from(err: gametable_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
