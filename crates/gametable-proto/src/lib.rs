//! Event surface and shared data model for the gametable coordinator.
//!
//! The coordinator's contract with its collaborators is a pair of typed event
//! enums, not raw wire bytes: [`ClientEvent`] flows from a connection into the
//! coordinator, [`ServerEvent`] flows back out to every connection subscribed
//! to a room. Transport is delegated to whatever adapter carries the events;
//! this crate only fixes their shapes and their CBOR encoding.
//!
//! We chose CBOR because it's self-describing (field names embedded), compact,
//! and doesn't need code generation. The same encoding is reused for durable
//! game documents, so a flushed document and a wire snapshot are byte-wise
//! consistent.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod errors;
mod event;
mod types;

pub use errors::ProtocolError;
pub use event::{ClientEvent, ServerEvent};
pub use types::{
    ConnectionId, GameDocument, LogEntry, Member, PlayerId, PlayerIdentity, RoomId, RoomSnapshot,
    TokenPlacement,
};
