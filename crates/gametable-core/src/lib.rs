//! Pure coordination logic for the gametable service.
//!
//! Everything in this crate is I/O-free and single-threaded: the session
//! registry, the room state (membership plus the cached game document), and
//! the per-connection lifecycle state machine. The runtime crate decides how
//! these are locked and shared; tests drive them directly.
//!
//! State machines here follow the action pattern where it matters: methods
//! take time as a parameter and return plain values, so behavior is
//! deterministic under test with virtual instants.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod connection;
pub mod env;
pub mod registry;
pub mod room;

pub use connection::{ConnectionState, StateError};
pub use env::Environment;
pub use registry::{BindOutcome, PlayerSession, SessionRegistry};
pub use room::{LOG_CAPACITY, GameState, LeaveOutcome, Room, StateOp};
