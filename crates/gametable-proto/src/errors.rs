//! Protocol error types.

/// Errors from encoding or decoding events.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Event could not be encoded to CBOR.
    #[error("encode error: {0}")]
    Encode(String),

    /// Received bytes are not a valid CBOR event.
    #[error("decode error: {0}")]
    Decode(String),
}
