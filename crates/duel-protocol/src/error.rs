//! Error types for the protocol layer.
//!
//! Each crate in Duel defines its own error enum. A `ProtocolError` always
//! means the bytes or the structure were wrong, never that the network
//! failed or a handler misbehaved.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust value into bytes).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// The bytes could not be decoded into the expected shape.
    ///
    /// Common causes: not JSON at all, missing envelope fields, a
    /// correlation id that isn't a UUID, or a body that doesn't match the
    /// type the handler asked for.
    #[error("malformed message: {0}")]
    MalformedMessage(serde_json::Error),

    /// The message decoded but violates protocol rules.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
