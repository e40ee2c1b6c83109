//! Unified error type for Duel.

use duel_protocol::ProtocolError;
use duel_session::{RequestError, SessionError};
use duel_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `duel` meta-crate, you deal with this single error type
/// instead of importing errors from each sub-crate. The `#[from]`
/// attribute on each variant generates the `From` impls, so `?` converts
/// sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum DuelError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (reserved address, duplicate request).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// An outgoing request failed.
    #[error(transparent)]
    Request(#[from] RequestError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let duel_err: DuelError = err.into();
        assert!(matches!(duel_err, DuelError::Transport(_)));
        assert!(duel_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let duel_err: DuelError = err.into();
        assert!(matches!(duel_err, DuelError::Protocol(_)));
    }

    #[test]
    fn test_from_session_error() {
        let err = SessionError::ReservedAddress("@cancel".into());
        let duel_err: DuelError = err.into();
        assert!(matches!(duel_err, DuelError::Session(_)));
        assert!(duel_err.to_string().contains("@cancel"));
    }

    #[test]
    fn test_from_request_error() {
        let duel_err: DuelError = RequestError::Disconnected.into();
        assert!(matches!(duel_err, DuelError::Request(_)));
    }
}
