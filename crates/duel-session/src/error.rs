//! Error types for the session layer.
//!
//! Three enums, one per audience:
//!
//! - [`SessionError`]: misuse or faults of the session itself.
//! - [`RequestError`]: what the caller of an outgoing request observes.
//! - [`HandlerError`]: what a controller reports when it can't produce a
//!   response; the session turns it into one.

use duel_protocol::{CorrelationId, FailureBody, ProtocolError, Response, StatusCode};
use duel_transport::TransportError;

/// Errors raised by session plumbing.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Reading or writing the underlying connection failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An envelope could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Application routes may not use the `@`-prefixed control addresses.
    #[error("address {0:?} is reserved for the session layer")]
    ReservedAddress(String),

    /// The peer reused a correlation id that is still being handled.
    #[error("request {0} is already in flight")]
    DuplicateRequest(CorrelationId),

    /// The session has been torn down.
    #[error("session is closed")]
    Closed,
}

/// The failure side of an outgoing request.
///
/// Remote failures are keyed by the status code in the peer's
/// [`FailureBody`]; local ones describe why we stopped waiting.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// The peer answered 401.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The peer has no controller or verb for this request (405).
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    /// The peer cancelled the work (408), or our own timeout elapsed.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The peer's resource was already released (410).
    #[error("resource gone: {0}")]
    Gone(String),

    /// Any other failure status from the peer.
    #[error("request failed with {status}: {message}")]
    Remote { status: StatusCode, message: String },

    /// The caller's cancellation token fired before a response arrived.
    #[error("request cancelled")]
    Cancelled,

    /// The session closed before a response arrived.
    #[error("disconnected")]
    Disconnected,

    /// The request could not be written.
    #[error(transparent)]
    Transport(TransportError),

    /// The request or its reply could not be encoded or decoded.
    #[error(transparent)]
    Protocol(ProtocolError),
}

impl RequestError {
    /// Maps a peer's failure body to a typed error.
    pub fn from_failure(failure: FailureBody) -> Self {
        let message = failure.error_message;
        match failure.http_status_code {
            StatusCode::UNAUTHORIZED => Self::Unauthorized(message),
            StatusCode::METHOD_NOT_ALLOWED => Self::MethodNotAllowed(message),
            StatusCode::REQUEST_TIMEOUT => Self::Timeout(message),
            StatusCode::GONE => Self::Gone(message),
            status => Self::Remote { status, message },
        }
    }

    /// The status code this error corresponds to, if it came from (or
    /// mirrors) a wire status.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Unauthorized(_) => Some(StatusCode::UNAUTHORIZED),
            Self::MethodNotAllowed(_) => Some(StatusCode::METHOD_NOT_ALLOWED),
            Self::Timeout(_) => Some(StatusCode::REQUEST_TIMEOUT),
            Self::Gone(_) => Some(StatusCode::GONE),
            Self::Remote { status, .. } => Some(*status),
            Self::Cancelled | Self::Disconnected | Self::Transport(_) | Self::Protocol(_) => None,
        }
    }
}

impl From<SessionError> for RequestError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Transport(e) => Self::Transport(e),
            SessionError::Protocol(e) => Self::Protocol(e),
            SessionError::Closed => Self::Disconnected,
            other => Self::Protocol(ProtocolError::InvalidMessage(other.to_string())),
        }
    }
}

/// A controller's reason for not producing a normal response.
///
/// The session converts each variant to a fixed response, so the peer
/// always gets an answer and the session keeps running.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The caller isn't allowed to do this. Answered with 401.
    #[error("unauthorized")]
    Unauthorized,

    /// The handler observed its cancellation token. Answered with 408.
    #[error("request was cancelled")]
    Cancelled,

    /// Something the handler needed has already been released.
    /// Answered with 410.
    #[error("resource is gone: {0}")]
    Gone(String),

    /// The request body didn't decode. Answered with 400.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Anything else. Answered with a generic 500.
    #[error("{0}")]
    Internal(String),
}

impl HandlerError {
    /// Wraps any displayable error as an internal failure.
    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal(err.to_string())
    }

    /// The response sent to the peer for this failure.
    ///
    /// Internal details stay in the logs; the peer only sees the fixed
    /// message for the class of failure.
    pub fn into_response(self) -> Response {
        match self {
            Self::Unauthorized => Response::unauthorized(),
            Self::Cancelled => {
                Response::error("Request was cancelled.", StatusCode::REQUEST_TIMEOUT)
            }
            Self::Gone(_) => Response::error("Resource is gone.", StatusCode::GONE),
            Self::BadRequest(message) => Response::error(message, StatusCode::BAD_REQUEST),
            Self::Internal(_) => Response::error(
                "Error in request processing.",
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        }
    }
}

impl From<ProtocolError> for HandlerError {
    fn from(err: ProtocolError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

/// Lets a controller forward a nested request's failure with `?`.
impl From<RequestError> for HandlerError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Unauthorized(_) => Self::Unauthorized,
            RequestError::Cancelled | RequestError::Timeout(_) => Self::Cancelled,
            RequestError::Disconnected => Self::Gone("peer disconnected".into()),
            RequestError::Gone(message) => Self::Gone(message),
            other => Self::Internal(other.to_string()),
        }
    }
}
