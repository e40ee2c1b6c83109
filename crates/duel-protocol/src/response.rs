//! Responses produced by controllers, and their wire form.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::envelope::{address, verb};
use crate::{CorrelationId, Envelope, JsonCodec, ProtocolError};

/// An HTTP-style status code carried in failure responses.
///
/// Newtype over `u16` so codes can't be confused with other integers;
/// serializes as the plain number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const OK: Self = Self(200);
    pub const BAD_REQUEST: Self = Self(400);
    pub const UNAUTHORIZED: Self = Self(401);
    pub const NOT_FOUND: Self = Self(404);
    pub const METHOD_NOT_ALLOWED: Self = Self(405);
    pub const REQUEST_TIMEOUT: Self = Self(408);
    pub const CONFLICT: Self = Self(409);
    pub const GONE: Self = Self(410);
    pub const INTERNAL_SERVER_ERROR: Self = Self(500);

    /// Returns the canonical reason phrase, if the code is one we name.
    pub fn reason(self) -> Option<&'static str> {
        Some(match self.0 {
            200 => "OK",
            400 => "Bad Request",
            401 => "Unauthorized",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            409 => "Conflict",
            410 => "Gone",
            500 => "Internal Server Error",
            _ => return None,
        })
    }

    /// `true` for 2xx codes.
    pub fn is_success(self) -> bool {
        (200..300).contains(&self.0)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason() {
            Some(reason) => write!(f, "{} {reason}", self.0),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Payload of a `"@response"` / `"failure"` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureBody {
    pub http_status_code: StatusCode,
    pub error_message: String,
}

/// The outcome of one handled request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Success, optionally with an encoded body.
    Ok(Option<String>),
    /// Failure with a message for the caller.
    Error { message: String, status: StatusCode },
}

impl Response {
    /// Success with no body.
    pub fn ok() -> Self {
        Self::Ok(None)
    }

    /// Success carrying `body`, encoded with the payload codec.
    pub fn ok_with<T: Serialize>(body: &T) -> Result<Self, ProtocolError> {
        Ok(Self::Ok(Some(JsonCodec.encode_body(body)?)))
    }

    /// Failure with the given message and status.
    pub fn error(message: impl Into<String>, status: StatusCode) -> Self {
        Self::Error {
            message: message.into(),
            status,
        }
    }

    /// The fixed "not allowed to do that" response.
    pub fn unauthorized() -> Self {
        Self::error("Unauthorized", StatusCode::UNAUTHORIZED)
    }

    /// The fixed response for unknown routes and verbs.
    pub fn method_not_allowed() -> Self {
        Self::error("Method not allowed", StatusCode::METHOD_NOT_ALLOWED)
    }

    /// The status this response reports on the wire.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Ok(_) => StatusCode::OK,
            Self::Error { status, .. } => *status,
        }
    }

    /// Converts the response into the envelope that answers `correlation_id`.
    pub fn into_envelope(
        self,
        correlation_id: CorrelationId,
    ) -> Result<Envelope, ProtocolError> {
        match self {
            Self::Ok(body) => Ok(Envelope::new(
                correlation_id,
                address::RESPONSE,
                verb::SUCCESS,
                body.unwrap_or_default(),
            )),
            Self::Error { message, status } => {
                let failure = FailureBody {
                    http_status_code: status,
                    error_message: message,
                };
                Ok(Envelope::new(
                    correlation_id,
                    address::RESPONSE,
                    verb::FAILURE,
                    JsonCodec.encode_body(&failure)?,
                ))
            }
        }
    }
}
