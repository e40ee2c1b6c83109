//! The envelope: the one unit that travels on the wire.
//!
//! ```text
//! {
//!   "correlationId": "6f1c…-…",   ← pairs a request with its answer
//!   "address":       "invite",     ← "@response", "@cancel", or a route
//!   "verb":          "request",    ← operation (or outcome for responses)
//!   "payload":       "{\"opponent\":\"bob\"}"   ← nested JSON text
//! }
//! ```
//!
//! The payload is carried as a string and is not interpreted here. Only
//! the controller that handles a route knows its body type, and it decodes
//! the body on demand with [`Envelope::body`].

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Codec, JsonCodec, ProtocolError};

/// Reserved addresses.
pub mod address {
    /// "This envelope answers the request with the same correlation id."
    pub const RESPONSE: &str = "@response";

    /// "Stop working on the request with the same correlation id."
    pub const CANCEL: &str = "@cancel";

    /// Returns `true` for addresses the session layer keeps for itself.
    ///
    /// Every address starting with `@` is reserved, not just the two in
    /// use today, so application routes can never collide with a future
    /// control channel.
    pub fn is_reserved(address: &str) -> bool {
        address.starts_with('@')
    }
}

/// Reserved verbs under the reserved addresses.
pub mod verb {
    /// Under [`address::RESPONSE`](super::address::RESPONSE): the payload is the result.
    pub const SUCCESS: &str = "success";

    /// Under [`address::RESPONSE`](super::address::RESPONSE): the payload is a
    /// [`FailureBody`](crate::FailureBody).
    pub const FAILURE: &str = "failure";

    /// Under [`address::CANCEL`](super::address::CANCEL).
    pub const CANCEL: &str = "cancel";
}

/// Identifies one outstanding request for the lifetime of a session.
///
/// Serialized as the hyphenated UUID string, e.g.
/// `"67e55044-10b1-426f-9247-bb680e5fe0c8"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generates a fresh random (v4) id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// How the session should treat an inbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// Answers one of our outgoing requests.
    Response,
    /// Asks us to abort one of the requests we are handling.
    Cancellation,
    /// A new request for an application controller.
    Request,
}

/// The top-level wire message. Every frame carries exactly one envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub correlation_id: CorrelationId,
    pub address: String,
    pub verb: String,
    /// Encoded body. Empty means "no body".
    #[serde(default)]
    pub payload: String,
}

impl Envelope {
    /// Builds an envelope from its parts.
    pub fn new(
        correlation_id: CorrelationId,
        address: impl Into<String>,
        verb: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id,
            address: address.into(),
            verb: verb.into(),
            payload: payload.into(),
        }
    }

    /// Builds the cancellation signal for `correlation_id`.
    pub fn cancel(correlation_id: CorrelationId) -> Self {
        Self::new(correlation_id, address::CANCEL, verb::CANCEL, "")
    }

    /// Classifies the envelope by its address.
    pub fn kind(&self) -> EnvelopeKind {
        match self.address.as_str() {
            address::RESPONSE => EnvelopeKind::Response,
            address::CANCEL => EnvelopeKind::Cancellation,
            _ => EnvelopeKind::Request,
        }
    }

    /// Decodes the payload as `T`.
    ///
    /// # Errors
    /// Returns `ProtocolError::MalformedMessage` if the payload isn't a
    /// valid encoding of `T`.
    pub fn body<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        JsonCodec.decode_body(&self.payload)
    }

    /// Encodes the envelope into one frame.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        JsonCodec.encode(self)
    }

    /// Decodes one frame into an envelope.
    ///
    /// # Errors
    /// Returns `ProtocolError::MalformedMessage` for anything that isn't a
    /// well-formed envelope.
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        JsonCodec.decode(frame)
    }
}
