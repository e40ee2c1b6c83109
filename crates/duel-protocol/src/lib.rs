//! Wire protocol for Duel.
//!
//! This crate defines what two peers say to each other:
//!
//! - **Envelope** ([`Envelope`], [`CorrelationId`]): the unit on the wire,
//!   with the reserved [`address`] and [`verb`] values.
//! - **Responses** ([`Response`], [`StatusCode`], [`FailureBody`]): what a
//!   handler returns and how it is written back.
//! - **Codec** ([`Codec`], [`JsonCodec`]): bytes ↔ values, for envelopes
//!   and for the bodies nested inside them.
//! - **Schemas** ([`Method`]): typed bodies per address + verb.
//!
//! # Architecture
//!
//! ```text
//! Transport (frames) → Protocol (Envelope) → Session (correlation, routing)
//! ```
//!
//! The protocol layer doesn't know about connections or pending requests;
//! it only knows how to build, classify, and (de)serialize envelopes.

mod codec;
mod envelope;
mod error;
mod method;
mod response;

pub use codec::{Codec, JsonCodec};
pub use envelope::{CorrelationId, Envelope, EnvelopeKind, address, verb};
pub use error::ProtocolError;
pub use method::Method;
pub use response::{FailureBody, Response, StatusCode};
