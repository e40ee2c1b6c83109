//! Statically typed request schemas.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Declares the body and reply types for one address + verb pair.
///
/// Both sides of a connection share these declarations, so the encoding of
/// every request and reply is known at compile time instead of being
/// inferred from whatever JSON happens to arrive.
///
/// ```rust
/// use duel_protocol::Method;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct GameInvite { opponent: String }
///
/// #[derive(Serialize, Deserialize)]
/// struct InviteReply { accepted: bool }
///
/// struct Invite;
///
/// impl Method for Invite {
///     const ADDRESS: &'static str = "invite";
///     const VERB: &'static str = "request";
///     type Body = GameInvite;
///     type Reply = InviteReply;
/// }
/// ```
pub trait Method {
    /// Route the request is sent to.
    const ADDRESS: &'static str;
    /// Operation selected within the route.
    const VERB: &'static str;
    /// Request body.
    type Body: Serialize;
    /// Success payload.
    type Reply: DeserializeOwned;
}
