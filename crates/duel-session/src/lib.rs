//! Request/response sessions for Duel.
//!
//! Either side of a connection may send a request at any time, and each
//! request gets exactly one response. This crate makes that work over a
//! plain frame connection:
//!
//! 1. **Correlation** ([`PendingRequests`]): pairs responses with the
//!    outgoing requests that are waiting for them
//! 2. **Cancellation** ([`CancellationRegistry`], [`CancellationToken`]):
//!    lets a caller abandon a request and tells the peer to stop work
//! 3. **Routing** ([`Router`], [`Controller`]): delivers inbound requests
//!    to application code, one controller per address
//! 4. **Lifecycle** ([`ProtocolSession`]): the read loop, the write lock,
//!    and an orderly teardown when either side goes away
//!
//! # How it fits in the stack
//!
//! ```text
//! Application (above)  ← registers controllers, sends requests
//!     ↕
//! Session Layer (this crate)  ← correlation, cancellation, routing
//!     ↕
//! Protocol Layer (below)  ← Envelope, Response, StatusCode
//!     ↕
//! Transport Layer  ← frames over TCP, WebSocket, or in-memory pairs
//! ```

mod cancel;
mod context;
mod error;
mod pending;
mod requests;
mod router;
mod session;

pub use cancel::{CancellationRegistry, CancellationSource, CancellationToken};
pub use context::{ConnectionContext, ServiceLocator};
pub use error::{HandlerError, RequestError, SessionError};
pub use pending::{Outcome, PendingRequests, PendingResponse};
pub use requests::RequestManager;
pub use router::{Controller, ControllerFactory, MethodNotAllowed, Router};
pub use session::{MalformedFramePolicy, ProtocolSession, SessionConfig, SessionState};
