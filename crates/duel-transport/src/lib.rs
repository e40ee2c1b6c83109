//! Transport abstraction layer for Duel.
//!
//! A transport moves whole frames (opaque byte buffers) between two peers.
//! The session layer above never sees partial frames: each call to
//! [`Connection::recv`] yields exactly one frame the peer passed to
//! [`Connection::send`].
//!
//! Provided implementations:
//!
//! - [`TcpConnection`] / [`TcpTransport`]: length-prefixed frames over TCP
//! - [`WebSocketConnection`] / [`WebSocketTransport`]: one binary message
//!   per frame (feature `websocket`, default)
//! - [`MemoryConnection`]: an in-process pair, handy for tests
//!
//! # Closing
//!
//! `recv()` returns `Ok(None)` once the peer has closed cleanly. A
//! zero-length frame carries the same meaning for the session layer.

mod error;
mod memory;
mod tcp;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use memory::MemoryConnection;
pub use tcp::{MAX_FRAME_LEN, TcpConnection, TcpTransport};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::BoxFuture;

/// Counter for generating unique connection IDs across all transports.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-wide unique id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;

    /// Waits for and accepts the next incoming connection.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;

    /// Returns the address the listener is bound to.
    fn local_addr(&self) -> Result<SocketAddr, TransportError>;
}

/// A single connection that can send and receive whole frames.
///
/// The returned futures are `Send` so sessions can drive a connection from
/// spawned Tokio tasks. Implementations must allow one `recv` and one
/// `send` to be in flight at the same time; the session reads and writes
/// concurrently.
pub trait Connection: Send + Sync + 'static {
    /// Sends one frame to the remote peer.
    fn send(
        &self,
        frame: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next frame from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;

    /// Closes the connection.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}

/// Object-safe view of a [`Connection`].
///
/// `Connection` uses `impl Future` returns, which can't be called through
/// `dyn`. Sessions store connections as [`SharedConnection`] so that the
/// session, the request manager handed to controllers, and the spawned
/// request tasks don't all need to carry a transport type parameter.
pub trait DynConnection: Send + Sync + 'static {
    fn send_frame<'a>(
        &'a self,
        frame: &'a [u8],
    ) -> BoxFuture<'a, Result<(), TransportError>>;

    fn recv_frame(&self) -> BoxFuture<'_, Result<Option<Vec<u8>>, TransportError>>;

    fn close_connection(&self) -> BoxFuture<'_, Result<(), TransportError>>;

    fn connection_id(&self) -> ConnectionId;
}

impl<C: Connection> DynConnection for C {
    fn send_frame<'a>(
        &'a self,
        frame: &'a [u8],
    ) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(self.send(frame))
    }

    fn recv_frame(&self) -> BoxFuture<'_, Result<Option<Vec<u8>>, TransportError>> {
        Box::pin(self.recv())
    }

    fn close_connection(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(self.close())
    }

    fn connection_id(&self) -> ConnectionId {
        self.id()
    }
}

/// A type-erased, shareable connection.
pub type SharedConnection = Arc<dyn DynConnection>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
    }

    #[test]
    fn test_connection_id_next_is_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(b.into_inner() > a.into_inner());
    }

    #[tokio::test]
    async fn test_shared_connection_forwards_to_inner() {
        let (a, b) = MemoryConnection::pair();
        let a_id = a.id();
        let shared: SharedConnection = Arc::new(a);

        assert_eq!(shared.connection_id(), a_id);
        shared.send_frame(b"ping").await.expect("send");
        let got = b.recv().await.expect("recv").expect("frame");
        assert_eq!(got, b"ping");

        shared.close_connection().await.expect("close");
        assert!(b.recv().await.expect("recv").is_none());
    }
}
