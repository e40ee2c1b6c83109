//! In-process connection pair backed by Tokio channels.

use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::{Connection, ConnectionId, TransportError};

/// One end of an in-memory connection created by [`MemoryConnection::pair`].
///
/// Frames sent on one end arrive, in order, on the other. Closing an end
/// (or dropping it) makes the peer's `recv` return `Ok(None)`.
pub struct MemoryConnection {
    id: ConnectionId,
    tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl MemoryConnection {
    /// Creates two connected ends.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();

        let a = Self {
            id: ConnectionId::next(),
            tx: Mutex::new(Some(tx_b)),
            rx: tokio::sync::Mutex::new(rx_a),
        };
        let b = Self {
            id: ConnectionId::next(),
            tx: Mutex::new(Some(tx_a)),
            rx: tokio::sync::Mutex::new(rx_b),
        };
        (a, b)
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<Vec<u8>>> {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Connection for MemoryConnection {
    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        let tx = self.sender().ok_or_else(|| {
            TransportError::ConnectionClosed("local end closed".into())
        })?;
        tx.send(frame.to_vec()).map_err(|_| {
            TransportError::ConnectionClosed("peer dropped".into())
        })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(self.rx.lock().await.recv().await)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_arrive_in_order() {
        let (a, b) = MemoryConnection::pair();
        a.send(b"one").await.unwrap();
        a.send(b"two").await.unwrap();
        assert_eq!(b.recv().await.unwrap().unwrap(), b"one");
        assert_eq!(b.recv().await.unwrap().unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_pair_is_bidirectional() {
        let (a, b) = MemoryConnection::pair();
        b.send(b"pong").await.unwrap();
        assert_eq!(a.recv().await.unwrap().unwrap(), b"pong");
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_close_signals_peer() {
        let (a, b) = MemoryConnection::pair();
        a.close().await.unwrap();
        assert!(b.recv().await.unwrap().is_none());
        assert!(a.send(b"late").await.is_err());
    }

    #[tokio::test]
    async fn test_drop_signals_peer() {
        let (a, b) = MemoryConnection::pair();
        drop(a);
        assert!(b.recv().await.unwrap().is_none());
        assert!(b.send(b"nobody home").await.is_err());
    }

    #[tokio::test]
    async fn test_empty_frame_is_delivered() {
        let (a, b) = MemoryConnection::pair();
        a.send(b"").await.unwrap();
        assert_eq!(b.recv().await.unwrap().unwrap(), Vec::<u8>::new());
    }
}
