//! The outgoing side of a session.
//!
//! [`RequestManager`] is the handle controllers and application code use
//! to call the peer. It owns nothing but `Arc`s, so it is cheap to clone
//! into a controller or a long-lived service (a lobby keeps one per
//! player, for example).

use std::sync::Arc;
use std::time::Duration;

use duel_protocol::{CorrelationId, Envelope, JsonCodec, Method, address};
use duel_transport::{ConnectionId, SharedConnection};
use tokio::sync::{Mutex, watch};

use crate::pending::{PendingRequests, PendingResponse};
use crate::{CancellationToken, RequestError, SessionError};

/// How long teardown waits for an in-progress write before closing the
/// connection anyway.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Serializes every write to the connection.
///
/// `tokio::sync::Mutex` is fair, so writers are served in the order they
/// asked and a burst of responses can't starve a cancel. A failed write
/// marks the outbound side broken; the read loop watches for that and
/// tears the session down.
pub(crate) struct Outbound {
    conn: SharedConnection,
    write_lock: Mutex<()>,
    broken: watch::Sender<bool>,
}

impl Outbound {
    pub(crate) fn new(conn: SharedConnection) -> Self {
        Self {
            conn,
            write_lock: Mutex::new(()),
            broken: watch::channel(false).0,
        }
    }

    pub(crate) fn connection_id(&self) -> ConnectionId {
        self.conn.connection_id()
    }

    /// Encodes `envelope` and writes it as one frame.
    pub(crate) async fn send(&self, envelope: &Envelope) -> Result<(), SessionError> {
        let frame = envelope.encode()?;
        let _guard = self.write_lock.lock().await;
        tracing::trace!(
            conn_id = %self.conn.connection_id(),
            correlation_id = %envelope.correlation_id,
            address = %envelope.address,
            bytes = frame.len(),
            "writing envelope"
        );
        if let Err(e) = self.conn.send_frame(&frame).await {
            tracing::warn!(conn_id = %self.conn.connection_id(), error = %e, "write failed");
            self.broken.send_replace(true);
            return Err(e.into());
        }
        Ok(())
    }

    /// Resolves once a write has failed.
    pub(crate) async fn broken(&self) {
        let mut broken = self.broken.subscribe();
        // The sender lives in `self`, so this can't fail.
        let _ = broken.wait_for(|broken| *broken).await;
    }

    /// Closes the connection once any in-progress write has finished, or
    /// after `CLOSE_GRACE` if that write is stuck.
    pub(crate) async fn close(&self) -> Result<(), SessionError> {
        let close = async {
            let _guard = self.write_lock.lock().await;
            self.conn.close_connection().await
        };
        match tokio::time::timeout(CLOSE_GRACE, close).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                tracing::warn!(
                    conn_id = %self.conn.connection_id(),
                    "close blocked behind a stalled write, giving up"
                );
                Ok(())
            }
        }
    }
}

/// Sends requests to the peer and awaits their responses.
#[derive(Clone)]
pub struct RequestManager {
    outbound: Arc<Outbound>,
    pending: Arc<PendingRequests>,
    request_timeout: Option<Duration>,
}

impl RequestManager {
    pub(crate) fn new(
        outbound: Arc<Outbound>,
        pending: Arc<PendingRequests>,
        request_timeout: Option<Duration>,
    ) -> Self {
        Self {
            outbound,
            pending,
            request_timeout,
        }
    }

    /// Sends a request and waits for the peer's answer.
    ///
    /// Returns the success payload as text. If `cancel` fires first, the
    /// call fails with [`RequestError::Cancelled`] right away and the peer
    /// is told to stop with an `@cancel` envelope; a response arriving
    /// after that is dropped.
    ///
    /// # Errors
    /// - the peer's failure, mapped by status code
    /// - `Cancelled` or `Timeout` if we stopped waiting
    /// - `Disconnected` if the session closed first
    /// - `Transport` if the request couldn't be written, which also closes
    ///   the session
    pub async fn send_request(
        &self,
        address: &str,
        verb: &str,
        payload: impl Into<String>,
        cancel: Option<CancellationToken>,
    ) -> Result<String, RequestError> {
        if address::is_reserved(address) {
            return Err(SessionError::ReservedAddress(address.to_owned()).into());
        }

        let (id, response) = self.pending.issue()?;
        let envelope = Envelope::new(id, address, verb, payload);
        tracing::debug!(
            conn_id = %self.outbound.connection_id(),
            correlation_id = %id,
            address,
            verb,
            "sending request"
        );

        if let Err(e) = self.outbound.send(&envelope).await {
            // Teardown may have failed the entry already; either way the
            // caller sees the write error.
            self.pending.resolve(id, Err(RequestError::Disconnected));
            return Err(e.into());
        }
        self.wait(id, response, cancel).await
    }

    /// Sends a request whose body and reply types are fixed by `M`.
    pub async fn call<M: Method>(
        &self,
        body: &M::Body,
        cancel: Option<CancellationToken>,
    ) -> Result<M::Reply, RequestError> {
        let payload = JsonCodec
            .encode_body(body)
            .map_err(RequestError::Protocol)?;
        let reply = self
            .send_request(M::ADDRESS, M::VERB, payload, cancel)
            .await?;
        JsonCodec.decode_body(&reply).map_err(RequestError::Protocol)
    }

    /// Number of requests still awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    async fn wait(
        &self,
        id: CorrelationId,
        mut response: PendingResponse,
        cancel: Option<CancellationToken>,
    ) -> Result<String, RequestError> {
        let cancel = cancel.unwrap_or_else(CancellationToken::never);
        let timeout = self.request_timeout;
        let deadline = async move {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            outcome = &mut response => return outcome,
            () = cancel.cancelled() => {
                self.abandon(id, RequestError::Cancelled).await;
            }
            () = deadline => {
                let limit = timeout.unwrap_or_default();
                self.abandon(id, RequestError::Timeout(format!("no response within {limit:?}")))
                    .await;
            }
        }

        // Either our own resolution above, or the response that beat it.
        response.await
    }

    /// Resolves `id` locally and, if we got there first, asks the peer to
    /// stop working on it.
    async fn abandon(&self, id: CorrelationId, reason: RequestError) {
        if !self.pending.resolve(id, Err(reason)) {
            return;
        }
        tracing::debug!(
            conn_id = %self.outbound.connection_id(),
            correlation_id = %id,
            "request abandoned, sending cancel"
        );
        if let Err(e) = self.outbound.send(&Envelope::cancel(id)).await {
            tracing::debug!(correlation_id = %id, error = %e, "failed to send cancel");
        }
    }
}

impl std::fmt::Debug for RequestManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestManager")
            .field("conn_id", &self.outbound.connection_id())
            .field("pending", &self.pending.len())
            .finish()
    }
}
