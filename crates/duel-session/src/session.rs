//! The protocol session: one per connection, in both directions at once.
//!
//! A session owns a connection and runs a single read loop over it:
//!
//! ```text
//!            ┌──────────────── read loop ────────────────┐
//!  frame ──→ │ decode → kind?                            │
//!            │   @response → PendingRequests::resolve    │
//!            │   @cancel   → CancellationRegistry::signal│
//!            │   otherwise → spawn: Router → Controller  │──→ response frame
//!            └───────────────────────────────────────────┘
//! ```
//!
//! Inbound requests are handled on their own tasks, so a slow controller
//! never holds up the loop, and a controller may call back into the peer
//! while it works. All writes go through the session's single write lock.
//!
//! # Lifecycle
//!
//! ```text
//!   Running ──(peer closed / read or write error / dispose)──→ Closing ──→ Closed
//! ```
//!
//! Entering `Closing` fails every pending outgoing request with
//! `Disconnected`, cancels every in-flight handler, closes the connection,
//! and drops the per-connection state. `Closed` is published once all of
//! that is done.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use duel_protocol::{Envelope, EnvelopeKind, Method, Response, StatusCode};
use duel_transport::{Connection, ConnectionId, SharedConnection};
use futures_util::FutureExt;
use tokio::sync::watch;

use crate::pending::PendingRequests;
use crate::requests::Outbound;
use crate::{
    CancellationRegistry, CancellationToken, ConnectionContext, HandlerError, RequestError,
    RequestManager, Router, ServiceLocator, SessionError,
};

/// What to do with a frame that doesn't decode as an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MalformedFramePolicy {
    /// Close the session. Framing is probably broken and nothing after
    /// this point can be trusted.
    #[default]
    Terminate,
    /// Log the frame and keep reading.
    Skip,
}

/// Per-session settings.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub malformed_frames: MalformedFramePolicy,

    /// Upper bound on how long an outgoing request waits for its
    /// response. `None` waits until the response, a cancel, or teardown.
    pub request_timeout: Option<Duration>,
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Running,
    Closing,
    Closed,
}

/// A bidirectional request/response session over one connection.
///
/// Cloning yields another handle to the same session. The read loop keeps
/// the session alive until the connection closes, so dropping every
/// handle does not tear it down; call [`dispose`](Self::dispose) for that.
#[derive(Clone)]
pub struct ProtocolSession {
    shared: Arc<Shared>,
}

struct Shared {
    conn: SharedConnection,
    outbound: Arc<Outbound>,
    pending: Arc<PendingRequests>,
    inflight: CancellationRegistry,
    router: Arc<Router>,
    context: ConnectionContext,
    config: SessionConfig,
    state: watch::Sender<SessionState>,
    started: AtomicBool,
    disposed: AtomicBool,
}

impl ProtocolSession {
    /// Wraps `conn` in a session. Nothing is read until [`start`](Self::start).
    pub fn new<C: Connection>(
        conn: C,
        router: Arc<Router>,
        services: Arc<ServiceLocator>,
        config: SessionConfig,
    ) -> Self {
        Self::from_shared(Arc::new(conn), router, services, config)
    }

    /// Like [`new`](Self::new), for an already type-erased connection.
    pub fn from_shared(
        conn: SharedConnection,
        router: Arc<Router>,
        services: Arc<ServiceLocator>,
        config: SessionConfig,
    ) -> Self {
        let outbound = Arc::new(Outbound::new(Arc::clone(&conn)));
        let pending = Arc::new(PendingRequests::new());
        let requests = RequestManager::new(
            Arc::clone(&outbound),
            Arc::clone(&pending),
            config.request_timeout,
        );
        let context = ConnectionContext::new(conn.connection_id(), requests, services);
        let (state, _) = watch::channel(SessionState::Running);

        Self {
            shared: Arc::new(Shared {
                conn,
                outbound,
                pending,
                inflight: CancellationRegistry::new(),
                router,
                context,
                config,
                state,
                started: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Spawns the read loop. Calling it again is a no-op.
    pub fn start(&self) {
        if self.shared.started.swap(true, Ordering::SeqCst) {
            tracing::warn!(conn_id = %self.connection_id(), "session already started");
            return;
        }
        let shared = Arc::clone(&self.shared);
        tokio::spawn(shared.read_loop());
    }

    /// Sends a request to the peer. See [`RequestManager::send_request`].
    pub async fn send_request(
        &self,
        address: &str,
        verb: &str,
        payload: impl Into<String>,
        cancel: Option<CancellationToken>,
    ) -> Result<String, RequestError> {
        self.requests()
            .send_request(address, verb, payload, cancel)
            .await
    }

    /// Sends a typed request. See [`RequestManager::call`].
    pub async fn call<M: Method>(
        &self,
        body: &M::Body,
        cancel: Option<CancellationToken>,
    ) -> Result<M::Reply, RequestError> {
        self.requests().call::<M>(body, cancel).await
    }

    pub fn requests(&self) -> &RequestManager {
        self.shared.context.requests()
    }

    pub fn context(&self) -> &ConnectionContext {
        &self.shared.context
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.shared.conn.connection_id()
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Outgoing requests still awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    /// Inbound requests whose controllers are still running.
    pub fn active_requests(&self) -> usize {
        self.shared.inflight.len()
    }

    /// Resolves once the session reaches [`SessionState::Closed`].
    pub async fn closed(&self) {
        self.shared.closed().await;
    }

    /// Tears the session down. Safe to call more than once, and from
    /// several tasks; every caller returns once the session is closed.
    pub async fn dispose(&self) {
        self.shared.dispose().await;
    }
}

impl std::fmt::Debug for ProtocolSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolSession")
            .field("conn_id", &self.connection_id())
            .field("state", &self.state())
            .field("pending", &self.pending_requests())
            .field("active", &self.active_requests())
            .finish()
    }
}

impl Shared {
    fn conn_id(&self) -> ConnectionId {
        self.conn.connection_id()
    }

    async fn read_loop(self: Arc<Self>) {
        let conn_id = self.conn_id();
        let mut state = self.state.subscribe();
        tracing::info!(%conn_id, "session started");

        loop {
            let read = tokio::select! {
                read = self.conn.recv_frame() => read,
                _ = state.wait_for(|s| *s != SessionState::Running) => break,
                () = self.outbound.broken() => {
                    tracing::info!(%conn_id, "write path failed, closing session");
                    break;
                }
            };

            let frame = match read {
                Ok(Some(frame)) if !frame.is_empty() => frame,
                Ok(_) => {
                    tracing::info!(%conn_id, "peer closed connection");
                    break;
                }
                Err(e) => {
                    tracing::warn!(%conn_id, error = %e, "read failed");
                    break;
                }
            };

            let envelope = match Envelope::decode(&frame) {
                Ok(envelope) => envelope,
                Err(e) => match self.config.malformed_frames {
                    MalformedFramePolicy::Terminate => {
                        tracing::warn!(%conn_id, error = %e, "malformed frame, closing session");
                        break;
                    }
                    MalformedFramePolicy::Skip => {
                        tracing::warn!(%conn_id, error = %e, "skipping malformed frame");
                        continue;
                    }
                },
            };

            tracing::debug!(
                %conn_id,
                correlation_id = %envelope.correlation_id,
                address = %envelope.address,
                verb = %envelope.verb,
                "received envelope"
            );

            match envelope.kind() {
                EnvelopeKind::Response => {
                    if !self.pending.resolve_envelope(&envelope) {
                        tracing::debug!(
                            %conn_id,
                            correlation_id = %envelope.correlation_id,
                            "response for unknown or abandoned request"
                        );
                    }
                }
                EnvelopeKind::Cancellation => {
                    if !self.inflight.signal(envelope.correlation_id) {
                        tracing::debug!(
                            %conn_id,
                            correlation_id = %envelope.correlation_id,
                            "cancel for request no longer in flight"
                        );
                    }
                }
                EnvelopeKind::Request => {
                    tokio::spawn(Arc::clone(&self).handle_request(envelope));
                }
            }
        }

        self.dispose().await;
    }

    async fn handle_request(self: Arc<Self>, request: Envelope) {
        let id = request.correlation_id;
        let conn_id = self.conn_id();

        let response = match self.inflight.track(id) {
            Ok(cancel) => {
                let response = self.run_controller(&request, cancel).await;
                self.inflight.untrack(id);
                response
            }
            Err(SessionError::Closed) => {
                tracing::debug!(%conn_id, correlation_id = %id, "session closed, dropping request");
                return;
            }
            Err(e) => {
                tracing::warn!(%conn_id, error = %e, "rejecting duplicate request");
                Response::error("Duplicate correlation id.", StatusCode::CONFLICT)
            }
        };

        tracing::debug!(
            %conn_id,
            correlation_id = %id,
            status = %response.status(),
            "request handled"
        );

        let envelope = match response.into_envelope(id) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(%conn_id, correlation_id = %id, error = %e, "failed to encode response");
                return;
            }
        };
        if let Err(e) = self.outbound.send(&envelope).await {
            tracing::debug!(%conn_id, correlation_id = %id, error = %e, "failed to send response");
        }
    }

    /// Builds the routed controller, runs it, and turns every way that can
    /// end into a response: its own result, a handler error, or a panic in
    /// either the factory or the controller.
    async fn run_controller(&self, request: &Envelope, cancel: CancellationToken) -> Response {
        let run = async {
            let controller = self.router.dispatch(&self.context, &request.address);
            controller.process(request, cancel.clone()).await
        };
        let outcome = AssertUnwindSafe(run).catch_unwind().await;

        match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::debug!(
                    correlation_id = %request.correlation_id,
                    address = %request.address,
                    error = %e,
                    "controller failed"
                );
                // Whatever a handler reports once its request is cancelled
                // is a consequence of the cancel.
                if cancel.is_cancelled() {
                    HandlerError::Cancelled.into_response()
                } else {
                    e.into_response()
                }
            }
            Err(_) => {
                tracing::error!(
                    correlation_id = %request.correlation_id,
                    address = %request.address,
                    "controller panicked"
                );
                HandlerError::Internal("panic".into()).into_response()
            }
        }
    }

    async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            self.closed().await;
            return;
        }
        let conn_id = self.conn_id();
        self.state.send_replace(SessionState::Closing);

        let failed = self.pending.cancel_all();
        let aborted = self.inflight.cancel_all();
        if let Err(e) = self.outbound.close().await {
            tracing::debug!(%conn_id, error = %e, "error closing connection");
        }
        self.context.release();

        self.state.send_replace(SessionState::Closed);
        tracing::info!(%conn_id, failed, aborted, "session closed");
    }

    async fn closed(&self) {
        let mut state = self.state.subscribe();
        // The sender lives in `self`, so this can't fail.
        let _ = state.wait_for(|s| *s == SessionState::Closed).await;
    }
}
