//! The correlation table for outgoing requests.
//!
//! Each outgoing request gets a fresh [`CorrelationId`] and a oneshot
//! channel. The id goes out in the envelope; the receiver is handed back
//! to the caller as a [`PendingResponse`]. When the read loop sees an
//! `@response` envelope it looks the id up and completes the channel.
//!
//! Every path that completes an entry removes it first, under the lock.
//! Whoever removes it owns the right to complete it, so an entry is
//! completed exactly once even when a response, a cancel, and teardown
//! race each other.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};

use duel_protocol::{CorrelationId, Envelope, FailureBody, ProtocolError, StatusCode, verb};
use tokio::sync::oneshot;

use crate::RequestError;

/// What a pending request resolves to: the success payload, or why not.
pub type Outcome = Result<String, RequestError>;

/// Outgoing requests awaiting a response.
#[derive(Debug, Default)]
pub struct PendingRequests {
    state: Mutex<PendingState>,
}

#[derive(Debug, Default)]
struct PendingState {
    waiting: HashMap<CorrelationId, oneshot::Sender<Outcome>>,
    /// Set by `cancel_all`; no new entries are accepted afterwards.
    closed: bool,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an id and registers a waiter for it.
    ///
    /// # Errors
    /// `RequestError::Disconnected` once the table has been torn down.
    pub fn issue(&self) -> Result<(CorrelationId, PendingResponse), RequestError> {
        let mut state = self.lock();
        if state.closed {
            return Err(RequestError::Disconnected);
        }
        let (tx, rx) = oneshot::channel();
        let mut id = CorrelationId::new();
        while state.waiting.contains_key(&id) {
            id = CorrelationId::new();
        }
        state.waiting.insert(id, tx);
        Ok((id, PendingResponse { id, rx }))
    }

    /// Completes `id` with `outcome`.
    ///
    /// Returns `false` if `id` isn't pending: it was never issued, or it
    /// was already completed by a response, a cancel, or teardown.
    pub fn resolve(&self, id: CorrelationId, outcome: Outcome) -> bool {
        let Some(tx) = self.lock().waiting.remove(&id) else {
            return false;
        };
        // The caller may have stopped waiting; that's fine.
        let _ = tx.send(outcome);
        true
    }

    /// Completes the entry answered by an `@response` envelope.
    pub fn resolve_envelope(&self, response: &Envelope) -> bool {
        self.resolve(response.correlation_id, outcome_of(response))
    }

    /// Fails every pending entry with `Disconnected` and refuses new ones.
    /// Returns how many entries were failed.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = {
            let mut state = self.lock();
            state.closed = true;
            state.waiting.drain().collect()
        };
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(RequestError::Disconnected));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.lock().waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PendingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn outcome_of(response: &Envelope) -> Outcome {
    match response.verb.as_str() {
        verb::SUCCESS => Ok(response.payload.clone()),
        verb::FAILURE => Err(match response.body::<FailureBody>() {
            Ok(failure) => RequestError::from_failure(failure),
            Err(e) => RequestError::Remote {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: format!("unreadable failure body: {e}"),
            },
        }),
        other => Err(RequestError::Protocol(ProtocolError::InvalidMessage(
            format!("unknown response verb {other:?}"),
        ))),
    }
}

/// Resolves to the outcome of one outgoing request.
#[derive(Debug)]
pub struct PendingResponse {
    id: CorrelationId,
    rx: oneshot::Receiver<Outcome>,
}

impl PendingResponse {
    pub fn id(&self) -> CorrelationId {
        self.id
    }
}

impl Future for PendingResponse {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Outcome> {
        // A dropped sender means the table itself is gone.
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(RequestError::Disconnected)))
    }
}
