//! Cancellation tokens and the registry of requests we are handling.
//!
//! A [`CancellationSource`] owns the flag; every [`CancellationToken`]
//! cloned from it observes the same flag. Both are thin wrappers over a
//! `tokio::sync::watch` channel carrying a `bool`, so a token can be
//! polled (`is_cancelled`) or awaited (`cancelled`).
//!
//! The [`CancellationRegistry`] maps correlation ids of inbound requests
//! to their sources. The read loop signals an entry when an `@cancel`
//! envelope arrives; the request task removes its entry when it finishes.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use duel_protocol::CorrelationId;
use tokio::sync::watch;

use crate::SessionError;

/// The owning side of a cancellation flag.
#[derive(Debug)]
pub struct CancellationSource {
    tx: watch::Sender<bool>,
}

impl CancellationSource {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Returns a token observing this source.
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            rx: self.tx.subscribe(),
        }
    }

    /// Flags every token. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

/// The observing side of a cancellation flag.
///
/// Cheap to clone. A token whose source was dropped without being
/// cancelled stays uncancelled forever.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    rx: watch::Receiver<bool>,
}

impl CancellationToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        CancellationSource::new().token()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the source is cancelled.
    ///
    /// If the source is dropped first, this never resolves, so it is safe
    /// to use as a `select!` branch.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Sources for inbound requests that are still being handled.
///
/// Once [`cancel_all`](Self::cancel_all) has run the registry is closed:
/// later `track` calls fail with [`SessionError::Closed`], so a request
/// that was read just before teardown never starts a handler.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    state: Mutex<RegistryState>,
}

#[derive(Debug, Default)]
struct RegistryState {
    inflight: HashMap<CorrelationId, CancellationSource>,
    closed: bool,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh source for `id` and returns its token.
    ///
    /// # Errors
    /// - `SessionError::DuplicateRequest` if `id` is already tracked. The
    ///   existing entry is left untouched.
    /// - `SessionError::Closed` after [`cancel_all`](Self::cancel_all).
    pub fn track(&self, id: CorrelationId) -> Result<CancellationToken, SessionError> {
        let mut state = self.lock();
        if state.closed {
            return Err(SessionError::Closed);
        }
        if state.inflight.contains_key(&id) {
            return Err(SessionError::DuplicateRequest(id));
        }
        let source = CancellationSource::new();
        let token = source.token();
        state.inflight.insert(id, source);
        Ok(token)
    }

    /// Cancels the request `id`. Returns `false` if it isn't tracked,
    /// which is normal when the `@cancel` races the response.
    pub fn signal(&self, id: CorrelationId) -> bool {
        match self.lock().inflight.get(&id) {
            Some(source) => {
                source.cancel();
                true
            }
            None => false,
        }
    }

    /// Forgets `id`. Returns `false` if it wasn't tracked.
    pub fn untrack(&self, id: CorrelationId) -> bool {
        self.lock().inflight.remove(&id).is_some()
    }

    /// Cancels and forgets every entry, and closes the registry. Returns
    /// how many entries there were.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = {
            let mut state = self.lock();
            state.closed = true;
            state.inflight.drain().collect()
        };
        for (_, source) in &drained {
            source.cancel();
        }
        drained.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().inflight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
