//! Per-connection context handed to controller factories.
//!
//! A [`ConnectionContext`] bundles what a controller may need beyond the
//! request itself:
//!
//! - the connection's [`RequestManager`], to call back into the peer
//! - the process-wide [`ServiceLocator`]
//! - a small typed state map scoped to this connection
//!
//! The state map is cleared when the session closes, so anything stored
//! there (a lobby membership guard, say) is dropped with the connection.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use duel_transport::ConnectionId;

use crate::{HandlerError, RequestManager};

type AnyMap = HashMap<TypeId, Box<dyn Any + Send + Sync>>;

/// Process-wide services, looked up by type.
///
/// Services are stored as `Arc<T>`, and `T` may be a trait object, so
/// `locator.get::<dyn GameService>()` works.
#[derive(Default)]
pub struct ServiceLocator {
    services: AnyMap,
}

impl ServiceLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `service`, replacing any previous service of the same type.
    pub fn insert<T>(&mut self, service: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.services.insert(TypeId::of::<Arc<T>>(), Box::new(service));
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with<T>(mut self, service: Arc<T>) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.insert(service);
        self
    }

    pub fn get<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.services
            .get(&TypeId::of::<Arc<T>>())
            .and_then(|service| service.downcast_ref::<Arc<T>>())
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl std::fmt::Debug for ServiceLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceLocator")
            .field("services", &self.services.len())
            .finish()
    }
}

/// Everything a controller may need about the connection it serves.
///
/// Cheap to clone; all clones share the same state map.
#[derive(Clone, Debug)]
pub struct ConnectionContext {
    inner: Arc<ContextInner>,
}

#[derive(Debug)]
struct ContextInner {
    connection_id: ConnectionId,
    requests: RequestManager,
    services: Arc<ServiceLocator>,
    state: Mutex<StateMap>,
}

struct StateMap(AnyMap);

impl std::fmt::Debug for StateMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMap").field("entries", &self.0.len()).finish()
    }
}

impl ConnectionContext {
    pub(crate) fn new(
        connection_id: ConnectionId,
        requests: RequestManager,
        services: Arc<ServiceLocator>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                connection_id,
                requests,
                services,
                state: Mutex::new(StateMap(HashMap::new())),
            }),
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.inner.connection_id
    }

    /// The handle for sending requests to this connection's peer.
    pub fn requests(&self) -> &RequestManager {
        &self.inner.requests
    }

    pub fn services(&self) -> &Arc<ServiceLocator> {
        &self.inner.services
    }

    /// Looks up a service, failing the request if it isn't registered.
    pub fn service<T>(&self) -> Result<Arc<T>, HandlerError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.inner.services.get::<T>().ok_or_else(|| {
            HandlerError::Internal(format!("service {} is not registered", type_name::<T>()))
        })
    }

    /// Stores a per-connection value, returning the previous one.
    pub fn insert_state<T: Send + Sync + 'static>(&self, value: T) -> Option<T> {
        self.lock_state()
            .0
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    /// Returns a clone of the per-connection value of type `T`.
    pub fn state<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.lock_state()
            .0
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    /// Removes and returns the per-connection value of type `T`.
    pub fn take_state<T: Send + Sync + 'static>(&self) -> Option<T> {
        self.lock_state()
            .0
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    /// Drops all per-connection state. Called once when the session closes.
    pub(crate) fn release(&self) {
        let released = std::mem::take(&mut self.lock_state().0);
        // Drop outside the lock; guards in the map may do their own locking.
        drop(released);
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, StateMap> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
