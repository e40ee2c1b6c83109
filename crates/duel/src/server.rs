//! `DuelServer` builder and accept loop.
//!
//! This is the entry point for running a Duel server. It ties the layers
//! together: every accepted connection gets its own [`ProtocolSession`],
//! all sharing one [`Router`] and one [`ServiceLocator`].

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use duel_session::{
    Controller, ConnectionContext, ProtocolSession, Router, ServiceLocator, SessionConfig,
};
use duel_transport::{ConnectionId, TcpTransport, Transport};

use crate::DuelError;

/// Default listen address.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:7878";

/// Builder for configuring and starting a Duel server.
///
/// # Example
///
/// ```rust,ignore
/// use duel::prelude::*;
///
/// let server = DuelServer::builder()
///     .bind("0.0.0.0:7878")
///     .route("lobby", |ctx| LobbyController::new(ctx))?
///     .build_tcp()
///     .await?;
/// server.run().await
/// ```
pub struct DuelServerBuilder {
    bind_addr: String,
    session_config: SessionConfig,
    router: Router,
    services: ServiceLocator,
}

impl DuelServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            session_config: SessionConfig::default(),
            router: Router::new(),
            services: ServiceLocator::new(),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the configuration every session starts with.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Replaces the router wholesale.
    pub fn router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Registers one controller factory.
    ///
    /// # Errors
    /// Fails for reserved (`@`-prefixed) addresses.
    pub fn route<F, C>(mut self, address: &str, factory: F) -> Result<Self, DuelError>
    where
        F: Fn(&ConnectionContext) -> C + Send + Sync + 'static,
        C: Controller + 'static,
    {
        self.router.register(address, factory)?;
        Ok(self)
    }

    /// Replaces the service locator wholesale.
    pub fn services(mut self, services: ServiceLocator) -> Self {
        self.services = services;
        self
    }

    /// Registers one service.
    pub fn service<T>(mut self, service: Arc<T>) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.services.insert(service);
        self
    }

    /// Binds a length-prefixed TCP listener.
    pub async fn build_tcp(self) -> Result<DuelServer<TcpTransport>, DuelError> {
        let transport = TcpTransport::bind(&self.bind_addr).await?;
        Ok(self.with_transport(transport))
    }

    /// Binds a WebSocket listener.
    #[cfg(feature = "websocket")]
    pub async fn build_websocket(
        self,
    ) -> Result<DuelServer<duel_transport::WebSocketTransport>, DuelError> {
        let transport = duel_transport::WebSocketTransport::bind(&self.bind_addr).await?;
        Ok(self.with_transport(transport))
    }

    /// Uses an already-bound transport.
    pub fn with_transport<T: Transport>(self, transport: T) -> DuelServer<T> {
        DuelServer {
            transport,
            router: Arc::new(self.router),
            services: Arc::new(self.services),
            config: self.session_config,
            sessions: SessionSet::default(),
        }
    }
}

impl Default for DuelServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The live sessions of a server, keyed by connection.
#[derive(Clone, Default)]
pub struct SessionSet {
    inner: Arc<Mutex<HashMap<ConnectionId, ProtocolSession>>>,
}

impl SessionSet {
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: ConnectionId) -> Option<ProtocolSession> {
        self.lock().get(&id).cloned()
    }

    fn insert(&self, session: ProtocolSession) {
        self.lock().insert(session.connection_id(), session);
    }

    fn remove(&self, id: ConnectionId) {
        self.lock().remove(&id);
    }

    fn drain(&self) -> Vec<ProtocolSession> {
        self.lock().drain().map(|(_, session)| session).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ConnectionId, ProtocolSession>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A bound Duel server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct DuelServer<T: Transport> {
    transport: T,
    router: Arc<Router>,
    services: Arc<ServiceLocator>,
    config: SessionConfig,
    sessions: SessionSet,
}

impl DuelServer<TcpTransport> {
    /// Creates a new builder.
    pub fn builder() -> DuelServerBuilder {
        DuelServerBuilder::new()
    }
}

impl<T: Transport> DuelServer<T> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, DuelError> {
        Ok(self.transport.local_addr()?)
    }

    /// A handle to the live sessions. Stays valid after `run` takes the
    /// server.
    pub fn sessions(&self) -> SessionSet {
        self.sessions.clone()
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), DuelError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop until `shutdown` resolves, then disposes every
    /// live session.
    ///
    /// Each accepted connection gets a session on its own task; the task
    /// holds the session until it closes. A failed accept is logged and
    /// the loop keeps going.
    pub async fn run_until(mut self, shutdown: impl Future<Output = ()>) -> Result<(), DuelError> {
        tracing::info!(addr = ?self.transport.local_addr().ok(), "Duel server running");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => self.spawn_session(conn),
                    Err(e) => tracing::error!(error = %e, "accept failed"),
                },
            }
        }

        let live = self.sessions.drain();
        tracing::info!(sessions = live.len(), "Duel server shutting down");
        for session in live {
            session.dispose().await;
        }
        Ok(())
    }

    fn spawn_session(&self, conn: T::Connection) {
        let session = ProtocolSession::new(
            conn,
            Arc::clone(&self.router),
            Arc::clone(&self.services),
            self.config.clone(),
        );
        let sessions = self.sessions.clone();
        sessions.insert(session.clone());
        session.start();

        tokio::spawn(async move {
            session.closed().await;
            sessions.remove(session.connection_id());
            tracing::debug!(conn_id = %session.connection_id(), "connection finished");
        });
    }
}
