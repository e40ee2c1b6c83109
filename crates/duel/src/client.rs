//! Client-side connectors.
//!
//! A client is just a session on the dialing end of a connection. It can
//! register controllers too, since the server may call it.

use std::sync::Arc;

use duel_session::{
    Controller, ConnectionContext, ProtocolSession, Router, ServiceLocator, SessionConfig,
};
use duel_transport::{Connection, TcpConnection};

use crate::DuelError;

/// Builder for a client session.
///
/// ```rust,ignore
/// let session = DuelClient::builder()
///     .route("game", |ctx| GameController::new(ctx))?
///     .connect_tcp("127.0.0.1:7878")
///     .await?;
/// ```
#[derive(Default)]
pub struct DuelClientBuilder {
    session_config: SessionConfig,
    router: Router,
    services: ServiceLocator,
}

impl DuelClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    pub fn router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Registers one controller factory for requests the server sends us.
    pub fn route<F, C>(mut self, address: &str, factory: F) -> Result<Self, DuelError>
    where
        F: Fn(&ConnectionContext) -> C + Send + Sync + 'static,
        C: Controller + 'static,
    {
        self.router.register(address, factory)?;
        Ok(self)
    }

    pub fn services(mut self, services: ServiceLocator) -> Self {
        self.services = services;
        self
    }

    pub fn service<T>(mut self, service: Arc<T>) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.services.insert(service);
        self
    }

    /// Dials a length-prefixed TCP server and starts the session.
    pub async fn connect_tcp(self, addr: &str) -> Result<ProtocolSession, DuelError> {
        let conn = TcpConnection::connect(addr).await?;
        Ok(self.start(conn))
    }

    /// Dials a WebSocket server (`ws://host:port`) and starts the session.
    #[cfg(feature = "websocket")]
    pub async fn connect_websocket(self, url: &str) -> Result<ProtocolSession, DuelError> {
        let conn = duel_transport::WebSocketConnection::connect(url).await?;
        Ok(self.start(conn))
    }

    /// Starts a session over an already-open connection.
    pub fn start<C: Connection>(self, conn: C) -> ProtocolSession {
        let session = ProtocolSession::new(
            conn,
            Arc::new(self.router),
            Arc::new(self.services),
            self.session_config,
        );
        tracing::debug!(conn_id = %session.connection_id(), "client session starting");
        session.start();
        session
    }
}

/// Namespace for [`DuelClientBuilder`].
pub struct DuelClient;

impl DuelClient {
    pub fn builder() -> DuelClientBuilder {
        DuelClientBuilder::new()
    }
}
