//! Routing inbound requests to controllers.
//!
//! A [`Router`] maps an address to a [`ControllerFactory`]. For every
//! inbound request the session asks the router for a controller, built
//! fresh from the connection's [`ConnectionContext`], and awaits its
//! [`Controller::process`]. Addresses with no registered factory get the
//! [`MethodNotAllowed`] controller, which answers 405.
//!
//! The router is built once and shared read-only by every session.

use std::collections::HashMap;
use std::sync::Arc;

use duel_protocol::{Envelope, Response, address};
use futures_util::future::BoxFuture;

use crate::{CancellationToken, ConnectionContext, HandlerError, SessionError};

/// Handles requests for one address.
///
/// Dispatch on `request.verb` inside `process`. Unknown verbs should
/// return [`Response::method_not_allowed`].
pub trait Controller: Send + Sync {
    /// Handles one request.
    ///
    /// `cancel` fires if the peer sends `@cancel` for this request or the
    /// session closes. Long-running work should watch it and return
    /// [`HandlerError::Cancelled`].
    fn process<'a>(
        &'a self,
        request: &'a Envelope,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<Response, HandlerError>>;
}

/// Builds a controller for one request on one connection.
pub type ControllerFactory = Arc<dyn Fn(&ConnectionContext) -> Box<dyn Controller> + Send + Sync>;

/// Address → controller factory.
#[derive(Clone, Default)]
pub struct Router {
    routes: HashMap<String, ControllerFactory>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` for `address`, replacing any earlier one.
    ///
    /// # Errors
    /// `SessionError::ReservedAddress` for `@`-prefixed addresses.
    pub fn register<F, C>(
        &mut self,
        address: impl Into<String>,
        factory: F,
    ) -> Result<&mut Self, SessionError>
    where
        F: Fn(&ConnectionContext) -> C + Send + Sync + 'static,
        C: Controller + 'static,
    {
        let address = address.into();
        if address::is_reserved(&address) {
            return Err(SessionError::ReservedAddress(address));
        }
        let factory: ControllerFactory =
            Arc::new(move |ctx: &ConnectionContext| -> Box<dyn Controller> {
                Box::new(factory(ctx))
            });
        if self.routes.insert(address.clone(), factory).is_some() {
            tracing::debug!(%address, "replaced controller factory");
        }
        Ok(self)
    }

    /// Builds the controller for `address`, or [`MethodNotAllowed`].
    pub fn dispatch(&self, ctx: &ConnectionContext, address: &str) -> Box<dyn Controller> {
        match self.routes.get(address) {
            Some(factory) => factory(ctx),
            None => Box::new(MethodNotAllowed),
        }
    }

    pub fn contains(&self, address: &str) -> bool {
        self.routes.contains_key(address)
    }

    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.routes.keys()).finish()
    }
}

/// Answers every request with 405.
#[derive(Debug, Clone, Copy, Default)]
pub struct MethodNotAllowed;

impl Controller for MethodNotAllowed {
    fn process<'a>(
        &'a self,
        request: &'a Envelope,
        _cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<Response, HandlerError>> {
        tracing::debug!(
            address = %request.address,
            verb = %request.verb,
            "no controller for request"
        );
        Box::pin(async { Ok(Response::method_not_allowed()) })
    }
}
