//! # Duel
//!
//! Bidirectional request/response sessions for two-player games.
//!
//! Either peer may call the other at any time over one connection. Each
//! request is answered exactly once, can be cancelled from the calling
//! side, and is routed on the receiving side to a
//! [`Controller`](duel_session::Controller) by
//! address. This crate re-exports the layers and adds a server accept
//! loop and client connectors.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use duel::prelude::*;
//!
//! # async fn run() -> Result<(), DuelError> {
//! duel::init_tracing();
//!
//! let server = DuelServer::builder()
//!     .bind("127.0.0.1:7878")
//!     .build_tcp()
//!     .await?;
//! server.run().await
//! # }
//! ```

mod client;
mod error;
mod server;

pub use client::{DuelClient, DuelClientBuilder};
pub use error::DuelError;
pub use server::{DEFAULT_BIND_ADDR, DuelServer, DuelServerBuilder, SessionSet};

pub use duel_protocol as protocol;
pub use duel_session as session;
pub use duel_transport as transport;

/// Installs a `tracing` subscriber that logs to stdout.
///
/// The filter comes from `RUST_LOG` and defaults to `info`. Calling this
/// more than once is harmless.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Everything needed to write controllers and run a server or client.
pub mod prelude {
    pub use crate::{DuelClient, DuelError, DuelServer, DuelServerBuilder, init_tracing};
    pub use duel_protocol::{Envelope, Method, Response, StatusCode};
    pub use duel_session::{
        CancellationSource, CancellationToken, ConnectionContext, Controller, HandlerError,
        MalformedFramePolicy, ProtocolSession, RequestError, RequestManager, Router,
        ServiceLocator, SessionConfig, SessionState,
    };
    pub use futures_util::future::BoxFuture;
}
