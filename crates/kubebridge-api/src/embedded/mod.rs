//! Embedded API server seam
//!
//! The service lifecycle does not know how the resource API is implemented.
//! It asks an [`EmbeddedServer`] to prepare itself, receives a
//! [`PreparedServer`] (connection details, an in-process handler, and a run
//! loop), and drives it from there.

mod loopback;

use std::future::Future;

use async_trait::async_trait;
use axum::Router;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

pub use loopback::{namespace_org_id, LoopbackApiServer, TeamStore};

/// How to reach the embedded API server from outside the process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    /// Server URL
    pub host: String,
    /// Bearer token accepted by the server
    pub bearer_token: String,
    /// Whether clients should skip TLS verification
    pub insecure_skip_tls_verify: bool,
}

/// Run loop of a prepared server
///
/// Receives the stop signal; resolves with the server's exit status once it
/// has shut down.
pub type ServerRun = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<()>> + Send>;

/// An embedded API server that is ready to run
pub struct PreparedServer {
    /// Connection details for out-of-process clients
    pub connection: ConnectionDescriptor,
    /// In-process request handler that proxied requests are delegated to
    pub handler: Router,
    /// Run loop, consumed by the lifecycle
    pub run: ServerRun,
}

impl PreparedServer {
    /// Assemble a prepared server from its parts
    pub fn new<F, Fut>(connection: ConnectionDescriptor, handler: Router, run: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            connection,
            handler,
            run: Box::new(move |stop| Box::pin(run(stop))),
        }
    }
}

/// Factory for the embedded API server
#[async_trait]
pub trait EmbeddedServer: Send + Sync {
    /// Initialize the server without starting to serve
    ///
    /// Any error here is fatal to the owning service.
    async fn prepare(&self) -> Result<PreparedServer>;
}
