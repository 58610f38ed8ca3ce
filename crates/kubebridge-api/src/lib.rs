//! Kubebridge API gateway
//!
//! Embeds a resource API server in the process and exposes it to signed-in
//! users through a catch-all `/k8s` route.
//!
//! # Architecture
//!
//! ```text
//! client ──► /k8s/* ──► signed-in ──► RequestProxy ──► embedded API server
//!                       middleware    (X-Remote-*)       (in-process)
//!
//! kubectl ──► grafana.kubeconfig ──► embedded API server (loopback listener)
//! ```
//!
//! # Endpoints
//!
//! - `* /k8s/*` - Proxy to the embedded API server
//! - `GET /healthz` - Liveness
//! - `GET /readyz` - Ready once the embedded API server runs

#![deny(missing_docs)]

pub mod auth;
pub mod embedded;
pub mod error;
pub mod kubeconfig;
pub mod proxy;
pub mod server;
pub mod service;
pub mod supervisor;
pub mod telemetry;

pub use auth::{Authenticator, OrgRole, SignedInUser, StaticTokenAuthenticator};
pub use embedded::{ConnectionDescriptor, EmbeddedServer, LoopbackApiServer, PreparedServer, TeamStore};
pub use error::{Error, Result};
pub use kubeconfig::KubeconfigWriter;
pub use proxy::RequestProxy;
pub use server::build_router;
pub use service::{ApiServerService, LifecycleState, ServiceConfig};
pub use supervisor::{run_service, NamedService};
pub use telemetry::{init_telemetry, LogFormat, TelemetryConfig};
