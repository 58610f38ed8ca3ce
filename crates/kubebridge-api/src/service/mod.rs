//! Embedded API server lifecycle
//!
//! [`ApiServerService`] owns the embedded resource API server and drives it
//! through its lifecycle:
//!
//! ```text
//! NotStarted ──start ok──► Running ──cancelled──► Stopping ──server exits──► Terminated
//!     │                       │
//!     └──start fails──► Failed ◄──server exits with error
//! ```
//!
//! `start` prepares the server, writes the bootstrap kubeconfig, installs the
//! proxy delegate, and spawns the server's run loop. `run` then waits for
//! whichever comes first: the run loop reporting its exit status, or the
//! governing cancellation token firing.
//!
//! The catch-all `/k8s` route exists from construction on; requests are only
//! served correctly once `start` has installed the delegate.


use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use axum::Router;
use tokio::sync::{oneshot, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::embedded::{ConnectionDescriptor, EmbeddedServer, PreparedServer};
use crate::error::{Error, Result};
use crate::kubeconfig::KubeconfigWriter;
use crate::proxy::{proxy_routes, RequestProxy};
use crate::supervisor::NamedService;

/// Name under which the service is supervised
pub const SERVICE_NAME: &str = "kubernetes-apiserver";

/// Lifecycle state of the embedded API server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed, `start` not yet called
    NotStarted,
    /// `start` in progress
    Starting,
    /// Started; the run loop is serving
    Running,
    /// Stop requested, waiting for the run loop to exit
    Stopping,
    /// Run loop exited cleanly
    Terminated,
    /// Startup or the run loop failed
    Failed,
}

impl LifecycleState {
    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Terminated | LifecycleState::Failed)
    }

    /// Lowercase name used in logs and readiness responses
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::NotStarted => "not-started",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Terminated => "terminated",
            LifecycleState::Failed => "failed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Data directory; the kubeconfig goes to `<data_dir>/k8s/`
    pub data_dir: PathBuf,
}

type ExitStatus = oneshot::Receiver<Result<()>>;

/// Supervisable owner of the embedded API server
pub struct ApiServerService {
    embedded: Arc<dyn EmbeddedServer>,
    kubeconfig: KubeconfigWriter,
    proxy: Arc<RequestProxy>,
    routes: Router,
    rest_config: OnceLock<ConnectionDescriptor>,
    stop: CancellationToken,
    stopped: Mutex<Option<ExitStatus>>,
    state: Arc<watch::Sender<LifecycleState>>,
}

impl ApiServerService {
    /// Build the service and register its `/k8s` routes
    pub fn new(config: ServiceConfig, embedded: Arc<dyn EmbeddedServer>) -> Self {
        let proxy = Arc::new(RequestProxy::new());
        let routes = proxy_routes(proxy.clone());
        let (state, _) = watch::channel(LifecycleState::NotStarted);

        Self {
            embedded,
            kubeconfig: KubeconfigWriter::new(&config.data_dir),
            proxy,
            routes,
            rest_config: OnceLock::new(),
            stop: CancellationToken::new(),
            stopped: Mutex::new(None),
            state: Arc::new(state),
        }
    }

    /// The `/k8s` routes, to be mounted behind the signed-in middleware
    pub fn routes(&self) -> Router {
        self.routes.clone()
    }

    /// Connection details of the embedded server, once `start` has succeeded
    pub fn rest_config(&self) -> Option<ConnectionDescriptor> {
        self.rest_config.get().cloned()
    }

    /// Where the bootstrap kubeconfig is written
    pub fn kubeconfig_path(&self) -> PathBuf {
        self.kubeconfig.path()
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    async fn bring_up(&self) -> Result<()> {
        let span = info_span!("embedded_apiserver", service = SERVICE_NAME);

        let PreparedServer {
            connection,
            handler,
            run,
        } = self.embedded.prepare().instrument(span.clone()).await?;

        self.kubeconfig.write(&connection).await?;
        self.proxy.install(handler)?;

        let (exit_tx, exit_rx) = oneshot::channel();
        *self.stopped.lock().await = Some(exit_rx);

        let server = run(self.stop.clone());
        let state = self.state.clone();
        tokio::spawn(
            async move {
                let result = server.await;
                match &result {
                    Ok(()) => {
                        transition(&state, LifecycleState::Terminated);
                    }
                    Err(e) => {
                        warn!(error = %e, "Embedded API server exited with error");
                        transition(&state, LifecycleState::Failed);
                    }
                }
                // run() may already have returned after cancellation
                let _ = exit_tx.send(result);
            }
            .instrument(span),
        );

        // Publish only after everything above succeeded
        let _ = self.rest_config.set(connection);
        Ok(())
    }
}

#[async_trait]
impl NamedService for ApiServerService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    async fn start(&self) -> Result<()> {
        let accepted = self.state.send_if_modified(|state| {
            if *state == LifecycleState::NotStarted {
                *state = LifecycleState::Starting;
                true
            } else {
                false
            }
        });
        if !accepted {
            return Err(Error::Config(format!(
                "{} cannot start from state {}",
                SERVICE_NAME,
                self.state()
            )));
        }

        match self.bring_up().await {
            Ok(()) => {
                transition(&self.state, LifecycleState::Running);
                info!(service = SERVICE_NAME, kubeconfig = %self.kubeconfig_path().display(), "Started");
                Ok(())
            }
            Err(e) => {
                error!(service = SERVICE_NAME, error = %e, "Failed to start");
                transition(&self.state, LifecycleState::Failed);
                Err(e)
            }
        }
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let exit_status = self.stopped.lock().await.take();
        let exited = async move {
            match exit_status {
                Some(rx) => rx.await,
                // Nothing was spawned, only cancellation can end the wait
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            exit = exited => match exit {
                Ok(Ok(())) => {
                    info!(service = SERVICE_NAME, "Embedded API server exited");
                    Ok(())
                }
                Ok(Err(e)) => Err(e),
                Err(_) => {
                    transition(&self.state, LifecycleState::Failed);
                    Err(Error::Internal(
                        "embedded API server exited without reporting a status".into(),
                    ))
                }
            },
            _ = cancel.cancelled() => {
                if !self.stop.is_cancelled() {
                    info!(service = SERVICE_NAME, "Cancelled, stopping embedded API server");
                    transition(&self.state, LifecycleState::Stopping);
                    self.stop.cancel();
                }
                Ok(())
            }
        }
    }
}

/// Move to `next` unless the current state is terminal
///
/// `Stopping` is only entered from `Running`.
fn transition(state: &watch::Sender<LifecycleState>, next: LifecycleState) {
    state.send_if_modified(|current| {
        let allowed = !current.is_terminal()
            && *current != next
            && (next != LifecycleState::Stopping || *current == LifecycleState::Running);
        if allowed {
            info!(from = %current, to = %next, "Lifecycle transition");
            *current = next;
        }
        allowed
    });
}
