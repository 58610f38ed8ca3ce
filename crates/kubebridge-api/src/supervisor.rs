//! Named service supervision
//!
//! A [`NamedService`] is started once and then run until it exits or its
//! cancellation token fires. [`run_service`] drives one service through both
//! phases and logs the outcome under the service's name.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

use crate::error::Result;

/// A long-running component with a start phase and a run phase
#[async_trait]
pub trait NamedService: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Bring the service up. Called at most once.
    async fn start(&self) -> Result<()>;

    /// Block until the service exits or `cancel` fires
    ///
    /// Returning after cancellation does not imply the service has finished
    /// shutting down.
    async fn run(&self, cancel: CancellationToken) -> Result<()>;
}

/// Start `service`, then run it until it exits or `cancel` fires
///
/// A failed start skips the run phase.
pub async fn run_service(service: Arc<dyn NamedService>, cancel: CancellationToken) -> Result<()> {
    let span = info_span!("service", name = %service.name());

    async move {
        info!("Starting service");
        if let Err(e) = service.start().await {
            error!(error = %e, "Service failed to start");
            return Err(e);
        }

        info!("Service running");
        match service.run(cancel).await {
            Ok(()) => {
                info!("Service stopped");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Service exited with error");
                Err(e)
            }
        }
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::error::Error;

    #[derive(Default)]
    struct FakeService {
        fail_start: bool,
        exit_error: Option<String>,
        starts: AtomicUsize,
        runs: AtomicUsize,
    }

    #[async_trait]
    impl NamedService for FakeService {
        fn name(&self) -> &str {
            "fake"
        }

        async fn start(&self) -> Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.fail_start {
                return Err(Error::Startup("no capacity".into()));
            }
            Ok(())
        }

        async fn run(&self, cancel: CancellationToken) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if let Some(message) = &self.exit_error {
                return Err(Error::Server(message.clone()));
            }
            cancel.cancelled().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_start_skips_run() {
        let service = Arc::new(FakeService {
            fail_start: true,
            ..Default::default()
        });

        let result = run_service(service.clone(), CancellationToken::new()).await;

        assert!(matches!(result, Err(Error::Startup(_))));
        assert_eq!(service.starts.load(Ordering::SeqCst), 1);
        assert_eq!(service.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_ends_run() {
        let service = Arc::new(FakeService::default());
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_service(service.clone(), cancel.clone()));
        cancel.cancel();

        assert!(handle.await.unwrap().is_ok());
        assert_eq!(service.starts.load(Ordering::SeqCst), 1);
        assert_eq!(service.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_error_is_returned() {
        let service = Arc::new(FakeService {
            exit_error: Some("listener closed".into()),
            ..Default::default()
        });

        let result = run_service(service, CancellationToken::new()).await;

        match result {
            Err(Error::Server(message)) => assert_eq!(message, "listener closed"),
            other => panic!("expected server error, got {:?}", other),
        }
    }
}
