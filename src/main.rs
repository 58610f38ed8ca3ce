//! Kubebridge - gateway embedding a resource API server

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use kubebridge_api::server::{bind, build_router, serve};
use kubebridge_api::{
    init_telemetry, run_service, ApiServerService, LogFormat, LoopbackApiServer, ServiceConfig,
    StaticTokenAuthenticator, TeamStore, TelemetryConfig,
};

/// Kubebridge - serves an embedded resource API to signed-in users under /k8s
#[derive(Parser, Debug)]
#[command(name = "kubebridge", version, about, long_about = None)]
struct Cli {
    /// Address the gateway listens on
    #[arg(long, env = "KUBEBRIDGE_LISTEN_ADDR", default_value = "0.0.0.0:3000")]
    listen_addr: SocketAddr,

    /// Loopback address of the embedded API server
    ///
    /// Written into the bootstrap kubeconfig. Port 0 picks a free port.
    #[arg(long, env = "KUBEBRIDGE_APISERVER_ADDR", default_value = "127.0.0.1:6443")]
    apiserver_addr: SocketAddr,

    /// Data directory; the kubeconfig is written to <data-dir>/k8s/grafana.kubeconfig
    #[arg(long, env = "KUBEBRIDGE_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Users file mapping bearer tokens to signed-in users
    #[arg(long, env = "KUBEBRIDGE_USERS_FILE")]
    users_file: PathBuf,

    /// Teams served by the embedded API server
    #[arg(long, env = "KUBEBRIDGE_TEAMS_FILE")]
    teams_file: Option<PathBuf>,

    /// Log output format
    #[arg(long, env = "KUBEBRIDGE_LOG_FORMAT", value_enum, default_value_t = LogFormatArg::Json)]
    log_format: LogFormatArg,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormatArg {
    Json,
    Text,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Json => LogFormat::Json,
            LogFormatArg::Text => LogFormat::Text,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_telemetry(TelemetryConfig {
        format: cli.log_format.into(),
        ..Default::default()
    })?;

    let authenticator = StaticTokenAuthenticator::from_yaml_file(&cli.users_file).await?;
    if authenticator.is_empty() {
        warn!(path = %cli.users_file.display(), "No users configured, every /k8s request will be rejected");
    }

    let teams = match &cli.teams_file {
        Some(path) => TeamStore::from_yaml_file(path).await?,
        None => TeamStore::default(),
    };

    let embedded = LoopbackApiServer::new(cli.apiserver_addr, Arc::new(teams));
    let service = Arc::new(ApiServerService::new(
        ServiceConfig {
            data_dir: cli.data_dir.clone(),
        },
        Arc::new(embedded),
    ));

    let app = build_router(&service, Arc::new(authenticator));
    let listener = bind(cli.listen_addr).await?;

    let shutdown = CancellationToken::new();
    let signals = tokio::spawn(shutdown_on_signal(shutdown.clone()));

    // Whichever side ends first takes the other one down
    let supervised = {
        let shutdown = shutdown.clone();
        async move {
            let result = run_service(service, shutdown.clone()).await;
            shutdown.cancel();
            result
        }
    };
    let gateway = {
        let shutdown = shutdown.clone();
        async move {
            let result = serve(listener, app, shutdown.clone()).await;
            shutdown.cancel();
            result
        }
    };

    let (service_result, gateway_result) = tokio::join!(supervised, gateway);

    signals.abort();
    let _ = signals.await;

    service_result?;
    gateway_result?;

    info!("Shutdown complete");
    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM
async fn shutdown_on_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("SIGINT (Ctrl+C) received, shutting down"),
                    _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
                    _ = shutdown.cancelled() => return,
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler, only Ctrl+C will stop the process");
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("SIGINT (Ctrl+C) received, shutting down"),
                    _ = shutdown.cancelled() => return,
                }
            }
        }
    }

    #[cfg(not(unix))]
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Ctrl+C received, shutting down"),
        _ = shutdown.cancelled() => return,
    }

    shutdown.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["kubebridge", "--users-file", "users.yaml"]).unwrap();

        assert_eq!(cli.listen_addr, "0.0.0.0:3000".parse().unwrap());
        assert_eq!(cli.apiserver_addr, "127.0.0.1:6443".parse().unwrap());
        assert_eq!(cli.data_dir, PathBuf::from("data"));
        assert!(cli.teams_file.is_none());
        assert_eq!(LogFormat::from(cli.log_format), LogFormat::Json);
    }

    #[test]
    fn test_cli_requires_users_file() {
        assert!(Cli::try_parse_from(["kubebridge"]).is_err());
    }

    #[test]
    fn test_cli_text_logs() {
        let cli = Cli::try_parse_from([
            "kubebridge",
            "--users-file",
            "users.yaml",
            "--log-format",
            "text",
        ])
        .unwrap();

        assert_eq!(LogFormat::from(cli.log_format), LogFormat::Text);
    }
}
