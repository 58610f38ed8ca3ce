//! Gateway HTTP server
//!
//! Mounts the `/k8s` proxy routes behind the signed-in middleware together
//! with unauthenticated probes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::auth::{require_signed_in, Authenticator};
use crate::error::{Error, Result};
use crate::service::{ApiServerService, LifecycleState};

/// Build the gateway router
pub fn build_router(service: &ApiServerService, auth: Arc<dyn Authenticator>) -> Router {
    let probes = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz))
        .with_state(service.subscribe());

    service
        .routes()
        .route_layer(middleware::from_fn_with_state(auth, require_signed_in))
        .merge(probes)
}

async fn readyz(State(state): State<watch::Receiver<LifecycleState>>) -> (StatusCode, String) {
    let current = *state.borrow();
    match current {
        LifecycleState::Running => (StatusCode::OK, "ok".to_string()),
        other => (StatusCode::SERVICE_UNAVAILABLE, other.to_string()),
    }
}

/// Bind the gateway listener
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Startup(format!("failed to bind {}: {}", addr, e)))
}

/// Serve `app` until `shutdown` fires
pub async fn serve(listener: TcpListener, app: Router, shutdown: CancellationToken) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "Starting gateway server");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| Error::Server(format!("gateway server error: {}", e)))?;

    info!("Gateway server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use axum::http::Request;
    use chrono::{TimeZone, Utc};
    use kubebridge_resource::Team;
    use tower::ServiceExt;

    use crate::auth::{OrgRole, SignedInUser, StaticTokenAuthenticator};
    use crate::embedded::{LoopbackApiServer, TeamStore};
    use crate::service::ServiceConfig;
    use crate::supervisor::NamedService;

    const TOKEN: &str = "editor-token";

    fn authenticator() -> Arc<dyn Authenticator> {
        Arc::new(StaticTokenAuthenticator::new([(
            TOKEN.to_string(),
            SignedInUser {
                user_id: 4,
                org_id: 1,
                name: "Eddie".into(),
                login: "eddie".into(),
                org_role: OrgRole::Editor,
            },
        )]))
    }

    fn store() -> Arc<TeamStore> {
        Arc::new(TeamStore::new(vec![
            Team {
                id: 1,
                uid: "platform".into(),
                name: "Platform".into(),
                email: "platform@example.org".into(),
                org_id: 1,
                created: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
                updated: Utc.with_ymd_and_hms(2024, 3, 2, 12, 0, 0).unwrap(),
            },
            Team {
                id: 2,
                uid: "elsewhere".into(),
                name: "Elsewhere".into(),
                email: String::new(),
                org_id: 2,
                created: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
                updated: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            },
        ]))
    }

    fn service(data_dir: &std::path::Path) -> ApiServerService {
        let embedded = LoopbackApiServer::new(SocketAddr::from(([127, 0, 0, 1], 0)), store());
        ApiServerService::new(
            ServiceConfig {
                data_dir: data_dir.to_path_buf(),
            },
            Arc::new(embedded),
        )
    }

    fn get_request(path: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(path);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_healthz_needs_no_auth() {
        let data_dir = tempfile::tempdir().unwrap();
        let service = service(data_dir.path());
        let app = build_router(&service, authenticator());

        let response = app.oneshot(get_request("/healthz", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readyz_follows_lifecycle() {
        let data_dir = tempfile::tempdir().unwrap();
        let service = service(data_dir.path());
        let app = build_router(&service, authenticator());

        let before = app.clone().oneshot(get_request("/readyz", None)).await.unwrap();
        assert_eq!(before.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = axum::body::to_bytes(before.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"not-started");

        service.start().await.unwrap();

        let after = app.oneshot(get_request("/readyz", None)).await.unwrap();
        assert_eq!(after.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_k8s_routes_require_signed_in_user() {
        let data_dir = tempfile::tempdir().unwrap();
        let service = service(data_dir.path());
        service.start().await.unwrap();
        let app = build_router(&service, authenticator());

        let anonymous = app
            .clone()
            .oneshot(get_request("/k8s/apis", None))
            .await
            .unwrap();
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

        let wrong = app
            .oneshot(get_request("/k8s/apis", Some("nope")))
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_lists_teams_through_proxy() {
        let data_dir = tempfile::tempdir().unwrap();
        let service = service(data_dir.path());
        service.start().await.unwrap();
        let app = build_router(&service, authenticator());

        let response = app
            .oneshot(get_request(
                "/k8s/apis/iam.grafana.app/v0alpha1/namespaces/default/teams",
                Some(TOKEN),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let list = body_json(response).await;
        assert_eq!(list["kind"], "TeamList");
        assert_eq!(list["apiVersion"], "iam.grafana.app/v0alpha1");
        let items = list["items"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["spec"]["name"], "Platform");
        assert_eq!(items[0]["metadata"]["creationTimestamp"], "2024-03-01T12:00:00Z");
    }

    #[tokio::test]
    async fn test_unknown_team_is_not_found() {
        let data_dir = tempfile::tempdir().unwrap();
        let service = service(data_dir.path());
        service.start().await.unwrap();
        let app = build_router(&service, authenticator());

        let response = app
            .oneshot(get_request(
                "/k8s/apis/iam.grafana.app/v0alpha1/namespaces/default/teams/elsewhere",
                Some(TOKEN),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let status = body_json(response).await;
        assert_eq!(status["kind"], "Status");
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let listener = bind(SocketAddr::from(([127, 0, 0, 1], 0))).await.unwrap();
        let shutdown = CancellationToken::new();
        let app = Router::new().route("/healthz", get(|| async { "ok" }));

        let handle = tokio::spawn(serve(listener, app, shutdown.clone()));
        shutdown.cancel();

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
