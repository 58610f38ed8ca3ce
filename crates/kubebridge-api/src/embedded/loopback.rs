//! In-process resource API server
//!
//! Serves teams as versioned resources:
//!
//! - `GET /healthz`
//! - `GET /apis` - group discovery
//! - `GET /apis/iam.grafana.app/v0alpha1/namespaces/{namespace}/teams`
//! - `GET /apis/iam.grafana.app/v0alpha1/namespaces/{namespace}/teams/{name}`
//!
//! The same router is reachable two ways. Requests proxied by the gateway
//! arrive in-process and already carry `X-Remote-*` identity headers.
//! Direct clients connect to the loopback listener and must present the
//! generated bearer token, which maps to a fixed loopback identity.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Path as UrlPath, State};
use axum::http::{HeaderValue, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use kubebridge_resource::{ResourceKind, ResourceList, Team, TeamResource, TeamSpec, ToResource};

use super::{ConnectionDescriptor, EmbeddedServer, PreparedServer};
use crate::auth::extract_bearer_token;
use crate::error::{Error, Result};
use crate::proxy::{strip_remote_headers, REMOTE_GROUP, REMOTE_USER};

/// Identity assigned to holders of the loopback token
pub const LOOPBACK_USER: &str = "kubebridge:loopback";

/// Group assigned to holders of the loopback token
pub const LOOPBACK_GROUP: &str = "system:masters";

/// Map a namespace to the organization it belongs to
///
/// `default` is organization 1, `org-<n>` is organization `n`.
pub fn namespace_org_id(namespace: &str) -> Option<i64> {
    match namespace {
        "default" => Some(1),
        other => other
            .strip_prefix("org-")?
            .parse::<i64>()
            .ok()
            .filter(|id| *id > 0),
    }
}

/// Read-only in-memory team storage
#[derive(Debug, Clone, Default)]
pub struct TeamStore {
    teams: Vec<Team>,
}

#[derive(Debug, Deserialize)]
struct TeamsFile {
    #[serde(default)]
    teams: Vec<Team>,
}

impl TeamStore {
    /// Store holding `teams`
    pub fn new(teams: Vec<Team>) -> Self {
        Self { teams }
    }

    /// Parse a `teams:` document; uids must be unique within an organization
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: TeamsFile = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Config(format!("invalid teams file: {}", e)))?;

        let mut seen = HashSet::new();
        for team in &file.teams {
            if !seen.insert((team.org_id, team.uid.as_str())) {
                return Err(Error::Config(format!(
                    "duplicate team uid {:?} in org {}",
                    team.uid, team.org_id
                )));
            }
        }

        Ok(Self::new(file.teams))
    }

    /// Load a `teams:` document from disk
    pub async fn from_yaml_file(path: &Path) -> Result<Self> {
        let yaml = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Config(format!("failed to read teams file {}: {}", path.display(), e))
        })?;
        let store = Self::from_yaml(&yaml)?;
        info!(path = %path.display(), teams = store.len(), "Loaded teams");
        Ok(store)
    }

    /// Teams of one organization
    pub fn list(&self, org_id: i64) -> impl Iterator<Item = &Team> {
        self.teams.iter().filter(move |t| t.org_id == org_id)
    }

    /// One team by uid
    pub fn get(&self, org_id: i64, uid: &str) -> Option<&Team> {
        self.list(org_id).find(|t| t.uid == uid)
    }

    /// Number of teams across all organizations
    pub fn len(&self) -> usize {
        self.teams.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.teams.is_empty()
    }
}

/// Embedded API server listening on a local TCP address
pub struct LoopbackApiServer {
    bind_addr: SocketAddr,
    store: Arc<TeamStore>,
}

impl LoopbackApiServer {
    /// Server that will bind `bind_addr` and serve `store`
    pub fn new(bind_addr: SocketAddr, store: Arc<TeamStore>) -> Self {
        Self { bind_addr, store }
    }
}

#[async_trait]
impl EmbeddedServer for LoopbackApiServer {
    async fn prepare(&self) -> Result<PreparedServer> {
        let listener = TcpListener::bind(self.bind_addr)
            .await
            .map_err(|e| Error::Startup(format!("failed to bind {}: {}", self.bind_addr, e)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| Error::Startup(format!("failed to read bound address: {}", e)))?;

        let bearer_token = uuid::Uuid::new_v4().to_string();
        let handler = api_router(self.store.clone());
        let external = external_router(handler.clone(), &bearer_token);

        info!(addr = %addr, teams = self.store.len(), "Embedded API server prepared");

        let connection = ConnectionDescriptor {
            host: format!("http://{}", addr),
            bearer_token,
            insecure_skip_tls_verify: true,
        };

        Ok(PreparedServer::new(connection, handler, move |stop| {
            serve_loopback(listener, external, stop)
        }))
    }
}

async fn serve_loopback(listener: TcpListener, router: Router, stop: CancellationToken) -> Result<()> {
    info!("Embedded API server running");

    axum::serve(listener, router)
        .with_graceful_shutdown(stop.cancelled_owned())
        .await
        .map_err(|e| Error::Server(format!("loopback listener failed: {}", e)))?;

    info!("Embedded API server stopped");
    Ok(())
}

/// Resource API router for in-process (proxied) requests
pub fn api_router(store: Arc<TeamStore>) -> Router {
    let collection = format!(
        "/apis/{}/{}/namespaces/{{namespace}}/{}",
        Team::GROUP,
        Team::VERSION,
        Team::PLURAL
    );
    let item = format!("{}/{{name}}", collection);

    Router::new()
        .route("/apis", get(discovery))
        .route(&collection, get(list_teams))
        .route(&item, get(get_team))
        .route_layer(middleware::from_fn(require_remote_user))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(store)
}

/// `handler` guarded by the loopback bearer token
fn external_router(handler: Router, bearer_token: &str) -> Router {
    let token: Arc<str> = Arc::from(bearer_token);
    handler.layer(middleware::from_fn_with_state(token, require_loopback_token))
}

async fn require_remote_user(request: Request<Body>, next: Next) -> Result<Response> {
    let has_user = request
        .headers()
        .get(REMOTE_USER)
        .is_some_and(|v| !v.is_empty());
    if !has_user {
        return Err(Error::Unauthorized("missing remote user".into()));
    }
    Ok(next.run(request).await)
}

async fn require_loopback_token(
    State(token): State<Arc<str>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response> {
    let valid = extract_bearer_token(request.headers()) == Some(&*token);
    if !valid {
        return Err(Error::Unauthorized("invalid loopback token".into()));
    }

    let headers = request.headers_mut();
    strip_remote_headers(headers);
    headers.insert(REMOTE_USER, HeaderValue::from_static(LOOPBACK_USER));
    headers.insert(REMOTE_GROUP, HeaderValue::from_static(LOOPBACK_GROUP));

    Ok(next.run(request).await)
}

async fn discovery() -> Json<serde_json::Value> {
    let group_version = Team::api_version();
    Json(serde_json::json!({
        "kind": "APIGroupList",
        "apiVersion": "v1",
        "groups": [{
            "name": Team::GROUP,
            "versions": [{ "groupVersion": group_version, "version": Team::VERSION }],
            "preferredVersion": { "groupVersion": group_version, "version": Team::VERSION }
        }]
    }))
}

fn resolve_org(namespace: &str) -> Result<i64> {
    namespace_org_id(namespace)
        .ok_or_else(|| Error::NotFound(format!("namespace {:?} not found", namespace)))
}

async fn list_teams(
    State(store): State<Arc<TeamStore>>,
    UrlPath(namespace): UrlPath<String>,
) -> Result<Json<ResourceList<TeamSpec>>> {
    let org_id = resolve_org(&namespace)?;
    let items: Vec<TeamResource> = store.list(org_id).map(ToResource::to_resource).collect();

    debug!(namespace = %namespace, count = items.len(), "Listing teams");
    Ok(Json(ResourceList::of::<Team>(items)))
}

async fn get_team(
    State(store): State<Arc<TeamStore>>,
    UrlPath((namespace, name)): UrlPath<(String, String)>,
) -> Result<Json<TeamResource>> {
    let org_id = resolve_org(&namespace)?;
    let team = store
        .get(org_id, &name)
        .ok_or_else(|| Error::NotFound(format!("teams {:?} not found", name)))?;

    debug!(namespace = %namespace, name = %name, "Getting team");
    Ok(Json(team.to_resource()))
}
