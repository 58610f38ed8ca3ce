//! Catch-all proxy into the embedded API server
//!
//! Every request under `/k8s` is rewritten and handed to the delegate
//! installed by the service lifecycle:
//!
//! 1. Strip the `/k8s` prefix from the path (query string kept)
//! 2. Drop client-supplied `X-Remote-*` and `Authorization` headers
//! 3. Set identity headers from the [`SignedInUser`]
//! 4. Forward to the delegate router
//!
//! # Delegate publication
//!
//! The delegate is written exactly once, by `start`, and read by every
//! request afterwards. It lives in a [`OnceLock`], which gives readers a
//! happens-before edge with the single write, so no per-request locking is
//! needed. It is never replaced.
//!
//! A request that arrives before the delegate is installed means the service
//! was wired up out of order. That is treated as a bug, not as an HTTP error:
//! the handling task panics.

use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Request, Uri};
use axum::response::Response;
use axum::routing::any;
use axum::{Extension, Router};
use tower::ServiceExt;
use tracing::{debug, info};

use crate::auth::SignedInUser;
use crate::error::{Error, Result};

/// Path prefix routed to the embedded API server
pub const ROUTE_PREFIX: &str = "/k8s";

/// Authenticated user id
pub const REMOTE_USER: &str = "x-remote-user";
/// Authenticated user group
pub const REMOTE_GROUP: &str = "x-remote-group";
/// Display name of the user
pub const REMOTE_EXTRA_TOKEN_NAME: &str = "x-remote-extra-token-name";
/// Organization role of the user
pub const REMOTE_EXTRA_ORG_ROLE: &str = "x-remote-extra-org-role";
/// Organization id of the user
pub const REMOTE_EXTRA_ORG_ID: &str = "x-remote-extra-org-id";
/// User id, repeated as an extra attribute
pub const REMOTE_EXTRA_USER_ID: &str = "x-remote-extra-user-id";

/// Group assigned to every proxied user
pub const REMOTE_GROUP_VALUE: &str = "grafana";

const REMOTE_HEADER_PREFIX: &str = "x-remote-";

/// Forwards signed-in requests to the embedded API server
#[derive(Default)]
pub struct RequestProxy {
    delegate: OnceLock<Router>,
}

impl RequestProxy {
    /// Proxy with no delegate installed yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the delegate; fails if one is already installed
    pub fn install(&self, delegate: Router) -> Result<()> {
        self.delegate
            .set(delegate)
            .map_err(|_| Error::Config("k8s api handler already installed".into()))?;
        info!("K8s API handler installed");
        Ok(())
    }

    /// Whether a delegate has been published
    pub fn is_installed(&self) -> bool {
        self.delegate.get().is_some()
    }

    /// Rewrite `request` for `user` and hand it to the delegate
    ///
    /// # Panics
    ///
    /// Panics if no delegate has been installed.
    pub async fn forward(&self, user: &SignedInUser, request: Request<Body>) -> Result<Response> {
        let Some(delegate) = self.delegate.get() else {
            panic!("k8s api handler not installed");
        };

        let request = rewrite_request(request, user)?;
        debug!(
            user_id = user.user_id,
            method = %request.method(),
            path = %request.uri().path(),
            "Forwarding to embedded API server"
        );

        let response = delegate
            .clone()
            .oneshot(request)
            .await
            .unwrap_or_else(|never| match never {});
        Ok(response)
    }
}

/// Routes for `/k8s` and everything below it
///
/// The routes expect a [`SignedInUser`] extension, put there by
/// [`require_signed_in`](crate::auth::require_signed_in).
pub fn proxy_routes(proxy: Arc<RequestProxy>) -> Router {
    Router::new()
        .route(ROUTE_PREFIX, any(proxy_handler))
        // `{*path}` does not match an empty tail
        .route(&format!("{}/", ROUTE_PREFIX), any(proxy_handler))
        .route(&format!("{}/{{*path}}", ROUTE_PREFIX), any(proxy_handler))
        .with_state(proxy)
}

/// Handle any request under `/k8s`
pub async fn proxy_handler(
    State(proxy): State<Arc<RequestProxy>>,
    Extension(user): Extension<SignedInUser>,
    request: Request<Body>,
) -> Result<Response> {
    proxy.forward(&user, request).await
}

/// Apply path and identity rewriting to a proxied request
pub fn rewrite_request(mut request: Request<Body>, user: &SignedInUser) -> Result<Request<Body>> {
    *request.uri_mut() = strip_route_prefix(request.uri())?;

    let headers = request.headers_mut();
    strip_remote_headers(headers);
    headers.remove(axum::http::header::AUTHORIZATION);

    headers.insert(REMOTE_USER, HeaderValue::from(user.user_id));
    headers.insert(REMOTE_GROUP, HeaderValue::from_static(REMOTE_GROUP_VALUE));
    headers.insert(REMOTE_EXTRA_TOKEN_NAME, header_value(&user.name)?);
    headers.insert(
        REMOTE_EXTRA_ORG_ROLE,
        HeaderValue::from_static(user.org_role.as_str()),
    );
    headers.insert(REMOTE_EXTRA_ORG_ID, HeaderValue::from(user.org_id));
    headers.insert(REMOTE_EXTRA_USER_ID, HeaderValue::from(user.user_id));

    Ok(request)
}

/// Remove every `X-Remote-*` header so clients cannot spoof identity
pub fn strip_remote_headers(headers: &mut HeaderMap) {
    let spoofable: Vec<_> = headers
        .keys()
        .filter(|name| name.as_str().starts_with(REMOTE_HEADER_PREFIX))
        .cloned()
        .collect();

    for name in spoofable {
        headers.remove(&name);
    }
}

/// Strip `/k8s` from the request path, keeping the query string
///
/// `/k8s` itself maps to `/`. Paths outside the prefix are returned as-is.
pub fn strip_route_prefix(uri: &Uri) -> Result<Uri> {
    let path = uri.path();
    let stripped = match path.strip_prefix(ROUTE_PREFIX) {
        Some("") => "/",
        Some(rest) if rest.starts_with('/') => rest,
        _ => path,
    };

    let rewritten = match uri.query() {
        Some(query) => format!("{}?{}", stripped, query),
        None => stripped.to_string(),
    };

    rewritten
        .parse()
        .map_err(|e| Error::BadRequest(format!("invalid request path {:?}: {}", rewritten, e)))
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| Error::BadRequest(format!("value {:?} cannot be sent as a header", value)))
}
