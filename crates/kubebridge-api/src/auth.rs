//! Signed-in user authentication
//!
//! Every request reaching the proxied API carries a [`SignedInUser`] in its
//! extensions. The [`require_signed_in`] middleware resolves the caller's
//! bearer token through an [`Authenticator`] and rejects the request with
//! `401` when that fails, so handlers behind it can rely on the extension.
//!
//! # Static tokens
//!
//! [`StaticTokenAuthenticator`] reads a YAML file of token → user mappings:
//!
//! ```yaml
//! users:
//!   - token: 9f2c1d7e-admin
//!     userId: 1
//!     orgId: 1
//!     name: Admin
//!     login: admin
//!     orgRole: Admin
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::Response;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Role of a user within their organization
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrgRole {
    /// No basic role
    #[serde(rename = "None")]
    NoBasicRole,
    /// Read-only access
    #[default]
    Viewer,
    /// Read/write access
    Editor,
    /// Full access
    Admin,
}

impl OrgRole {
    /// Wire name of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            OrgRole::NoBasicRole => "None",
            OrgRole::Viewer => "Viewer",
            OrgRole::Editor => "Editor",
            OrgRole::Admin => "Admin",
        }
    }
}

impl fmt::Display for OrgRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authenticated caller identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedInUser {
    /// Numeric user id
    pub user_id: i64,
    /// Organization the user is acting in
    pub org_id: i64,
    /// Display name
    pub name: String,
    /// Login name
    #[serde(default)]
    pub login: String,
    /// Role within the organization
    #[serde(default)]
    pub org_role: OrgRole,
}

/// Resolves a bearer token to a signed-in user
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Validate `token` and return the user it belongs to
    async fn authenticate(&self, token: &str) -> Result<SignedInUser>;
}

/// Authenticator backed by a fixed token table
#[derive(Debug, Clone, Default)]
pub struct StaticTokenAuthenticator {
    users: HashMap<String, SignedInUser>,
}

#[derive(Debug, Deserialize)]
struct UsersFile {
    #[serde(default)]
    users: Vec<TokenEntry>,
}

#[derive(Debug, Deserialize)]
struct TokenEntry {
    token: String,
    #[serde(flatten)]
    user: SignedInUser,
}

impl StaticTokenAuthenticator {
    /// Build from `(token, user)` pairs
    pub fn new(users: impl IntoIterator<Item = (String, SignedInUser)>) -> Self {
        Self {
            users: users.into_iter().collect(),
        }
    }

    /// Parse a users document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: UsersFile = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Config(format!("invalid users file: {}", e)))?;

        let mut users = HashMap::with_capacity(file.users.len());
        for entry in file.users {
            if entry.token.is_empty() {
                return Err(Error::Config(format!(
                    "user {} has an empty token",
                    entry.user.login
                )));
            }
            if users.insert(entry.token, entry.user).is_some() {
                return Err(Error::Config("duplicate token in users file".into()));
            }
        }

        Ok(Self { users })
    }

    /// Load a users document from disk
    pub async fn from_yaml_file(path: &Path) -> Result<Self> {
        let yaml = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Config(format!("failed to read users file {}: {}", path.display(), e))
        })?;
        let authenticator = Self::from_yaml(&yaml)?;
        info!(path = %path.display(), users = authenticator.len(), "Loaded static token users");
        Ok(authenticator)
    }

    /// Number of known tokens
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether no tokens are configured
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<SignedInUser> {
        self.users
            .get(token)
            .cloned()
            .ok_or_else(|| Error::Unauthorized("invalid token".into()))
    }
}

/// Extract Bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Middleware that admits only signed-in users
///
/// On success the resolved [`SignedInUser`] is inserted into the request
/// extensions.
pub async fn require_signed_in(
    State(auth): State<Arc<dyn Authenticator>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response> {
    let token = extract_bearer_token(request.headers())
        .ok_or_else(|| Error::Unauthorized("Missing Authorization header".into()))?;

    let user = auth.authenticate(token).await?;

    debug!(
        user_id = user.user_id,
        org_id = user.org_id,
        path = %request.uri().path(),
        "Signed-in request"
    );

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{middleware, Extension, Router};
    use tower::ServiceExt;

    fn admin() -> SignedInUser {
        SignedInUser {
            user_id: 1,
            org_id: 1,
            name: "Admin".to_string(),
            login: "admin".to_string(),
            org_role: OrgRole::Admin,
        }
    }

    fn guarded(auth: Arc<dyn Authenticator>) -> Router {
        Router::new()
            .route(
                "/whoami",
                get(|Extension(user): Extension<SignedInUser>| async move { user.login }),
            )
            .route_layer(middleware::from_fn_with_state(auth, require_signed_in))
    }

    fn request(token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/whoami");
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_extract_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", "Bearer abc".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers), Some("abc"));

        headers.insert("Authorization", "Basic abc".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers), None);

        assert_eq!(extract_bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_org_role_wire_names() {
        assert_eq!(serde_json::to_value(OrgRole::Admin).unwrap(), "Admin");
        assert_eq!(serde_json::to_value(OrgRole::NoBasicRole).unwrap(), "None");
        assert_eq!(OrgRole::Editor.to_string(), "Editor");
    }

    #[tokio::test]
    async fn test_middleware_inserts_user() {
        let mut mock = MockAuthenticator::new();
        mock.expect_authenticate()
            .withf(|token| token == "good")
            .times(1)
            .returning(|_| Ok(admin()));

        let response = guarded(Arc::new(mock))
            .oneshot(request(Some("good")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"admin");
    }

    #[tokio::test]
    async fn test_middleware_rejects_missing_token() {
        let mut mock = MockAuthenticator::new();
        mock.expect_authenticate().never();

        let response = guarded(Arc::new(mock)).oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_middleware_rejects_invalid_token() {
        let mut mock = MockAuthenticator::new();
        mock.expect_authenticate()
            .returning(|_| Err(Error::Unauthorized("invalid token".into())));

        let response = guarded(Arc::new(mock))
            .oneshot(request(Some("bad")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_static_tokens_from_yaml() {
        let auth = StaticTokenAuthenticator::from_yaml(
            r#"
users:
  - token: t-admin
    userId: 1
    orgId: 1
    name: Admin
    login: admin
    orgRole: Admin
  - token: t-viewer
    userId: 7
    orgId: 2
    name: Vera
"#,
        )
        .unwrap();

        assert_eq!(auth.len(), 2);
        assert_eq!(auth.authenticate("t-admin").await.unwrap(), admin());

        let viewer = auth.authenticate("t-viewer").await.unwrap();
        assert_eq!(viewer.org_role, OrgRole::Viewer);
        assert_eq!(viewer.login, "");

        assert!(matches!(
            auth.authenticate("nope").await,
            Err(Error::Unauthorized(_))
        ));
    }

    #[test]
    fn test_static_tokens_reject_duplicates() {
        let result = StaticTokenAuthenticator::from_yaml(
            r#"
users:
  - { token: same, userId: 1, orgId: 1, name: A }
  - { token: same, userId: 2, orgId: 1, name: B }
"#,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_static_tokens_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = StaticTokenAuthenticator::from_yaml_file(&dir.path().join("users.yaml")).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
