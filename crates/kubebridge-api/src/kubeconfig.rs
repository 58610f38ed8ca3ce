//! Bootstrap kubeconfig for out-of-process clients
//!
//! Once the embedded API server is up, its connection details are written to
//! `<data-dir>/k8s/grafana.kubeconfig` so local tooling (kubectl, scripts) can
//! talk to it directly.
//!
//! The file is a capability handoff: anyone able to read it acts as the
//! loopback identity against the embedded server. Protecting the data
//! directory is the operator's job; on Unix the file itself is kept at mode
//! `0600`, including when an existing file is replaced.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::embedded::ConnectionDescriptor;
use crate::error::{Error, Result};

/// Directory under the data dir holding API server state
pub const KUBECONFIG_DIR: &str = "k8s";

/// Kubeconfig file name
pub const KUBECONFIG_FILE: &str = "grafana.kubeconfig";

const CLUSTER_NAME: &str = "default-cluster";
const CONTEXT_NAME: &str = "default-context";
const USER_NAME: &str = "default";
const DEFAULT_NAMESPACE: &str = "default";

/// Kubeconfig structure
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Kubeconfig {
    /// API version
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    /// Kind (always "Config")
    pub kind: String,
    /// Clusters
    pub clusters: Vec<KubeconfigCluster>,
    /// Contexts
    pub contexts: Vec<KubeconfigContext>,
    /// Current context
    #[serde(rename = "current-context")]
    pub current_context: String,
    /// Users (auth infos)
    pub users: Vec<KubeconfigUser>,
}

/// Cluster entry in kubeconfig
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct KubeconfigCluster {
    /// Cluster name
    pub name: String,
    /// Cluster config
    pub cluster: ClusterConfig,
}

/// Cluster configuration
#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterConfig {
    /// API server URL
    pub server: String,
    /// Skip server certificate verification
    pub insecure_skip_tls_verify: bool,
}

/// Context entry in kubeconfig
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct KubeconfigContext {
    /// Context name
    pub name: String,
    /// Context config
    pub context: ContextConfig,
}

/// Context configuration
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Cluster name (reference)
    pub cluster: String,
    /// Default namespace
    pub namespace: String,
    /// User name (reference)
    pub user: String,
}

/// User entry in kubeconfig
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct KubeconfigUser {
    /// User name
    pub name: String,
    /// User config
    pub user: UserConfig,
}

/// User configuration (bearer token only, no client certificates)
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct UserConfig {
    /// Bearer token
    pub token: String,
}

/// Build the single-cluster kubeconfig for a connection
pub fn build_kubeconfig(connection: &ConnectionDescriptor) -> Kubeconfig {
    Kubeconfig {
        api_version: "v1".into(),
        kind: "Config".into(),
        clusters: vec![KubeconfigCluster {
            name: CLUSTER_NAME.into(),
            cluster: ClusterConfig {
                server: connection.host.clone(),
                insecure_skip_tls_verify: connection.insecure_skip_tls_verify,
            },
        }],
        contexts: vec![KubeconfigContext {
            name: CONTEXT_NAME.into(),
            context: ContextConfig {
                cluster: CLUSTER_NAME.into(),
                namespace: DEFAULT_NAMESPACE.into(),
                user: USER_NAME.into(),
            },
        }],
        current_context: CONTEXT_NAME.into(),
        users: vec![KubeconfigUser {
            name: USER_NAME.into(),
            user: UserConfig {
                token: connection.bearer_token.clone(),
            },
        }],
    }
}

/// Writes the bootstrap kubeconfig into the data directory
#[derive(Debug, Clone)]
pub struct KubeconfigWriter {
    dir: PathBuf,
}

impl KubeconfigWriter {
    /// Writer targeting `<data_dir>/k8s`
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: data_dir.as_ref().join(KUBECONFIG_DIR),
        }
    }

    /// Full path of the kubeconfig file
    pub fn path(&self) -> PathBuf {
        self.dir.join(KUBECONFIG_FILE)
    }

    /// Serialize and write the kubeconfig for `connection`, replacing any
    /// previous file. Returns the path written.
    pub async fn write(&self, connection: &ConnectionDescriptor) -> Result<PathBuf> {
        let yaml = serde_yaml::to_string(&build_kubeconfig(connection))
            .map_err(|e| Error::Kubeconfig(format!("failed to serialize kubeconfig: {}", e)))?;

        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            Error::Kubeconfig(format!("failed to create {}: {}", self.dir.display(), e))
        })?;

        let path = self.path();
        write_private(&path, yaml.as_bytes())
            .await
            .map_err(|e| Error::Kubeconfig(format!("failed to write {}: {}", path.display(), e)))?;

        info!(path = %path.display(), server = %connection.host, "Wrote kubeconfig");
        Ok(path)
    }
}

async fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    // mode() only applies on creation
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600)).await?;
    }
    file.write_all(contents).await?;
    file.flush().await
}
