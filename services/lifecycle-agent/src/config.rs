//! Configuration for the lifecycle agent.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// Default location of the seed generation workspace on the host.
pub const DEFAULT_WORKSPACE_DIR: &str = "/var/lib/lca/ibu-seedgen-orch";

/// Kubeconfig used by `oc` commands run on the host.
pub const DEFAULT_HOST_KUBECONFIG: &str =
    "/etc/kubernetes/static-pod-resources/kube-apiserver-certs/secrets/node-kubeconfigs/lb-ext.kubeconfig";

/// Recert image used when the request does not override it.
pub const DEFAULT_RECERT_IMAGE: &str = "quay.io/edge-infrastructure/recert:v0";

/// Lifecycle agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Where the host filesystem is mounted inside the agent container.
    pub host_root: PathBuf,

    /// Workspace directory, as a path on the host.
    pub workspace_dir: PathBuf,

    /// Namespace the agent runs in; holds the seedgen secret.
    pub namespace: String,

    /// Name of the agent's own pod, used to discover its image.
    pub pod_name: Option<String>,

    /// Explicit agent image; skips the pod lookup when set.
    pub agent_image: Option<String>,

    /// Kubeconfig path on the host, passed to `oc`.
    pub host_kubeconfig: String,

    /// Recert image used when the request does not set one.
    pub default_recert_image: String,

    /// Requeue delay while waiting for the cluster to stabilize.
    pub health_check_interval: Duration,

    /// Requeue delay when the request cannot be read.
    pub requeue_short_interval: Duration,

    /// Run host commands through `nsenter` into PID 1's namespaces.
    pub use_nsenter: bool,

    /// Log filter directives, used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host_root: PathBuf::from("/host"),
            workspace_dir: PathBuf::from(DEFAULT_WORKSPACE_DIR),
            namespace: "openshift-lifecycle-agent".to_string(),
            pod_name: None,
            agent_image: None,
            host_kubeconfig: DEFAULT_HOST_KUBECONFIG.to_string(),
            default_recert_image: DEFAULT_RECERT_IMAGE.to_string(),
            health_check_interval: lca_reconcile::DEFAULT_HEALTH_CHECK_INTERVAL,
            requeue_short_interval: lca_reconcile::DEFAULT_REQUEUE_SHORT,
            use_nsenter: true,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let host_root = std::env::var("LCA_HOST_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.host_root);

        let workspace_dir = std::env::var("LCA_WORKSPACE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.workspace_dir);
        anyhow::ensure!(
            workspace_dir.is_absolute(),
            "LCA_WORKSPACE_DIR must be an absolute host path, got {}",
            workspace_dir.display()
        );

        let namespace = std::env::var("LCA_NAMESPACE").unwrap_or(defaults.namespace);
        let pod_name = std::env::var("MY_POD_NAME").ok().filter(|s| !s.is_empty());
        let agent_image = std::env::var("LCA_IMAGE").ok().filter(|s| !s.is_empty());
        let host_kubeconfig = std::env::var("LCA_KUBECONFIG").unwrap_or(defaults.host_kubeconfig);
        let default_recert_image = std::env::var("LCA_RECERT_IMAGE").unwrap_or(defaults.default_recert_image);

        let health_check_interval = match std::env::var("LCA_HEALTH_CHECK_INTERVAL") {
            Ok(value) => Duration::from_secs(
                value
                    .parse()
                    .with_context(|| format!("invalid LCA_HEALTH_CHECK_INTERVAL: {value}"))?,
            ),
            Err(_) => defaults.health_check_interval,
        };

        let use_nsenter = std::env::var("LCA_USE_NSENTER")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(defaults.use_nsenter);

        let log_level = std::env::var("LCA_LOG_LEVEL").unwrap_or(defaults.log_level);

        Ok(Self {
            host_root,
            workspace_dir,
            namespace,
            pod_name,
            agent_image,
            host_kubeconfig,
            default_recert_image,
            health_check_interval,
            requeue_short_interval: defaults.requeue_short_interval,
            use_nsenter,
            log_level,
        })
    }

    /// Log filter: `RUST_LOG` when set, otherwise `log_level`.
    pub fn log_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.log_level))
    }

    /// Translate a host path into the path visible to the agent.
    pub fn host_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        self.host_root.join(path.strip_prefix("/").unwrap_or(path))
    }
}
