//! Cluster pull secret handling.
//!
//! The seed must not carry the cluster's registry credentials. Before the
//! imager runs, the pull secret is replaced by a placeholder and the
//! agent waits until the Machine Config Operator has rolled the new value
//! out to the kubelet auth file on the node.

use std::convert::Infallible;
use std::time::Duration;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use lca_cluster::{get_as, resources, ApiError, ObjectRef};
use lca_reconcile::{poll_until, PollError, PollSpec};
use serde_json::json;
use thiserror::Error;
use tracing::info;

use super::SeedGenReconciler;

/// Credentials written in place of the real pull secret.
pub const PULL_SECRET_PLACEHOLDER: &str = r#"{"auths":{"registry.connect.redhat.com":{"username":"empty","password":"empty","auth":"ZW1wdHk6ZW1wdHk=","email":""}}}"#;

/// Kubelet registry auth file on the host.
pub const KUBELET_AUTH_FILE: &str = "/var/lib/kubelet/config.json";

pub(crate) const PULL_SECRET_NAMESPACE: &str = "openshift-config";
pub(crate) const PULL_SECRET_NAME: &str = "pull-secret";
const DOCKER_CONFIG_KEY: &str = ".dockerconfigjson";

const PROPAGATION_POLL: PollSpec = PollSpec::new(Duration::from_secs(30), Duration::from_secs(600));

#[derive(Debug, Error)]
pub enum PullSecretError {
    #[error("failed to update pull-secret: {0}")]
    Update(#[source] ApiError),

    #[error("timed out waiting for MCO to override pull-secret file: {0}")]
    Propagation(#[source] PollError<Infallible>),
}

fn pull_secret_ref() -> ObjectRef {
    ObjectRef::namespaced(resources::secret(), PULL_SECRET_NAMESPACE, PULL_SECRET_NAME)
}

impl SeedGenReconciler {
    /// Current `.dockerconfigjson` of the cluster pull secret.
    pub(crate) async fn read_pull_secret(&self) -> Result<Vec<u8>, ApiError> {
        let target = pull_secret_ref();
        let secret: Secret = get_as(self.client.as_ref(), &target).await?;
        secret
            .data
            .and_then(|mut data| data.remove(DOCKER_CONFIG_KEY))
            .map(|ByteString(bytes)| bytes)
            .ok_or_else(|| ApiError::NotFound(format!("key {DOCKER_CONFIG_KEY} in {target}")))
    }

    /// Contents of the kubelet auth file on the host, trimmed.
    pub(crate) async fn host_pull_secret(&self) -> Option<String> {
        let path = self.config.host_path(KUBELET_AUTH_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Some(contents.trim().to_string()),
            Err(e) => {
                info!(path = %path.display(), error = %e, "Failed to read kubelet auth file, will retry");
                None
            }
        }
    }

    /// Replace the cluster pull secret and wait until the node uses it.
    pub(crate) async fn override_pull_secret(&self, docker_config: &[u8]) -> Result<(), PullSecretError> {
        let patch = json!({ "data": { DOCKER_CONFIG_KEY: ByteString(docker_config.to_vec()) } });
        self.client
            .merge_patch(&pull_secret_ref(), &patch)
            .await
            .map_err(PullSecretError::Update)?;

        let expected = String::from_utf8_lossy(docker_config).trim().to_string();
        let mut shutdown = self.shutdown.clone();

        poll_until(PROPAGATION_POLL, "MCO to override pull-secret file", &mut shutdown, || async {
            info!("Waiting for MCO to override pull-secret file");
            if self.host_pull_secret().await.as_deref() != Some(expected.as_str()) {
                return Ok(false);
            }
            if let Err(e) = self.health.machine_config_pools_ready().await {
                info!(reason = %e, "Waiting for MachineConfigPools");
                return Ok(false);
            }
            Ok::<_, Infallible>(true)
        })
        .await
        .map_err(PullSecretError::Propagation)
    }
}
