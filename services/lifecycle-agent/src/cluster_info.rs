//! Facts about the local cluster needed by the workflow.

use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use lca_cluster::{get_as, resources, ApiError, ClusterReader, ObjectRef};
use serde::Deserialize;
use thiserror::Error;

/// Container of the agent pod whose image also carries the imager.
const MANAGER_CONTAINER: &str = "manager";

const CLUSTER_CONFIG_NAMESPACE: &str = "kube-system";
const CLUSTER_CONFIG_NAME: &str = "cluster-config-v1";
const INSTALL_CONFIG_KEY: &str = "install-config";

#[derive(Debug, Error)]
pub enum ClusterInfoError {
    #[error("failed to get pod info: pod name is not set")]
    NoPodName,

    #[error("failed to get pod info: {0}")]
    Pod(#[source] ApiError),

    #[error("unable to determine LCA image")]
    NoImage,

    #[error("failed to get kube-system/cluster-config-v1: {0}")]
    ConfigMap(#[source] ApiError),

    #[error("install-config not found in kube-system/cluster-config-v1")]
    MissingInstallConfig,

    #[error("failed to parse install-config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("cluster name is missing from install-config")]
    MissingName,
}

/// Image of the running agent, used to launch the imager.
///
/// An explicit override wins; otherwise the `manager` container of the
/// agent's own pod is read.
pub async fn agent_image(
    reader: &dyn ClusterReader,
    override_image: Option<&str>,
    namespace: &str,
    pod_name: Option<&str>,
) -> Result<String, ClusterInfoError> {
    if let Some(image) = override_image {
        return Ok(image.to_string());
    }

    let pod_name = pod_name.ok_or(ClusterInfoError::NoPodName)?;
    let pod: Pod = get_as(reader, &ObjectRef::namespaced(resources::pod(), namespace, pod_name))
        .await
        .map_err(ClusterInfoError::Pod)?;

    pod.spec
        .into_iter()
        .flat_map(|spec| spec.containers)
        .find(|c| c.name == MANAGER_CONTAINER)
        .and_then(|c| c.image)
        .ok_or(ClusterInfoError::NoImage)
}

#[derive(Deserialize)]
struct InstallConfig {
    metadata: Option<InstallConfigMetadata>,
}

#[derive(Deserialize)]
struct InstallConfigMetadata {
    name: Option<String>,
}

/// Name of this cluster as recorded at install time.
pub async fn cluster_name(reader: &dyn ClusterReader) -> Result<String, ClusterInfoError> {
    let cm: ConfigMap = get_as(
        reader,
        &ObjectRef::namespaced(resources::config_map(), CLUSTER_CONFIG_NAMESPACE, CLUSTER_CONFIG_NAME),
    )
    .await
    .map_err(ClusterInfoError::ConfigMap)?;

    let raw = cm
        .data
        .as_ref()
        .and_then(|data| data.get(INSTALL_CONFIG_KEY))
        .ok_or(ClusterInfoError::MissingInstallConfig)?;

    let install_config: InstallConfig = serde_yaml::from_str(raw)?;
    install_config
        .metadata
        .and_then(|m| m.name)
        .filter(|name| !name.is_empty())
        .ok_or(ClusterInfoError::MissingName)
}

#[cfg(test)]
mod tests {
    use lca_cluster::fake::InMemoryCluster;
    use lca_cluster::{ApiResource, DynamicObject};
    use serde_json::json;

    use super::*;

    fn insert(cluster: &InMemoryCluster, resource: &ApiResource, value: serde_json::Value) {
        let obj: DynamicObject = serde_json::from_value(value).unwrap();
        cluster.insert(resource, obj);
    }

    #[tokio::test]
    async fn test_cluster_name_from_install_config() {
        let cluster = InMemoryCluster::new();
        insert(
            &cluster,
            &resources::config_map(),
            json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": { "name": "cluster-config-v1", "namespace": "kube-system" },
                "data": { "install-config": "apiVersion: v1\nbaseDomain: example.com\nmetadata:\n  name: sno1\n" }
            }),
        );
        assert_eq!(cluster_name(&cluster).await.unwrap(), "sno1");
    }

    #[tokio::test]
    async fn test_cluster_name_missing_key() {
        let cluster = InMemoryCluster::new();
        insert(
            &cluster,
            &resources::config_map(),
            json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": { "name": "cluster-config-v1", "namespace": "kube-system" },
                "data": {}
            }),
        );
        assert!(matches!(
            cluster_name(&cluster).await,
            Err(ClusterInfoError::MissingInstallConfig)
        ));
    }

    #[tokio::test]
    async fn test_agent_image_from_pod() {
        let cluster = InMemoryCluster::new();
        insert(
            &cluster,
            &resources::pod(),
            json!({
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": { "name": "lca-abc", "namespace": "openshift-lifecycle-agent" },
                "spec": { "containers": [
                    { "name": "kube-rbac-proxy", "image": "proxy:1" },
                    { "name": "manager", "image": "quay.io/lca/agent:4.16" }
                ]}
            }),
        );

        let image = agent_image(&cluster, None, "openshift-lifecycle-agent", Some("lca-abc"))
            .await
            .unwrap();
        assert_eq!(image, "quay.io/lca/agent:4.16");

        let image = agent_image(&cluster, Some("override:1"), "openshift-lifecycle-agent", None)
            .await
            .unwrap();
        assert_eq!(image, "override:1");
    }

    #[tokio::test]
    async fn test_agent_image_missing_pod() {
        let cluster = InMemoryCluster::new();
        let err = agent_image(&cluster, None, "openshift-lifecycle-agent", Some("gone"))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("failed to get pod info"));
    }
}
