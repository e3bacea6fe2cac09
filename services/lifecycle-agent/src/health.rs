//! Cluster stability checks.
//!
//! Seed generation only starts on a settled cluster: the ClusterVersion
//! is available and not progressing, every node is Ready, and every
//! MachineConfigPool has rolled out its current configuration.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use lca_cluster::{list_as, resources, ApiError, ClusterReader, DynamicObject, ObjectRef};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Reasons a cluster is not considered stable.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HealthError {
    #[error("ClusterVersion is not ready: {0}")]
    ClusterVersion(String),

    #[error("node {0} is not ready")]
    NodeNotReady(String),

    #[error("MachineConfigPool {name} is not ready: {reason}")]
    PoolNotReady { name: String, reason: String },

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Stability probes used by the seed generation workflow.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Full stability check run before an attempt starts.
    async fn check(&self) -> Result<(), HealthError>;

    /// Whether every MachineConfigPool has finished rolling out.
    async fn machine_config_pools_ready(&self) -> Result<(), HealthError>;
}

/// Health checks against the API server.
pub struct ClusterHealthChecker {
    reader: Arc<dyn ClusterReader>,
}

impl ClusterHealthChecker {
    pub fn new(reader: Arc<dyn ClusterReader>) -> Self {
        Self { reader }
    }

    async fn cluster_version_ready(&self) -> Result<(), HealthError> {
        let cv = self
            .reader
            .get(&ObjectRef::cluster(resources::cluster_version(), "version"))
            .await?;
        let conditions = cv.data.pointer("/status/conditions").cloned().unwrap_or(Value::Null);
        if condition_status(&conditions, "Available") != Some("True") {
            return Err(HealthError::ClusterVersion("not available".to_string()));
        }
        if condition_status(&conditions, "Progressing") == Some("True") {
            return Err(HealthError::ClusterVersion("progressing".to_string()));
        }
        Ok(())
    }

    async fn nodes_ready(&self) -> Result<(), HealthError> {
        let nodes: Vec<Node> = list_as(self.reader.as_ref(), &resources::node(), None, None).await?;
        for node in nodes {
            let ready = node
                .status
                .as_ref()
                .and_then(|s| s.conditions.as_ref())
                .is_some_and(|conds| conds.iter().any(|c| c.type_ == "Ready" && c.status == "True"));
            if !ready {
                return Err(HealthError::NodeNotReady(node.name_any()));
            }
        }
        Ok(())
    }
}

fn condition_status<'a>(conditions: &'a Value, type_: &str) -> Option<&'a str> {
    conditions
        .as_array()?
        .iter()
        .find(|c| c.get("type").and_then(Value::as_str) == Some(type_))?
        .get("status")
        .and_then(Value::as_str)
}

/// Check that a pool has every machine updated and ready, none degraded.
pub fn pool_ready(pool: &DynamicObject) -> Result<(), HealthError> {
    let status = pool.data.get("status").cloned().unwrap_or(Value::Null);
    let count = |field: &str| status.get(field).and_then(Value::as_i64).unwrap_or(0);
    let not_ready = |reason: String| HealthError::PoolNotReady {
        name: pool.name_any(),
        reason,
    };

    let machines = count("machineCount");
    let updated = count("updatedMachineCount");
    let ready = count("readyMachineCount");
    let degraded = count("degradedMachineCount");

    if degraded > 0 {
        return Err(not_ready(format!("{degraded} degraded machine(s)")));
    }
    if updated != machines || ready != machines {
        return Err(not_ready(format!(
            "{updated}/{machines} machines updated, {ready}/{machines} ready"
        )));
    }
    if condition_status(status.get("conditions").unwrap_or(&Value::Null), "Updating") == Some("True") {
        return Err(not_ready("updating".to_string()));
    }
    Ok(())
}

#[async_trait]
impl HealthChecker for ClusterHealthChecker {
    async fn check(&self) -> Result<(), HealthError> {
        self.cluster_version_ready().await?;
        self.nodes_ready().await?;
        self.machine_config_pools_ready().await?;
        debug!("Cluster is stable");
        Ok(())
    }

    async fn machine_config_pools_ready(&self) -> Result<(), HealthError> {
        let pools = self.reader.list(&resources::machine_config_pool(), None, None).await?;
        pools.iter().try_for_each(pool_ready)
    }
}

/// Scripted health checker for tests.
#[derive(Default)]
pub struct MockHealthChecker {
    unstable: Mutex<Option<HealthError>>,
    pools_unready: Mutex<Option<HealthError>>,
}

impl MockHealthChecker {
    /// A checker that reports a stable cluster.
    pub fn healthy() -> Self {
        Self::default()
    }

    /// Make the full check fail with `err` until cleared.
    pub fn set_unstable(&self, err: Option<HealthError>) {
        *self.unstable.lock().unwrap_or_else(PoisonError::into_inner) = err;
    }

    /// Make the pool check fail with `err` until cleared.
    pub fn set_pools_unready(&self, err: Option<HealthError>) {
        *self.pools_unready.lock().unwrap_or_else(PoisonError::into_inner) = err;
    }
}

#[async_trait]
impl HealthChecker for MockHealthChecker {
    async fn check(&self) -> Result<(), HealthError> {
        match self.unstable.lock().unwrap_or_else(PoisonError::into_inner).clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn machine_config_pools_ready(&self) -> Result<(), HealthError> {
        match self.pools_unready.lock().unwrap_or_else(PoisonError::into_inner).clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use lca_cluster::fake::InMemoryCluster;
    use serde_json::json;

    use super::*;

    fn object(value: Value) -> DynamicObject {
        serde_json::from_value(value).unwrap()
    }

    fn stable_cluster() -> Arc<InMemoryCluster> {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.insert(
            &resources::cluster_version(),
            object(json!({
                "apiVersion": "config.openshift.io/v1",
                "kind": "ClusterVersion",
                "metadata": { "name": "version" },
                "status": { "conditions": [
                    { "type": "Available", "status": "True" },
                    { "type": "Progressing", "status": "False" }
                ]}
            })),
        );
        cluster.insert(
            &resources::node(),
            object(json!({
                "apiVersion": "v1",
                "kind": "Node",
                "metadata": { "name": "sno" },
                "status": { "conditions": [{ "type": "Ready", "status": "True" }] }
            })),
        );
        cluster.insert(
            &resources::machine_config_pool(),
            object(json!({
                "apiVersion": "machineconfiguration.openshift.io/v1",
                "kind": "MachineConfigPool",
                "metadata": { "name": "master" },
                "status": { "machineCount": 1, "updatedMachineCount": 1, "readyMachineCount": 1, "degradedMachineCount": 0 }
            })),
        );
        cluster
    }

    #[tokio::test]
    async fn test_stable_cluster_passes() {
        let checker = ClusterHealthChecker::new(stable_cluster());
        checker.check().await.unwrap();
    }

    #[tokio::test]
    async fn test_updating_pool_fails() {
        let cluster = stable_cluster();
        cluster.insert(
            &resources::machine_config_pool(),
            object(json!({
                "apiVersion": "machineconfiguration.openshift.io/v1",
                "kind": "MachineConfigPool",
                "metadata": { "name": "master" },
                "status": { "machineCount": 1, "updatedMachineCount": 0, "readyMachineCount": 1 }
            })),
        );
        let checker = ClusterHealthChecker::new(cluster);
        let err = checker.check().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "MachineConfigPool master is not ready: 0/1 machines updated, 1/1 ready"
        );
    }

    #[tokio::test]
    async fn test_missing_cluster_version_is_api_error() {
        let checker = ClusterHealthChecker::new(Arc::new(InMemoryCluster::new()));
        assert!(matches!(checker.check().await, Err(HealthError::Api(e)) if e.is_not_found()));
    }

    #[tokio::test]
    async fn test_not_ready_node() {
        let cluster = stable_cluster();
        cluster.insert(
            &resources::node(),
            object(json!({
                "apiVersion": "v1",
                "kind": "Node",
                "metadata": { "name": "sno" },
                "status": { "conditions": [{ "type": "Ready", "status": "Unknown" }] }
            })),
        );
        let checker = ClusterHealthChecker::new(cluster);
        assert_eq!(checker.check().await, Err(HealthError::NodeNotReady("sno".to_string())));
    }
}
