//! `kube::Client` backed implementation of the cluster traits.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config, ResourceExt};
use serde_json::json;
use tracing::debug;

use crate::{ApiError, ClusterClient, ClusterReader, HubConnector, ObjectRef, Propagation};

/// Cluster access through a `kube::Client`.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }
}

#[async_trait]
impl ClusterReader for KubeCluster {
    async fn get(&self, obj: &ObjectRef) -> Result<DynamicObject, ApiError> {
        let api = self.api(&obj.resource, obj.namespace.as_deref());
        Ok(api.get(&obj.name).await?)
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>, ApiError> {
        let api = self.api(resource, namespace);
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        Ok(api.list(&params).await?.items)
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn create(&self, resource: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject, ApiError> {
        let namespace = obj.namespace();
        let api = self.api(resource, namespace.as_deref());
        debug!(kind = %resource.kind, name = %obj.name_any(), "Creating object");
        Ok(api.create(&PostParams::default(), obj).await?)
    }

    async fn update_status(&self, resource: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject, ApiError> {
        let namespace = obj.namespace();
        let api = self.api(resource, namespace.as_deref());
        let status = obj.data.get("status").cloned().unwrap_or(serde_json::Value::Null);
        let mut body = json!({ "status": status });
        if let Some(version) = &obj.metadata.resource_version {
            body["metadata"] = json!({ "resourceVersion": version });
        }
        Ok(api
            .patch_status(&obj.name_any(), &PatchParams::default(), &Patch::Merge(&body))
            .await?)
    }

    async fn merge_patch(&self, obj: &ObjectRef, patch: &serde_json::Value) -> Result<DynamicObject, ApiError> {
        let api = self.api(&obj.resource, obj.namespace.as_deref());
        Ok(api.patch(&obj.name, &PatchParams::default(), &Patch::Merge(patch)).await?)
    }

    async fn delete(&self, obj: &ObjectRef, propagation: Propagation) -> Result<(), ApiError> {
        let api = self.api(&obj.resource, obj.namespace.as_deref());
        let params = match propagation {
            Propagation::Background => DeleteParams::background(),
            Propagation::Foreground => DeleteParams::foreground(),
        };
        debug!(object = %obj, ?propagation, "Deleting object");
        api.delete(&obj.name, &params).await?;
        Ok(())
    }
}

/// Connects to a hub cluster using the kubeconfig stored on the spoke.
#[derive(Debug, Clone, Copy, Default)]
pub struct KubeHubConnector;

#[async_trait]
impl HubConnector for KubeHubConnector {
    async fn connect(&self, kubeconfig: &[u8]) -> Result<Arc<dyn ClusterClient>, ApiError> {
        let text = std::str::from_utf8(kubeconfig)
            .map_err(|e| ApiError::Invalid(format!("hub kubeconfig is not valid UTF-8: {e}")))?;
        let kubeconfig = Kubeconfig::from_yaml(text)
            .map_err(|e| ApiError::Invalid(format!("failed to parse hub kubeconfig: {e}")))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| ApiError::Invalid(format!("failed to load hub kubeconfig: {e}")))?;
        let client = Client::try_from(config)?;
        Ok(Arc::new(KubeCluster::new(client)))
    }
}
