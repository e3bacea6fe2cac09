//! Collaborator traits for cluster access.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use serde::de::DeserializeOwned;

use crate::{from_dynamic, ApiError, ObjectRef};

/// Deletion propagation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Propagation {
    /// Dependents are removed by the garbage collector after the owner is gone.
    #[default]
    Background,

    /// The owner stays until all dependents are removed.
    Foreground,
}

/// Read access that always goes to the API server.
#[async_trait]
pub trait ClusterReader: Send + Sync {
    /// Fetch a single object.
    async fn get(&self, obj: &ObjectRef) -> Result<DynamicObject, ApiError>;

    /// List objects of a resource.
    ///
    /// `namespace: None` lists cluster-scoped objects, or namespaced
    /// objects across all namespaces. `label_selector` uses the API
    /// server's selector syntax.
    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>, ApiError>;
}

/// Read-write access to the cluster.
#[async_trait]
pub trait ClusterClient: ClusterReader {
    /// Create an object. The namespace is taken from the object metadata
    /// and the resource version must be unset.
    async fn create(&self, resource: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject, ApiError>;

    /// Write the `status` of an existing object.
    ///
    /// A resource version on `obj` is honored as an optimistic-concurrency
    /// precondition.
    async fn update_status(&self, resource: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject, ApiError>;

    /// Apply a JSON merge patch (RFC 7386).
    async fn merge_patch(&self, obj: &ObjectRef, patch: &serde_json::Value) -> Result<DynamicObject, ApiError>;

    /// Request deletion of an object.
    async fn delete(&self, obj: &ObjectRef, propagation: Propagation) -> Result<(), ApiError>;
}

/// Opens a client to a remote (hub) cluster from raw kubeconfig bytes.
#[async_trait]
pub trait HubConnector: Send + Sync {
    async fn connect(&self, kubeconfig: &[u8]) -> Result<Arc<dyn ClusterClient>, ApiError>;
}

/// Fetch an object and decode it into `K`.
pub async fn get_as<K, R>(reader: &R, obj: &ObjectRef) -> Result<K, ApiError>
where
    K: DeserializeOwned,
    R: ClusterReader + ?Sized,
{
    from_dynamic(&reader.get(obj).await?)
}

/// List objects and decode each into `K`.
pub async fn list_as<K, R>(
    reader: &R,
    resource: &ApiResource,
    namespace: Option<&str>,
    label_selector: Option<&str>,
) -> Result<Vec<K>, ApiError>
where
    K: DeserializeOwned,
    R: ClusterReader + ?Sized,
{
    reader
        .list(resource, namespace, label_selector)
        .await?
        .iter()
        .map(from_dynamic)
        .collect()
}
