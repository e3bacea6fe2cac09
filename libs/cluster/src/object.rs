//! Object addressing and typed conversion.

use std::fmt;

use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use kube::ResourceExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::ApiError;

/// Address of a single object in the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub resource: ApiResource,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectRef {
    /// Reference to a namespaced object.
    pub fn namespaced(resource: ApiResource, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource,
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Reference to a cluster-scoped object.
    pub fn cluster(resource: ApiResource, name: impl Into<String>) -> Self {
        Self {
            resource,
            namespace: None,
            name: name.into(),
        }
    }

    /// Reference to an object that was already read from the cluster.
    pub fn from_object(resource: &ApiResource, obj: &DynamicObject) -> Self {
        Self {
            resource: resource.clone(),
            namespace: obj.namespace(),
            name: obj.name_any(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.resource.kind.is_empty() {
            &self.resource.plural
        } else {
            &self.resource.kind
        };
        match &self.namespace {
            Some(ns) => write!(f, "{kind} {ns}/{}", self.name),
            None => write!(f, "{kind} {}", self.name),
        }
    }
}

/// Resource addressed only by group, version and plural name.
///
/// Used for objects named by annotations, where the kind is unknown.
pub fn resource_for(group: &str, version: &str, plural: &str) -> ApiResource {
    let api_version = if group.is_empty() {
        version.to_string()
    } else {
        format!("{group}/{version}")
    };
    ApiResource {
        group: group.to_string(),
        version: version.to_string(),
        api_version,
        kind: String::new(),
        plural: plural.to_string(),
    }
}

/// Serialize a typed object into its untyped form.
pub fn to_dynamic<K: Serialize>(obj: &K) -> Result<DynamicObject, ApiError> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

/// Deserialize an untyped object into a typed struct.
pub fn from_dynamic<K: DeserializeOwned>(obj: &DynamicObject) -> Result<K, ApiError> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

/// Resources the agent touches.
pub mod resources {
    use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Node, Pod, Secret};
    use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::core::GroupVersionKind;
    use kube::discovery::ApiResource;

    fn custom(group: &str, version: &str, kind: &str, plural: &str) -> ApiResource {
        ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk(group, version, kind), plural)
    }

    pub fn namespace() -> ApiResource {
        ApiResource::erase::<Namespace>(&())
    }

    pub fn secret() -> ApiResource {
        ApiResource::erase::<Secret>(&())
    }

    pub fn config_map() -> ApiResource {
        ApiResource::erase::<ConfigMap>(&())
    }

    pub fn pod() -> ApiResource {
        ApiResource::erase::<Pod>(&())
    }

    pub fn node() -> ApiResource {
        ApiResource::erase::<Node>(&())
    }

    pub fn custom_resource_definition() -> ApiResource {
        ApiResource::erase::<CustomResourceDefinition>(&())
    }

    pub fn cluster_role() -> ApiResource {
        ApiResource::erase::<ClusterRole>(&())
    }

    pub fn cluster_role_binding() -> ApiResource {
        ApiResource::erase::<ClusterRoleBinding>(&())
    }

    /// Hub-side registration record of a spoke cluster.
    pub fn managed_cluster() -> ApiResource {
        custom("cluster.open-cluster-management.io", "v1", "ManagedCluster", "managedclusters")
    }

    pub fn machine_config_pool() -> ApiResource {
        custom("machineconfiguration.openshift.io", "v1", "MachineConfigPool", "machineconfigpools")
    }

    pub fn cluster_version() -> ApiResource {
        custom("config.openshift.io", "v1", "ClusterVersion", "clusterversions")
    }

    pub fn image_based_upgrade() -> ApiResource {
        custom("lca.openshift.io", "v1", "ImageBasedUpgrade", "imagebasedupgrades")
    }

    pub fn velero_backup() -> ApiResource {
        custom("velero.io", "v1", "Backup", "backups")
    }

    pub fn delete_backup_request() -> ApiResource {
        custom("velero.io", "v1", "DeleteBackupRequest", "deletebackuprequests")
    }
}
