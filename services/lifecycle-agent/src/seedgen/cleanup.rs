//! Removal of cluster resources that must not end up in a seed.

use std::time::Duration;

use kube::ResourceExt;
use lca_cluster::{resources, ApiError, ApiResource, ObjectRef, Propagation, ResultExt};
use lca_reconcile::{poll_until, PollError, PollSpec};
use thiserror::Error;
use tracing::info;

use super::SeedGenReconciler;

const DELETION_POLL: PollSpec = PollSpec::attempts(Duration::from_secs(10), 90);

const ACM_NAMESPACE_PREFIX: &str = "open-cluster-management-agent";
const ACM_CRD_SUFFIX: &str = ".open-cluster-management.io";

const KLUSTERLET_CLUSTER_ROLES: [&str; 3] = [
    "klusterlet",
    "klusterlet-bootstrap-kubeconfig",
    "open-cluster-management:klusterlet-admin-aggregate-clusterrole",
];

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("failed to list {what}: {source}")]
    List {
        what: &'static str,
        #[source]
        source: ApiError,
    },

    #[error("failed to delete {target}: {source}")]
    Delete {
        target: String,
        #[source]
        source: ApiError,
    },

    #[error("timed out waiting for ACM {what} deletion")]
    Timeout { what: &'static str },

    #[error("failed waiting for ACM {what} deletion: {source}")]
    Wait {
        what: &'static str,
        #[source]
        source: PollError<ApiError>,
    },
}

/// A set of objects selected by name.
struct Selection {
    what: &'static str,
    resource: ApiResource,
    matches: fn(&str) -> bool,
}

impl SeedGenReconciler {
    /// Names of the objects currently matching `selection`.
    async fn current(&self, selection: &Selection) -> Result<Vec<String>, ApiError> {
        Ok(self
            .client
            .list(&selection.resource, None, None)
            .await?
            .iter()
            .map(|obj| obj.name_any())
            .filter(|name| (selection.matches)(name))
            .collect())
    }

    /// Delete every object of `selection` and wait until all are gone.
    async fn delete_selection(&self, selection: &Selection) -> Result<(), CleanupError> {
        let names = self.current(selection).await.map_err(|source| CleanupError::List {
            what: selection.what,
            source,
        })?;
        if names.is_empty() {
            info!(what = selection.what, "No ACM objects found");
            return Ok(());
        }

        for name in &names {
            let target = ObjectRef::cluster(selection.resource.clone(), name);
            info!(%target, "Deleting");
            self.delete_ignoring_missing(&target).await?;
        }

        info!(what = selection.what, "Waiting until ACM objects are deleted");
        let mut shutdown = self.shutdown.clone();
        poll_until(DELETION_POLL, selection.what, &mut shutdown, || async {
            Ok::<_, ApiError>(self.current(selection).await?.is_empty())
        })
        .await
        .map_err(|e| match e {
            PollError::Timeout { .. } => CleanupError::Timeout { what: selection.what },
            source => CleanupError::Wait {
                what: selection.what,
                source,
            },
        })
    }

    async fn delete_ignoring_missing(&self, target: &ObjectRef) -> Result<(), CleanupError> {
        self.client
            .delete(target, Propagation::Foreground)
            .await
            .ignore_not_found()
            .map(|_| ())
            .map_err(|source| CleanupError::Delete {
                target: target.to_string(),
                source,
            })
    }

    /// Remove hub agent leftovers and install-time objects.
    ///
    /// Objects that are already gone count as removed.
    pub(crate) async fn cleanup_cluster_resources(&self) -> Result<(), CleanupError> {
        self.delete_selection(&Selection {
            what: "namespace",
            resource: resources::namespace(),
            matches: |name| name.starts_with(ACM_NAMESPACE_PREFIX),
        })
        .await?;

        self.delete_selection(&Selection {
            what: "CRD",
            resource: resources::custom_resource_definition(),
            matches: |name| name.ends_with(ACM_CRD_SUFFIX),
        })
        .await?;

        self.delete_ignoring_missing(&ObjectRef::cluster(resources::namespace(), "assisted-installer"))
            .await?;

        for role in KLUSTERLET_CLUSTER_ROLES {
            self.delete_ignoring_missing(&ObjectRef::cluster(resources::cluster_role(), role))
                .await?;
        }

        self.delete_ignoring_missing(&ObjectRef::cluster(resources::cluster_role_binding(), "klusterlet"))
            .await?;

        // Copied in by hub observability, when enabled.
        self.delete_ignoring_missing(&ObjectRef::namespaced(
            resources::secret(),
            "openshift-monitoring",
            "observability-alertmanager-accessor",
        ))
        .await
    }
}
