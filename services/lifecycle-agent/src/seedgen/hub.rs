//! Hub registration.
//!
//! A cluster managed by a hub must not be captured while registered. The
//! hub's ManagedCluster record is saved to the workspace and deleted
//! before capture, and created again afterwards.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Secret;
use lca_cluster::{get_as, resources, ApiError, ClusterClient, DynamicObject, ObjectRef, Propagation, ResultExt};
use lca_reconcile::{poll_until, PollError, PollSpec};
use thiserror::Error;
use tracing::info;

use super::{SeedGenReconciler, HUB_KUBECONFIG_KEY, SEEDGEN_SECRET_NAME};
use crate::workspace::{WorkspaceError, MANAGED_CLUSTER_FILE};

const DELETION_POLL: PollSpec = PollSpec::attempts(Duration::from_secs(10), 90);

#[derive(Debug, Error)]
pub enum HubError {
    #[error("failed to create hub client: {0}")]
    Connect(#[source] ApiError),

    #[error("failed to get ManagedCluster: {0}")]
    Get(#[source] ApiError),

    #[error("failed to write managedcluster to workspace: {0}")]
    Save(#[source] WorkspaceError),

    #[error("failed to delete managedcluster from hub: {0}")]
    Delete(#[source] ApiError),

    #[error(transparent)]
    DeletionWait(PollError<ApiError>),

    #[error("unable to read stored managedcluster file: {0}")]
    Read(#[source] WorkspaceError),

    #[error("failed to create ManagedCluster: {0}")]
    Create(#[source] ApiError),

    #[error("failed to rename stored managedcluster file for hub registration: {0}")]
    Rename(#[source] WorkspaceError),

    #[error("could not access seedgen secret: {0}")]
    Secret(#[source] ApiError),
}

fn managed_cluster_ref(cluster: &str) -> ObjectRef {
    ObjectRef::cluster(resources::managed_cluster(), cluster)
}

impl SeedGenReconciler {
    /// Open a client to the hub described by `kubeconfig`.
    pub(crate) async fn connect_hub(&self, kubeconfig: &[u8]) -> Result<Arc<dyn ClusterClient>, HubError> {
        self.hub.connect(kubeconfig).await.map_err(HubError::Connect)
    }

    /// Whether the hub has a ManagedCluster for `cluster`.
    pub(crate) async fn managed_cluster_exists(&self, hub: &dyn ClusterClient, cluster: &str) -> bool {
        match hub.get(&managed_cluster_ref(cluster)).await {
            Ok(_) => true,
            Err(e) => {
                if !e.is_not_found() {
                    info!(error = %e, "Error when checking managedcluster existence");
                }
                false
            }
        }
    }

    /// Save the ManagedCluster record and remove it from the hub.
    pub(crate) async fn deregister_from_hub(&self, hub: &dyn ClusterClient, cluster: &str) -> Result<(), HubError> {
        let target = managed_cluster_ref(cluster);
        let Some(managed_cluster) = hub.get(&target).await.ignore_not_found().map_err(HubError::Get)? else {
            return Ok(());
        };

        self.workspace
            .write_json(MANAGED_CLUSTER_FILE, &managed_cluster)
            .await
            .map_err(HubError::Save)?;

        hub.delete(&target, Propagation::Foreground)
            .await
            .ignore_not_found()
            .map_err(HubError::Delete)?;

        // Foreground deletion on the hub returns before the record is gone.
        info!(cluster, "Waiting until managedcluster is deleted");
        let mut shutdown = self.shutdown.clone();
        poll_until(DELETION_POLL, "managedcluster deletion", &mut shutdown, || async {
            Ok::<_, ApiError>(!self.managed_cluster_exists(hub, cluster).await)
        })
        .await
        .map_err(HubError::DeletionWait)
    }

    /// Create the saved ManagedCluster record on the hub.
    ///
    /// A missing file means there is nothing to restore.
    pub(crate) async fn reregister_with_hub(&self, hub: &dyn ClusterClient) -> Result<(), HubError> {
        let Some(mut managed_cluster) = self
            .workspace
            .read_json::<DynamicObject>(MANAGED_CLUSTER_FILE)
            .await
            .map_err(HubError::Read)?
        else {
            return Ok(());
        };

        managed_cluster.metadata.resource_version = None;
        hub.create(&resources::managed_cluster(), &managed_cluster)
            .await
            .map_err(HubError::Create)?;

        self.workspace
            .mark_restored(MANAGED_CLUSTER_FILE)
            .await
            .map_err(HubError::Rename)
    }

    /// Restore the hub registration if it was removed by this workflow.
    ///
    /// Requires the companion secret to carry a hub kubeconfig and the
    /// workspace to hold a saved record.
    pub(crate) async fn restore_managed_cluster(&self, cluster: &str) -> Result<(), HubError> {
        let secret: Secret = get_as(self.client.as_ref(), &self.seedgen_secret_ref())
            .await
            .map_err(HubError::Secret)?;

        let Some(kubeconfig) = secret.data.as_ref().and_then(|d| d.get(HUB_KUBECONFIG_KEY)) else {
            info!(secret = SEEDGEN_SECRET_NAME, "No hubKubeconfig found in secret. Skipping hub interaction");
            return Ok(());
        };

        if !self.workspace.exists(MANAGED_CLUSTER_FILE) {
            info!("Found hubKubeconfig, but no saved ManagedCluster. Skipping restore");
            return Ok(());
        }

        let hub = self.connect_hub(&kubeconfig.0).await?;
        if self.managed_cluster_exists(hub.as_ref(), cluster).await {
            info!(cluster, "ManagedCluster exists on hub, no need to restore");
            return Ok(());
        }

        info!(cluster, "Reregistering cluster with hub");
        self.reregister_with_hub(hub.as_ref()).await
    }

    pub(crate) fn seedgen_secret_ref(&self) -> ObjectRef {
        ObjectRef::namespaced(resources::secret(), &self.config.namespace, SEEDGEN_SECRET_NAME)
    }
}
