//! Startup recovery of the request and its companion secret.
//!
//! The imager runs with both objects deleted. When the agent comes back
//! they are re-created from the workspace before the controller starts,
//! so that the request is seen as new and classified as Finalizing.

use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use lca_cluster::{resources, ApiError, ClusterClient, ObjectRef, ResultExt};
use thiserror::Error;
use tracing::info;

use crate::crd::{seedgen_ref, SeedGenerator};
use crate::seedgen::{restore_request, restore_secret};
use crate::workspace::{Workspace, WorkspaceError, SEEDGEN_CR_FILE, SEEDGEN_SECRET_FILE};

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error("failed to restore {what}: {source}")]
    Restore {
        what: &'static str,
        #[source]
        source: ApiError,
    },
}

/// What was re-created.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Recovered {
    pub secret: bool,
    pub request: bool,
}

/// Re-create the saved secret and request if they are missing.
///
/// Saved files are renamed with `.bak` once the cluster holds the object.
/// The secret goes first because finalizing reads it.
pub async fn restore_from_workspace(
    client: &dyn ClusterClient,
    workspace: &Workspace,
) -> Result<Recovered, RecoveryError> {
    let mut recovered = Recovered::default();

    if let Some(secret) = workspace.read_json::<Secret>(SEEDGEN_SECRET_FILE).await? {
        let target = ObjectRef::namespaced(
            resources::secret(),
            secret.namespace().unwrap_or_default(),
            secret.name_any(),
        );
        let restore = |source| RecoveryError::Restore { what: "seedgen secret", source };
        if client.get(&target).await.ignore_not_found().map_err(restore)?.is_none() {
            restore_secret(client, &secret).await.map_err(restore)?;
            recovered.secret = true;
        }
        workspace.mark_restored(SEEDGEN_SECRET_FILE).await?;
    }

    if let Some(seedgen) = workspace.read_json::<SeedGenerator>(SEEDGEN_CR_FILE).await? {
        let restore = |source| RecoveryError::Restore { what: "SeedGenerator", source };
        if client
            .get(&seedgen_ref(&seedgen.name_any()))
            .await
            .ignore_not_found()
            .map_err(restore)?
            .is_none()
        {
            restore_request(client, &seedgen).await.map_err(restore)?;
            recovered.request = true;
        }
        workspace.mark_restored(SEEDGEN_CR_FILE).await?;
    }

    if recovered != Recovered::default() {
        info!(secret = recovered.secret, request = recovered.request, "Restored objects from workspace");
    }
    Ok(recovered)
}
