//! Deletion of every backup created for this cluster.

use kube::ResourceExt;
use lca_cluster::{resources, ApiError, DynamicObject, ObjectRef};
use lca_reconcile::{poll_until, PollError};
use serde_json::json;
use tracing::{error, info};

use crate::{BackupError, BackupHandler, CLEANUP_POLL, CLUSTER_ID_LABEL};

impl BackupHandler {
    /// Delete all backups labeled with this cluster's ID.
    ///
    /// Returns `Ok(true)` once none remain, `Ok(false)` if some are still
    /// present when the wait ceiling is reached. A cluster without the
    /// backup kind installed has nothing to clean up.
    pub async fn cleanup_backups(&self) -> Result<bool, BackupError> {
        let cluster_id = self.cluster_id().await?;
        let selector = format!("{CLUSTER_ID_LABEL}={cluster_id}");

        let backups = match self
            .client
            .list(&resources::velero_backup(), None, Some(&selector))
            .await
        {
            Ok(backups) => backups,
            Err(ApiError::NotFound(_)) => {
                info!("Backup CR is not installed, nothing to cleanup");
                return Ok(true);
            }
            Err(e) => return Err(e.into()),
        };

        let request_resource = resources::delete_backup_request();
        for backup in &backups {
            let name = backup.name_any();
            let mut request = DynamicObject::new(&name, &request_resource).data(json!({
                "spec": { "backupName": name }
            }));
            request.metadata.namespace = backup.namespace();

            match self.client.create(&request_resource, &request).await {
                Ok(_) | Err(ApiError::AlreadyExists(_)) => {
                    info!(backup = %name, "Backup deletion request has sent");
                }
                Err(source) => {
                    return Err(BackupError::Create {
                        what: format!("delete backup request {name}"),
                        source,
                    })
                }
            }
        }

        for backup in &backups {
            self.cleanup_backup_labels(backup).await;
        }

        self.ensure_backups_deleted(&backups).await
    }

    async fn ensure_backups_deleted(&self, backups: &[DynamicObject]) -> Result<bool, BackupError> {
        let resource = resources::velero_backup();
        let mut shutdown = self.shutdown.clone();

        let result = poll_until(CLEANUP_POLL, "backups to be deleted", &mut shutdown, || async {
            let mut remaining = Vec::new();
            for backup in backups {
                match self.client.get(&ObjectRef::from_object(&resource, backup)).await {
                    Ok(_) => remaining.push(backup.name_any()),
                    Err(ApiError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }

            if remaining.is_empty() {
                info!("All backups have been deleted");
                return Ok(true);
            }
            info!(backups = ?remaining, "Waiting for backups to be deleted");
            Ok(false)
        })
        .await;

        match result {
            Ok(()) => Ok(true),
            Err(e @ PollError::Timeout { .. }) => {
                error!(error = %e, "Timeout waiting for backups to be deleted");
                Ok(false)
            }
            Err(e) => Err(BackupError::Wait(e)),
        }
    }
}
