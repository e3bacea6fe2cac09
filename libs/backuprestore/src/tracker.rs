//! Create-or-track of backup objects.

use kube::ResourceExt;
use lca_cluster::{get_as, resources, DynamicObject, ObjectRef, ResultExt};
use serde_json::Value;
use tracing::info;

use crate::{BackupError, BackupHandler, CLUSTER_ID_LABEL};

/// Aggregate classification of a set of backups by reported phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupTracker {
    /// Present but without a phase yet.
    pub pending: Vec<String>,

    /// Created by this call, or reporting a non-terminal phase.
    pub progressing: Vec<String>,

    /// Phase `Completed`.
    pub succeeded: Vec<String>,

    /// Phase `PartiallyFailed` or `Failed`.
    pub failed: Vec<String>,

    /// Phase `FailedValidation`.
    pub failed_validation: Vec<String>,
}

impl BackupTracker {
    /// Record an existing backup under its phase.
    fn record(&mut self, name: String, phase: &str) {
        match phase {
            "Completed" => self.succeeded.push(name),
            "FailedValidation" => self.failed_validation.push(name),
            "PartiallyFailed" | "Failed" => self.failed.push(name),
            "" => self.pending.push(name),
            _ => self.progressing.push(name),
        }
    }

    /// Returns true if every tracked backup succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.pending.is_empty()
            && self.progressing.is_empty()
            && self.failed.is_empty()
            && self.failed_validation.is_empty()
    }

    /// Returns true if any tracked backup reached a failed phase.
    pub fn any_failed(&self) -> bool {
        !self.failed.is_empty() || !self.failed_validation.is_empty()
    }
}

fn phase_of(backup: &DynamicObject) -> &str {
    backup
        .data
        .pointer("/status/phase")
        .and_then(Value::as_str)
        .unwrap_or("")
}

impl BackupHandler {
    /// Create the backups that do not exist yet and classify the rest.
    ///
    /// Existing backups are never re-created, whatever their phase.
    pub async fn start_or_track(&self, backups: &[DynamicObject]) -> Result<BackupTracker, BackupError> {
        let resource = resources::velero_backup();
        let mut tracker = BackupTracker::default();

        for backup in backups {
            let target = ObjectRef::from_object(&resource, backup);
            match self.client.get(&target).await.ignore_not_found()? {
                None => {
                    self.create_new_backup(backup.clone()).await?;
                    tracker.progressing.push(backup.name_any());
                }
                Some(existing) => {
                    let phase = phase_of(&existing);
                    info!(
                        name = %existing.name_any(),
                        phase,
                        failure = existing.data.pointer("/status/failureReason").and_then(serde_json::Value::as_str).unwrap_or(""),
                        "Backup CR status"
                    );
                    tracker.record(existing.name_any(), phase);
                }
            }
        }

        info!(
            pending = ?tracker.pending,
            progressing = ?tracker.progressing,
            succeeded = ?tracker.succeeded,
            failed = ?tracker.failed,
            failed_validation = ?tracker.failed_validation,
            "Backups status"
        );
        Ok(tracker)
    }

    async fn create_new_backup(&self, mut backup: DynamicObject) -> Result<(), BackupError> {
        let cluster_id = self.cluster_id().await?;
        backup.labels_mut().insert(CLUSTER_ID_LABEL.to_string(), cluster_id);
        self.apply_backup_labels(&mut backup).await?;

        backup.metadata.resource_version = None;
        let name = backup.name_any();
        self.client
            .create(&resources::velero_backup(), &backup)
            .await
            .map_err(|source| BackupError::Create {
                what: format!("backup {name}"),
                source,
            })?;

        info!(name = %name, namespace = ?backup.namespace(), "Backup created");
        Ok(())
    }

    /// ID of this cluster, from the `version` ClusterVersion.
    pub(crate) async fn cluster_id(&self) -> Result<String, BackupError> {
        let version: Value = get_as(
            self.client.as_ref(),
            &ObjectRef::cluster(resources::cluster_version(), "version"),
        )
        .await?;

        version
            .pointer("/spec/clusterID")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| BackupError::ClusterId("ClusterVersion version has no spec.clusterID".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_buckets() {
        let mut tracker = BackupTracker::default();
        for (name, phase) in [
            ("a", "Completed"),
            ("b", "FailedValidation"),
            ("c", "PartiallyFailed"),
            ("d", "Failed"),
            ("e", ""),
            ("f", "InProgress"),
            ("g", "WaitingForPluginOperations"),
        ] {
            tracker.record(name.to_string(), phase);
        }

        assert_eq!(tracker.succeeded, vec!["a"]);
        assert_eq!(tracker.failed_validation, vec!["b"]);
        assert_eq!(tracker.failed, vec!["c", "d"]);
        assert_eq!(tracker.pending, vec!["e"]);
        assert_eq!(tracker.progressing, vec!["f", "g"]);
        assert!(tracker.any_failed());
        assert!(!tracker.all_succeeded());
    }
}
