//! Backup manifests embedded in ConfigMaps.

use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use lca_cluster::DynamicObject;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::BackupError;

const BACKUP_API_VERSION: &str = "velero.io/v1";
const BACKUP_KIND: &str = "Backup";

/// Decode every YAML or JSON document in the ConfigMaps' data and keep the
/// Backup objects.
///
/// Documents of other kinds are skipped. A document that fails to decode
/// fails the whole call.
pub fn extract_backups_from_configmaps(configmaps: &[ConfigMap]) -> Result<Vec<DynamicObject>, BackupError> {
    let mut backups = Vec::new();

    for cm in configmaps {
        let cm_name = cm.name_any();
        let invalid = |message: String| BackupError::FailedValidation {
            configmap: cm_name.clone(),
            message,
        };

        for value in cm.data.iter().flat_map(|data| data.values()) {
            for document in serde_yaml::Deserializer::from_str(value) {
                let yaml = serde_yaml::Value::deserialize(document).map_err(|e| invalid(e.to_string()))?;
                if yaml.is_null() {
                    continue;
                }

                let json: Value = serde_json::to_value(&yaml).map_err(|e| invalid(e.to_string()))?;
                let api_version = json.get("apiVersion").and_then(Value::as_str);
                let kind = json.get("kind").and_then(Value::as_str);
                if api_version != Some(BACKUP_API_VERSION) || kind != Some(BACKUP_KIND) {
                    debug!(configmap = %cm_name, ?kind, "Skipping non-Backup document");
                    continue;
                }

                let backup: DynamicObject = serde_json::from_value(json).map_err(|e| invalid(e.to_string()))?;
                backups.push(backup);
            }
        }
    }

    Ok(backups)
}
