//! Apply-label propagation.
//!
//! A backup may name unrelated objects in its
//! `lca.openshift.io/apply-label` annotation. Each one gets
//! `lca.openshift.io/backup=<backup name>` and the backup's label selector
//! is narrowed to that label, so only the named objects are captured.

use std::fmt;

use kube::ResourceExt;
use lca_cluster::{resource_for, DynamicObject, ObjectRef};
use serde_json::json;
use tracing::{info, warn};

use crate::{BackupError, BackupHandler, APPLY_LABEL_ANNOTATION, BACKUP_LABEL};

/// An object named in an apply-label annotation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelTarget {
    pub group: String,
    pub version: String,
    pub resource: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl LabelTarget {
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef {
            resource: resource_for(&self.group, &self.version, &self.resource),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

impl fmt::Display for LabelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "name:{} namespace:{} resource:{} group:{} version:{}",
            self.name,
            self.namespace.as_deref().unwrap_or(""),
            self.resource,
            self.group,
            self.version
        )
    }
}

/// Parse an apply-label annotation value.
///
/// Accepted forms, comma separated:
/// - `version/resource/name`
/// - `v1/resource/namespace/name` (core group, namespaced)
/// - `group/version/resource/name`
/// - `group/version/resource/namespace/name`
///
/// Repeated entries are kept once, in first-seen order.
pub fn parse_apply_label(value: &str) -> Result<Vec<LabelTarget>, BackupError> {
    let mut targets: Vec<LabelTarget> = Vec::new();
    let mut seen: Vec<&str> = Vec::new();

    for raw in value.split(',') {
        if seen.contains(&raw) {
            continue;
        }
        seen.push(raw);

        let parts: Vec<&str> = raw.split('/').collect();
        let target = match parts.as_slice() {
            [version, resource, name] => LabelTarget {
                version: version.to_string(),
                resource: resource.to_string(),
                name: name.to_string(),
                ..Default::default()
            },
            ["v1", resource, namespace, name] => LabelTarget {
                version: "v1".to_string(),
                resource: resource.to_string(),
                namespace: Some(namespace.to_string()),
                name: name.to_string(),
                ..Default::default()
            },
            [group, version, resource, name] => LabelTarget {
                group: group.to_string(),
                version: version.to_string(),
                resource: resource.to_string(),
                name: name.to_string(),
                ..Default::default()
            },
            [group, version, resource, namespace, name] => LabelTarget {
                group: group.to_string(),
                version: version.to_string(),
                resource: resource.to_string(),
                namespace: Some(namespace.to_string()),
                name: name.to_string(),
            },
            _ => return Err(BackupError::InvalidApplyLabel(raw.to_string())),
        };
        targets.push(target);
    }

    Ok(targets)
}

/// Targets named by a backup's annotations.
pub(crate) fn targets_of(backup: &DynamicObject) -> Result<Vec<LabelTarget>, BackupError> {
    match backup.annotations().get(APPLY_LABEL_ANNOTATION) {
        Some(value) if !value.is_empty() => parse_apply_label(value),
        _ => Ok(Vec::new()),
    }
}

/// Add `key=value` to `spec.labelSelector.matchLabels`.
pub(crate) fn add_label_to_selector(backup: &mut DynamicObject, key: &str, value: &str) {
    if !backup.data.is_object() {
        backup.data = json!({});
    }
    let spec = &mut backup.data["spec"];
    if !spec.is_object() {
        *spec = json!({});
    }
    let selector = &mut spec["labelSelector"];
    if !selector.is_object() {
        *selector = json!({});
    }
    let match_labels = &mut selector["matchLabels"];
    if !match_labels.is_object() {
        *match_labels = json!({});
    }
    match_labels[key] = json!(value);
}

impl BackupHandler {
    /// Label every apply-label target and narrow the backup's selector.
    pub(crate) async fn apply_backup_labels(&self, backup: &mut DynamicObject) -> Result<(), BackupError> {
        let targets = targets_of(backup)?;
        let backup_name = backup.name_any();
        let patch = json!({ "metadata": { "labels": { BACKUP_LABEL: backup_name } } });

        for target in &targets {
            self.client
                .merge_patch(&target.object_ref(), &patch)
                .await
                .map_err(|source| BackupError::Label {
                    target: target.to_string(),
                    source,
                })?;
        }

        if !targets.is_empty() {
            add_label_to_selector(backup, BACKUP_LABEL, &backup_name);
            info!(backup = %backup_name, targets = targets.len(), "Applied backup labels");
        }
        Ok(())
    }

    /// Remove the backup label from every apply-label target. Failures are
    /// logged and skipped.
    pub(crate) async fn cleanup_backup_labels(&self, backup: &DynamicObject) {
        let targets = match targets_of(backup) {
            Ok(targets) => targets,
            Err(e) => {
                warn!(backup = %backup.name_any(), error = %e, "Failed to get objs from apply-label annotations");
                return;
            }
        };

        let patch = json!({ "metadata": { "labels": { BACKUP_LABEL: null } } });
        for target in &targets {
            if let Err(e) = self.client.merge_patch(&target.object_ref(), &patch).await {
                warn!(target = %target, error = %e, "Failed to remove backup label");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("v1/namespaces/openshift-adp", "", "v1", "namespaces", None, "openshift-adp")]
    #[case("v1/secrets/openshift-adp/creds", "", "v1", "secrets", Some("openshift-adp"), "creds")]
    #[case(
        "rbac.authorization.k8s.io/v1/clusterroles/klusterlet",
        "rbac.authorization.k8s.io",
        "v1",
        "clusterroles",
        None,
        "klusterlet"
    )]
    #[case(
        "apps/v1/deployments/open-cluster-management-agent/klusterlet",
        "apps",
        "v1",
        "deployments",
        Some("open-cluster-management-agent"),
        "klusterlet"
    )]
    fn test_parse_forms(
        #[case] raw: &str,
        #[case] group: &str,
        #[case] version: &str,
        #[case] resource: &str,
        #[case] namespace: Option<&str>,
        #[case] name: &str,
    ) {
        let targets = parse_apply_label(raw).unwrap();
        assert_eq!(
            targets,
            vec![LabelTarget {
                group: group.to_string(),
                version: version.to_string(),
                resource: resource.to_string(),
                namespace: namespace.map(str::to_string),
                name: name.to_string(),
            }]
        );
    }

    #[rstest]
    #[case("v1/namespaces")]
    #[case("a/b/c/d/e/f")]
    fn test_parse_rejects_segment_count(#[case] raw: &str) {
        let value = format!("v1/secrets/ns/ok,{raw}");
        let err = parse_apply_label(&value).unwrap_err();
        assert_eq!(err.to_string(), format!("invalid apply-label obj in annotation value: {raw}"));
    }

    #[test]
    fn test_parse_removes_duplicates() {
        let targets = parse_apply_label("v1/secrets/ns/a,v1/secrets/ns/b,v1/secrets/ns/a").unwrap();
        let names: Vec<_> = targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_add_label_to_selector_keeps_existing() {
        let mut backup = DynamicObject::new("b", &lca_cluster::resources::velero_backup()).data(json!({
            "spec": { "labelSelector": { "matchLabels": { "app": "x" } }, "ttl": "1h" }
        }));

        add_label_to_selector(&mut backup, BACKUP_LABEL, "b");

        assert_eq!(backup.data["spec"]["labelSelector"]["matchLabels"]["app"], "x");
        assert_eq!(backup.data["spec"]["labelSelector"]["matchLabels"][BACKUP_LABEL], "b");
        assert_eq!(backup.data["spec"]["ttl"], "1h");
    }
}
