//! Preconditions checked before a request is accepted.

use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use lca_cluster::{get_as, resources, ObjectRef};
use tracing::info;

use super::pull_secret::PULL_SECRET_PLACEHOLDER;
use super::SeedGenReconciler;

const ACM_ADDON_NAMESPACE_PREFIX: &str = "open-cluster-management-addon-";
const DNSMASQ_CONFIG_SCRIPT: &str = "/usr/local/bin/dnsmasq_config.sh";

impl SeedGenReconciler {
    /// Check whether this cluster can be used as a seed.
    ///
    /// Returns the rejection message of the first failing check.
    pub(crate) async fn validate_system(&self) -> Option<String> {
        if !self.ostree_set_default_supported().await {
            return Some(r#"Rejected: Installed release does not support "ostree admin set-default" feature"#.to_string());
        }

        let addons = self.acm_addon_namespaces().await;
        if !addons.is_empty() {
            return Some(format!(
                "Rejected due to presence of ACM addon(s): {}",
                addons.join(", ")
            ));
        }

        if !self.config.host_path(DNSMASQ_CONFIG_SCRIPT).exists() {
            return Some("Rejected due to system missing dnsmasq config required for IBU".to_string());
        }

        if self.host_pull_secret().await.as_deref() == Some(PULL_SECRET_PLACEHOLDER) {
            return Some(
                "Rejected due to invalid cluster pull-secret (previously sanitized without proper restore)".to_string(),
            );
        }

        if !self.kubeadmin_secret_present().await {
            return Some("Rejected due to system missing required kube-system/kubeadmin Secret".to_string());
        }

        None
    }

    async fn ostree_set_default_supported(&self) -> bool {
        match self.exec.execute("ostree", &["admin", "--help"]).await {
            Ok(help) => help.contains("set-default"),
            Err(e) => {
                info!(error = %e, "Failed to query ostree admin features");
                false
            }
        }
    }

    /// Namespaces of hub add-ons; a listing failure counts as none.
    async fn acm_addon_namespaces(&self) -> Vec<String> {
        match self.client.list(&resources::namespace(), None, None).await {
            Ok(namespaces) => namespaces
                .iter()
                .map(|ns| ns.name_any())
                .filter(|name| name.starts_with(ACM_ADDON_NAMESPACE_PREFIX))
                .collect(),
            Err(e) => {
                info!(error = %e, "Error when checking namespaces");
                Vec::new()
            }
        }
    }

    async fn kubeadmin_secret_present(&self) -> bool {
        let target = ObjectRef::namespaced(resources::secret(), "kube-system", "kubeadmin");
        get_as::<Secret, _>(self.client.as_ref(), &target)
            .await
            .is_ok_and(|secret| secret.data.is_some_and(|data| data.contains_key("kubeadmin")))
    }
}
