//! Re-creating the request and its companion secret.
//!
//! Both are deleted right before the imager runs so that they are not
//! captured in the seed. They come back either through a compensation
//! (the launch failed) or from the workspace after a restart.

use k8s_openapi::api::core::v1::Secret;
use lca_cluster::{resources, to_dynamic, ApiError, ClusterClient, ResultExt};
use lca_reconcile::{retry_on_conflict_or_retriable, Backoff};
use tracing::info;

use crate::crd::{seedgen_ref, seedgen_resource, SeedGenerator};

/// Create `secret` again, ignoring an existing copy.
pub async fn restore_secret(client: &dyn ClusterClient, secret: &Secret) -> Result<(), ApiError> {
    info!(name = ?secret.metadata.name, "Restoring seedgen secret");

    let mut secret = secret.clone();
    secret.metadata.resource_version = None;
    let obj = to_dynamic(&secret)?;
    let resource = resources::secret();

    retry_on_conflict_or_retriable(&Backoff::API_DEFAULT, None, || async {
        client.create(&resource, &obj).await.ignore_already_exists().map(|_| ())
    })
    .await
}

/// Create the request again and re-apply its status.
///
/// Status is dropped on create, so it is written in a second call using
/// the resource version of the new object.
pub async fn restore_request(client: &dyn ClusterClient, seedgen: &SeedGenerator) -> Result<(), ApiError> {
    info!("Restoring SeedGenerator");

    let mut seedgen = seedgen.clone();
    seedgen.metadata.resource_version = None;
    seedgen.metadata.uid = None;
    let obj = to_dynamic(&seedgen)?;
    let resource = seedgen_resource();

    retry_on_conflict_or_retriable(&Backoff::API_DEFAULT, None, || async {
        client.create(&resource, &obj).await.ignore_already_exists().map(|_| ())
    })
    .await?;

    if seedgen.status.is_none() {
        return Ok(());
    }

    let target = seedgen_ref(seedgen.metadata.name.as_deref().unwrap_or_default());
    retry_on_conflict_or_retriable(&Backoff::API_DEFAULT, None, || async {
        let current = client.get(&target).await?;
        let mut obj = obj.clone();
        obj.metadata.resource_version = current.metadata.resource_version;
        client.update_status(&resource, &obj).await.map(|_| ())
    })
    .await
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::ByteString;
    use lca_cluster::fake::InMemoryCluster;
    use lca_cluster::{get_as, ObjectRef};

    use super::*;
    use crate::crd::{SeedGenStage, SeedGeneratorSpec};
    use crate::seedgen::status::MSG_LAUNCHING_IMAGER;
    use crate::seedgen::Phase;

    #[tokio::test]
    async fn test_restore_request_reapplies_status() {
        let cluster = InMemoryCluster::new();
        let mut sg = SeedGenerator::new(
            "seedimage",
            SeedGeneratorSpec {
                seed_image: "quay.io/org/seed:latest".to_string(),
                recert_image: None,
            },
        );
        sg.metadata.resource_version = Some("42".to_string());
        sg.set_in_progress(MSG_LAUNCHING_IMAGER, SeedGenStage::ImagerLaunched);

        restore_request(&cluster, &sg).await.unwrap();
        // A second restore finds the object and only rewrites status.
        restore_request(&cluster, &sg).await.unwrap();

        let restored: SeedGenerator = get_as(&cluster, &seedgen_ref("seedimage")).await.unwrap();
        assert_eq!(restored.phase(), Phase::Finalizing);
        assert_eq!(restored.spec.seed_image, "quay.io/org/seed:latest");
    }

    #[tokio::test]
    async fn test_restore_secret_clears_resource_version() {
        let cluster = InMemoryCluster::new();
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some("seedgen".to_string()),
                namespace: Some("openshift-lifecycle-agent".to_string()),
                resource_version: Some("7".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("seedAuth".to_string(), ByteString(b"{}".to_vec()))])),
            ..Default::default()
        };

        restore_secret(&cluster, &secret).await.unwrap();
        restore_secret(&cluster, &secret).await.unwrap();

        let target = ObjectRef::namespaced(resources::secret(), "openshift-lifecycle-agent", "seedgen");
        let restored: Secret = get_as(&cluster, &target).await.unwrap();
        assert_eq!(restored.data.unwrap()["seedAuth"], ByteString(b"{}".to_vec()));
        assert_eq!(cluster.journal(), vec!["create Secret openshift-lifecycle-agent/seedgen"]);
    }
}
