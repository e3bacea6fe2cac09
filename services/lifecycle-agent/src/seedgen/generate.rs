//! The generation sequence.
//!
//! Prepares the cluster for capture and launches the imager. Steps that
//! change the cluster register a compensation right after they succeed;
//! if the sequence stops before the imager takes over, the registered
//! compensations run newest first.

use std::sync::{Mutex, PoisonError};

use k8s_openapi::api::core::v1::Secret;
use lca_cluster::{get_as, resources, ObjectRef, Propagation, ResultExt};
use tracing::{error, info};

use super::error::{SeedGenError, StepContext};
use super::pull_secret::{KUBELET_AUTH_FILE, PULL_SECRET_NAME, PULL_SECRET_NAMESPACE, PULL_SECRET_PLACEHOLDER};
use super::restore::{restore_request, restore_secret};
use super::status::{
    MSG_CLEANING, MSG_LAUNCHING_IMAGER, MSG_PREPARING, MSG_PULLING_RECERT, MSG_STARTING, MSG_WAITING_FOR_STABILITY,
};
use super::{SeedGenReconciler, HUB_KUBECONFIG_KEY, IBU_NAME, SEEDGEN_SECRET_NAME, SEED_AUTH_KEY};
use crate::compensation::CompensationStack;
use crate::controller::Requeue;
use crate::crd::{seedgen_ref, SeedGenStage, SeedGenerator, SEEDGEN_NAME};
use crate::imager::{self, ImagerLaunch};
use crate::workspace::{AUTH_FILE, MANAGED_CLUSTER_FILE, PULL_SECRET_FILE, SEEDGEN_CR_FILE, SEEDGEN_SECRET_FILE};

impl SeedGenReconciler {
    /// Run one generation attempt.
    ///
    /// An unstable cluster postpones the attempt. Otherwise the attempt
    /// ends with the imager stopping this process, or with an error after
    /// the request was marked Failed and compensations ran.
    pub(crate) async fn generate_seed_image(
        &self,
        seedgen: &mut SeedGenerator,
        agent_image: &str,
        cluster: &str,
    ) -> Result<Requeue, SeedGenError> {
        info!("Checking system health");
        if let Err(e) = self.health.check().await {
            info!(reason = %e, "Health check failed");
            seedgen.set_in_progress(
                &format!("{MSG_WAITING_FOR_STABILITY}: {e}"),
                SeedGenStage::WaitingForStability,
            );
            return Ok(Requeue::After(self.config.health_check_interval));
        }
        info!("Health check passed");

        seedgen.set_in_progress(MSG_STARTING, SeedGenStage::Generating);
        self.write_status(seedgen).await;

        if self.interrupted_attempt_detected().await {
            self.recover_interrupted_attempt(cluster).await;
        }

        // A re-created request carries whatever is stored here when the
        // compensations run, which is the Failed status set below.
        let final_request = Mutex::new(seedgen.clone());
        let mut compensations = CompensationStack::new();
        let err = match self
            .run_generation(seedgen, agent_image, cluster, &final_request, &mut compensations)
            .await
        {
            Ok(()) => {
                error!("Imager returned control to the agent");
                SeedGenError::UnexpectedReturn
            }
            Err(e) => e,
        };

        seedgen.set_failed(&err.to_string());
        *final_request.lock().unwrap_or_else(PoisonError::into_inner) = seedgen.clone();
        let failed = compensations.unwind().await;
        if failed > 0 {
            error!(failed, "Some compensations failed; manual cleanup may be required");
        }
        Err(err)
    }

    async fn run_generation<'a>(
        &'a self,
        seedgen: &mut SeedGenerator,
        agent_image: &str,
        cluster: &'a str,
        final_request: &'a Mutex<SeedGenerator>,
        compensations: &mut CompensationStack<'a>,
    ) -> Result<(), SeedGenError> {
        self.workspace.wipe().await.step("failed to wipe previous workspace")?;
        imager::remove_previous(self.exec.as_ref())
            .await
            .step("failed to delete previous imager container")?;
        self.workspace.create().await.step("failed to create workdir")?;

        // Pull early so a bad recert image fails before the cluster is touched.
        seedgen.set_in_progress(MSG_PULLING_RECERT, SeedGenStage::Generating);
        self.write_status(seedgen).await;
        let recert_image = seedgen.recert_image(&self.config.default_recert_image).to_string();
        imager::pull(self.exec.as_ref(), KUBELET_AUTH_FILE, &recert_image)
            .await
            .step("failed to pull recert image")?;

        seedgen.set_in_progress(MSG_PREPARING, SeedGenStage::Generating);
        self.write_status(seedgen).await;

        let secret: Secret = get_as(self.client.as_ref(), &self.seedgen_secret_ref())
            .await
            .with_step(|| format!("could not access secret {SEEDGEN_SECRET_NAME} in {}", self.config.namespace))?;
        self.workspace
            .write_json(SEEDGEN_SECRET_FILE, &secret)
            .await
            .step("failed to write secret to workspace")?;

        let data = secret.data.clone().unwrap_or_default();
        let seed_auth = data.get(SEED_AUTH_KEY).ok_or(SeedGenError::MissingSeedAuth)?;
        self.workspace
            .write_private(AUTH_FILE, &seed_auth.0)
            .await
            .with_step(|| format!("failed to write {}", self.workspace.host_path(AUTH_FILE).display()))?;

        match data.get(HUB_KUBECONFIG_KEY) {
            Some(kubeconfig) => {
                let hub = self.connect_hub(&kubeconfig.0).await.step("failed to create hub client")?;
                if self.managed_cluster_exists(hub.as_ref(), cluster).await {
                    info!(cluster, "Collecting hub import data");
                    self.deregister_from_hub(hub.as_ref(), cluster)
                        .await
                        .step("failed to deregister from hub")?;
                    compensations.push("restore hub registration", move || async move {
                        self.restore_managed_cluster(cluster).await.map_err(anyhow::Error::from)
                    });
                } else {
                    info!(cluster, "ManagedCluster does not exist on hub");
                }
            }
            None => info!(
                secret = SEEDGEN_SECRET_NAME,
                "No hubKubeconfig found in secret. Skipping hub interaction"
            ),
        }

        let original_pull_secret = self
            .read_pull_secret()
            .await
            .step(format!("could not access pull-secret {PULL_SECRET_NAME} in {PULL_SECRET_NAMESPACE}"))?;
        self.workspace
            .write_private(PULL_SECRET_FILE, &original_pull_secret)
            .await
            .with_step(|| format!("failed to write pull-secret to {}", self.workspace.host_path(PULL_SECRET_FILE).display()))?;

        seedgen.set_in_progress(MSG_CLEANING, SeedGenStage::Generating);
        self.write_status(seedgen).await;

        info!("Cleaning cluster resources");
        self.cleanup_cluster_resources().await.step("failed to cleanup resources")?;

        info!("Cleaning completed and failed pods");
        let kubeconfig_arg = format!("--kubeconfig={}", self.config.host_kubeconfig);
        for phase in ["Succeeded", "Failed"] {
            let selector = format!("--field-selector=status.phase=={phase}");
            self.exec
                .execute("oc", &["delete", "pod", &kubeconfig_arg, &selector, "--all-namespaces"])
                .await
                .with_step(|| format!("failed to cleanup {phase} pods"))?;
        }

        // Registered first: the patch may land even if the rollout wait fails.
        compensations.push("restore original pull secret", move || async move {
            self.override_pull_secret(&original_pull_secret).await.map_err(anyhow::Error::from)
        });
        info!("Sanitizing cluster pull-secret");
        self.override_pull_secret(PULL_SECRET_PLACEHOLDER.as_bytes())
            .await
            .step("failed sanitizing cluster's pull-secret")?;

        // Recovery after the imager run re-creates this copy, so its status must be final here.
        seedgen.set_in_progress(MSG_LAUNCHING_IMAGER, SeedGenStage::ImagerLaunched);
        self.write_status(seedgen).await;
        self.workspace
            .write_json(SEEDGEN_CR_FILE, &*seedgen)
            .await
            .step("failed to write CR to workspace")?;

        info!("Deleting seedgen secret");
        self.client
            .delete(&self.seedgen_secret_ref(), Propagation::Background)
            .await
            .step("unable to delete seedgen secret CR")?;
        compensations.push("re-create seedgen secret", move || async move {
            restore_secret(self.client.as_ref(), &secret).await.map_err(anyhow::Error::from)
        });

        info!("Deleting seedgen CR");
        self.client
            .delete(&seedgen_ref(SEEDGEN_NAME), Propagation::Background)
            .await
            .step("unable to delete seedgen CR")?;
        compensations.push("re-create seedgen request", move || async move {
            let request = final_request.lock().unwrap_or_else(PoisonError::into_inner).clone();
            restore_request(self.client.as_ref(), &request).await.map_err(anyhow::Error::from)
        });

        // Not captured in the seed.
        self.client
            .delete(
                &ObjectRef::cluster(resources::image_based_upgrade(), IBU_NAME),
                Propagation::Background,
            )
            .await
            .ignore_not_found()
            .step("failed to delete IBU CR")?;

        let auth_file = self.workspace.host_path(AUTH_FILE);
        let launch = ImagerLaunch {
            agent_image,
            seed_image: &seedgen.spec.seed_image,
            recert_image: &recert_image,
            auth_file: &auth_file,
            skip_recert_validation: imager::skip_recert_from_env(),
        };
        imager::launch(self.exec.as_ref(), &launch)
            .await
            .map_err(SeedGenError::Launch)
    }

    /// Whether a previous attempt stopped after changing the cluster.
    ///
    /// Signs are a saved hub record, or a sanitized live pull secret with
    /// the original still in the workspace.
    async fn interrupted_attempt_detected(&self) -> bool {
        if self.workspace.exists(MANAGED_CLUSTER_FILE) {
            return true;
        }
        self.workspace.exists(PULL_SECRET_FILE)
            && self.host_pull_secret().await.as_deref() == Some(PULL_SECRET_PLACEHOLDER)
    }

    /// Put back what an interrupted attempt changed, before it is wiped.
    async fn recover_interrupted_attempt(&self, cluster: &str) {
        info!("Recovering from an interrupted seed generation attempt");
        if let Err(e) = self.restore_managed_cluster(cluster).await {
            error!(error = %e, "Failed to restore hub registration");
        }
        if let Err(e) = self.restore_pull_secret_from_workspace().await {
            error!(error = %e, "Failed to restore pull secret");
        }
    }
}
