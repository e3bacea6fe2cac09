//! Seed generation workflow.
//!
//! One reconcile call drives a SeedGenerator request one step further:
//!
//! - **Initial**: validate that the cluster can produce a seed.
//! - **Generating**: wait for stability, prepare the cluster, then hand
//!   control to the imager, which stops this process.
//! - **Finalizing**: after the restart, undo the preparation and check
//!   the imager result.
//!
//! Preparation steps that change the cluster register a compensation so
//! that a failure before the hand-off puts the cluster back. Everything a
//! restarted agent needs lives in the request status and the workspace.
//!
//! # Invariants
//!
//! - At most one attempt runs at a time per process.
//! - Only the request named [`SEEDGEN_NAME`] is acted upon.
//! - Terminal phases are never acted upon again.
//! - Every non-terminal path ends with a best-effort status write.

use std::sync::Arc;

use lca_cluster::{get_as, ApiError, ClusterClient, HubConnector};
use lca_reconcile::{retry_on_retriable, Backoff, Retriable};
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

use crate::cluster_info;
use crate::config::Config;
use crate::controller::Requeue;
use crate::crd::{seedgen_ref, seedgen_resource, SeedGenStage, SeedGenerator, SEEDGEN_NAME};
use crate::exec::Executor;
use crate::health::HealthChecker;
use crate::workspace::Workspace;

mod cleanup;
mod error;
mod finalize;
mod generate;
mod hub;
mod phase;
mod pull_secret;
mod restore;
pub mod status;
mod validate;

pub use error::{ReconcileError, SeedGenError, StepContext};
pub use phase::Phase;
pub use pull_secret::{KUBELET_AUTH_FILE, PULL_SECRET_PLACEHOLDER};
pub use restore::{restore_request, restore_secret};

use status::{MSG_FINALIZING, MSG_WAITING_FOR_STABILITY};

/// Companion secret holding registry and hub credentials.
pub const SEEDGEN_SECRET_NAME: &str = "seedgen";

/// Secret key with the credentials used to push the seed image.
pub const SEED_AUTH_KEY: &str = "seedAuth";

/// Optional secret key with a kubeconfig for the managing hub.
pub const HUB_KUBECONFIG_KEY: &str = "hubKubeconfig";

/// Name of the ImageBasedUpgrade request removed before capture.
pub const IBU_NAME: &str = "upgrade";

/// Drives SeedGenerator requests.
pub struct SeedGenReconciler {
    config: Config,
    workspace: Workspace,
    client: Arc<dyn ClusterClient>,
    hub: Arc<dyn HubConnector>,
    exec: Arc<dyn Executor>,
    health: Arc<dyn HealthChecker>,
    shutdown: watch::Receiver<bool>,

    /// Serializes attempts; held for a whole reconcile call.
    attempt: Mutex<()>,
}

impl SeedGenReconciler {
    pub fn new(
        config: Config,
        client: Arc<dyn ClusterClient>,
        hub: Arc<dyn HubConnector>,
        exec: Arc<dyn Executor>,
        health: Arc<dyn HealthChecker>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            workspace: Workspace::from_config(&config),
            config,
            client,
            hub,
            exec,
            health,
            shutdown,
            attempt: Mutex::new(()),
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Reconcile the request called `name`.
    pub async fn reconcile(&self, name: &str) -> Result<Requeue, ReconcileError> {
        let _attempt = self.attempt.lock().await;

        info!(name, "Start reconciling SeedGenerator");
        let result = self.reconcile_locked(name).await;
        match &result {
            Ok(requeue) => info!(name, ?requeue, "Finish reconciling SeedGenerator"),
            Err(e) => warn!(name, error = %e, "Reconcile of SeedGenerator failed"),
        }
        result
    }

    async fn reconcile_locked(&self, name: &str) -> Result<Requeue, ReconcileError> {
        if name != SEEDGEN_NAME {
            info!(name, expected = SEEDGEN_NAME, "Ignoring SeedGenerator with unexpected name");
            return Ok(Requeue::Never);
        }

        let agent_image = cluster_info::agent_image(
            self.client.as_ref(),
            self.config.agent_image.as_deref(),
            &self.config.namespace,
            self.config.pod_name.as_deref(),
        )
        .await?;
        let cluster = cluster_info::cluster_name(self.client.as_ref()).await?;

        let target = seedgen_ref(name);
        let fetched = retry_on_retriable(&Backoff::TWO_MINUTES, Some(&self.shutdown), || {
            get_as::<SeedGenerator, _>(self.client.as_ref(), &target)
        })
        .await;
        let mut seedgen = match fetched {
            Ok(seedgen) => seedgen,
            Err(e) if e.is_not_found() => return Ok(Requeue::Never),
            Err(e) => {
                error!(error = %e, "Failed to get SeedGenerator");
                return Ok(Requeue::After(self.config.requeue_short_interval));
            }
        };

        let phase = seedgen.phase();
        info!(%phase, "Classified SeedGenerator");

        let requeue = match phase {
            Phase::Failed => {
                info!("Seed generation has failed. Delete and recreate the SeedGenerator to try again");
                return Ok(Requeue::Never);
            }
            Phase::Completed => {
                info!("Seed generation is completed");
                return Ok(Requeue::Never);
            }
            Phase::Initial => match self.validate_system().await {
                Some(rejection) => {
                    info!(%rejection, "Seed generation rejected: system validation failed");
                    seedgen.set_failed(&rejection);
                    Requeue::Never
                }
                None => {
                    seedgen.set_in_progress(MSG_WAITING_FOR_STABILITY, SeedGenStage::WaitingForStability);
                    Requeue::Immediately
                }
            },
            Phase::Generating => {
                info!(seed_image = %seedgen.spec.seed_image, "Generating seed image");
                match self.generate_seed_image(&mut seedgen, &agent_image, &cluster).await {
                    Ok(requeue) => requeue,
                    Err(e) => {
                        if let Err(wipe) = self.workspace.wipe().await {
                            warn!(error = %wipe, "Failed to wipe workspace");
                        }
                        error!(error = %e, "Seed generation failed");
                        Requeue::Never
                    }
                }
            }
            Phase::Finalizing => {
                info!("Finalizing seed generation");
                seedgen.set_in_progress(MSG_FINALIZING, SeedGenStage::Finalizing);
                self.write_status(&mut seedgen).await;

                match self.finalize(&cluster).await {
                    Ok(()) => seedgen.set_completed(),
                    Err(e) => {
                        error!(error = %e, "Seed generation failed");
                        seedgen.set_failed(&format!("Seed generation failed: {e}"));
                    }
                }
                Requeue::Never
            }
        };

        self.write_status(&mut seedgen).await;
        Ok(requeue)
    }

    /// Persist the status of `seedgen`. Failures are logged, not returned.
    ///
    /// The request may have been deleted and re-created during the
    /// attempt, so a conflict refreshes the resource version and retries.
    pub(crate) async fn write_status(&self, seedgen: &mut SeedGenerator) {
        seedgen.mark_observed();

        let mut result = self.put_status(seedgen).await;
        if matches!(&result, Err(e) if e.is_conflict()) {
            match self.client.get(&seedgen_ref(SEEDGEN_NAME)).await {
                Ok(latest) => {
                    seedgen.metadata.resource_version = latest.metadata.resource_version;
                    result = self.put_status(seedgen).await;
                }
                Err(e) => result = Err(e),
            }
        }

        match result {
            Ok(updated) => seedgen.metadata.resource_version = updated.metadata.resource_version,
            Err(e) => error!(error = %e, "Failed to update SeedGenerator status"),
        }
    }

    async fn put_status(&self, seedgen: &SeedGenerator) -> Result<lca_cluster::DynamicObject, ApiError> {
        let resource = seedgen_resource();
        let obj = lca_cluster::to_dynamic(seedgen)?;
        retry_on_retriable(&Backoff::TWO_MINUTES, Some(&self.shutdown), || {
            self.client.update_status(&resource, &obj)
        })
        .await
    }
}
