//! Finishing an attempt after the imager has run.

use tracing::info;

use super::error::{SeedGenError, StepContext};
use super::SeedGenReconciler;
use crate::imager;
use crate::workspace::PULL_SECRET_FILE;

impl SeedGenReconciler {
    /// Undo the preparation done for capture and check the imager result.
    ///
    /// The workspace is wiped only when everything succeeded, so a failed
    /// finalize keeps the saved state for inspection.
    pub(crate) async fn finalize(&self, cluster: &str) -> Result<(), SeedGenError> {
        self.restore_managed_cluster(cluster).await.step("failed to restore hub registration")?;
        self.restore_pull_secret_from_workspace()
            .await
            .step("failed to restore cluster pull-secret")?;

        imager::check_status(self.exec.as_ref())
            .await
            .map_err(SeedGenError::ImagerStatus)?;

        self.workspace.wipe().await.step("failed to wipe workspace")
    }

    /// Put the saved pull secret back if the live one differs.
    pub(crate) async fn restore_pull_secret_from_workspace(&self) -> anyhow::Result<()> {
        let Some(saved) = self.workspace.read(PULL_SECRET_FILE).await? else {
            return Ok(());
        };

        let live = self.read_pull_secret().await?;
        if live.trim_ascii() != saved.trim_ascii() {
            info!("Restoring original cluster pull-secret");
            self.override_pull_secret(&saved).await?;
        }

        self.workspace.mark_restored(PULL_SECRET_FILE).await?;
        Ok(())
    }
}
