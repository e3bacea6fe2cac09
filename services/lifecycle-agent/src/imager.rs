//! The imager: the external worker that captures the seed image.
//!
//! It runs as a transient systemd unit so that it survives the agent
//! being stopped, and it stops the agent as part of its work. A launch
//! that returns at all is therefore never a success.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::exec::{ExecError, Executor};

/// Name of the imager container.
pub const IMAGER_CONTAINER: &str = "lca_image_builder";

/// Name of the transient systemd unit running the imager.
pub const IMAGER_UNIT: &str = "lca-generate-seed-image";

/// Set to exactly `TRUE` to skip recert validation in the imager.
pub const SKIP_RECERT_ENV: &str = "SEEDGEN_SKIP_RECERT";

/// Imager errors.
#[derive(Debug, Error)]
pub enum ImagerError {
    #[error("failed to run podman rm command: {0}")]
    Remove(#[source] ExecError),

    #[error("failed to pull recertImage ({image}): {source}")]
    Pull {
        image: String,
        #[source]
        source: ExecError,
    },

    #[error("failed to run imager container: {0}")]
    Launch(#[source] ExecError),

    #[error("failed to run podman inspect command: {0}")]
    Inspect(#[source] ExecError),

    #[error("unable to parse podman inspect command output: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("expected 1 item in podman inspect output, got {0}")]
    Count(usize),

    #[error("expected container status exited, found: {0}")]
    NotExited(String),

    #[error("expected container exit code 0, found: {0}")]
    ExitCode(i64),
}

/// Parameters of an imager run.
#[derive(Debug, Clone)]
pub struct ImagerLaunch<'a> {
    pub agent_image: &'a str,
    pub seed_image: &'a str,
    pub recert_image: &'a str,

    /// Registry credentials, as a host path.
    pub auth_file: &'a Path,

    pub skip_recert_validation: bool,
}

impl ImagerLaunch<'_> {
    /// Full `systemd-run` argument list.
    pub fn args(&self) -> Vec<String> {
        let auth = self.auth_file.display().to_string();
        let mut args: Vec<String> = [
            "--collect",
            "--wait",
            "--unit",
            IMAGER_UNIT,
            "podman",
            "run",
            "--privileged",
            "--pid=host",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        args.push(format!("--name={IMAGER_CONTAINER}"));
        args.extend(
            [
                "--replace",
                "--net=host",
                "-v",
                "/etc:/etc",
                "-v",
                "/var:/var",
                "-v",
                "/var/run:/var/run",
                "-v",
                "/run/systemd/journal/socket:/run/systemd/journal/socket",
            ]
            .into_iter()
            .map(String::from),
        );
        args.push("-v".to_string());
        args.push(format!("{auth}:{auth}"));
        args.extend(["--entrypoint", "lca-cli", self.agent_image, "create", "--authfile"].map(String::from));
        args.push(auth);
        args.extend(["--image", self.seed_image, "--recert-image", self.recert_image].map(String::from));

        if self.skip_recert_validation {
            args.push("--skip-recert-validation".to_string());
        }
        args
    }
}

/// Whether recert validation is disabled through the environment.
pub fn skip_recert_from_env() -> bool {
    std::env::var(SKIP_RECERT_ENV).is_ok_and(|value| value == "TRUE")
}

/// Remove a leftover imager container, if any.
pub async fn remove_previous(exec: &dyn Executor) -> Result<(), ImagerError> {
    exec.execute("podman", &["rm", "-i", "-f", IMAGER_CONTAINER])
        .await
        .map_err(ImagerError::Remove)?;
    Ok(())
}

/// Pull an image with the node's registry credentials.
pub async fn pull(exec: &dyn Executor, auth_file: &str, image: &str) -> Result<(), ImagerError> {
    exec.execute("podman", &["pull", "--authfile", auth_file, image])
        .await
        .map_err(|source| ImagerError::Pull {
            image: image.to_string(),
            source,
        })?;
    Ok(())
}

/// Run the imager and wait for the unit to finish.
///
/// On a real node the agent is stopped before this returns.
pub async fn launch(exec: &dyn Executor, launch: &ImagerLaunch<'_>) -> Result<(), ImagerError> {
    if launch.skip_recert_validation {
        info!(env = SKIP_RECERT_ENV, "Skipping recert validation");
    }
    info!(seed_image = %launch.seed_image, recert_image = %launch.recert_image, "Launching imager");

    let args = launch.args();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    exec.execute("systemd-run", &args).await.map_err(ImagerError::Launch)?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ContainerInfo {
    #[serde(rename = "State")]
    state: ContainerState,
}

#[derive(Debug, Deserialize)]
struct ContainerState {
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "ExitCode")]
    exit_code: i64,
}

/// Check that the imager container ran to completion successfully.
pub async fn check_status(exec: &dyn Executor) -> Result<(), ImagerError> {
    info!(container = IMAGER_CONTAINER, "Checking imager container status");
    let output = exec
        .execute("podman", &["inspect", "--format", "json", IMAGER_CONTAINER])
        .await
        .map_err(ImagerError::Inspect)?;
    parse_status(&output)?;
    info!("Seed image generation was successful");
    Ok(())
}

fn parse_status(output: &str) -> Result<(), ImagerError> {
    let containers: Vec<ContainerInfo> = serde_json::from_str(output)?;
    let [container] = containers.as_slice() else {
        return Err(ImagerError::Count(containers.len()));
    };
    if container.state.status != "exited" {
        return Err(ImagerError::NotExited(container.state.status.clone()));
    }
    if container.state.exit_code != 0 {
        return Err(ImagerError::ExitCode(container.state.exit_code));
    }
    Ok(())
}
