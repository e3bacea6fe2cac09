//! Seed generation errors.

use std::fmt::Display;

use thiserror::Error;

use crate::cluster_info::ClusterInfoError;
use crate::imager::ImagerError;

/// Failure of a seed generation attempt.
///
/// The display text is what ends up in the Failed status condition.
#[derive(Debug, Error)]
pub enum SeedGenError {
    /// A workflow step failed; `context` names the step.
    #[error("{context}: {source}")]
    Step {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("could not find seedAuth in seedgen secret")]
    MissingSeedAuth,

    #[error("imager failed: {0}")]
    Launch(#[source] ImagerError),

    /// The imager returned control, which it never does on success.
    #[error("unexpected return from launching imager container")]
    UnexpectedReturn,

    #[error("imager container status check failed: {0}")]
    ImagerStatus(#[source] ImagerError),
}

/// Errors returned to the controller; these requeue with backoff.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    ClusterInfo(#[from] ClusterInfoError),
}

/// Attach a step description to a fallible result.
pub trait StepContext<T> {
    fn step<C: Display>(self, context: C) -> Result<T, SeedGenError>;

    fn with_step<C: Display, F: FnOnce() -> C>(self, f: F) -> Result<T, SeedGenError>;
}

impl<T, E> StepContext<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn step<C: Display>(self, context: C) -> Result<T, SeedGenError> {
        self.map_err(|e| SeedGenError::Step {
            context: context.to_string(),
            source: e.into(),
        })
    }

    fn with_step<C: Display, F: FnOnce() -> C>(self, f: F) -> Result<T, SeedGenError> {
        self.map_err(|e| SeedGenError::Step {
            context: f().to_string(),
            source: e.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use lca_cluster::ApiError;

    use super::*;

    #[test]
    fn test_step_display() {
        let result: Result<(), ApiError> = Err(ApiError::NotFound("Secret openshift-config/pull-secret".to_string()));
        let err = result
            .step("could not access pull-secret pull-secret in openshift-config")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "could not access pull-secret pull-secret in openshift-config: not found: Secret openshift-config/pull-secret"
        );
    }

    #[test]
    fn test_nested_step_keeps_chain() {
        let inner: Result<(), anyhow::Error> = Err(anyhow::anyhow!("timed out waiting for ACM CRD deletion"));
        let err = inner.step("failed to cleanup resources").unwrap_err();
        assert_eq!(err.to_string(), "failed to cleanup resources: timed out waiting for ACM CRD deletion");
    }
}
