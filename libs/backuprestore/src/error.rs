//! Backup orchestration errors.

use std::num::ParseIntError;

use lca_cluster::ApiError;
use lca_reconcile::PollError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackupError {
    /// The apply-wave annotation is not an integer.
    #[error("failed to convert {value} in Backup CR {name} to integer: {source}")]
    InvalidApplyWave {
        name: String,
        value: String,
        #[source]
        source: ParseIntError,
    },

    /// An apply-label entry has the wrong number of segments.
    #[error("invalid apply-label obj in annotation value: {0}")]
    InvalidApplyLabel(String),

    /// A ConfigMap payload could not be decoded.
    #[error("failed to decode yaml in configmap {configmap}: {message}")]
    FailedValidation { configmap: String, message: String },

    /// The cluster ID could not be determined.
    #[error("failed to get cluster ID: {0}")]
    ClusterId(String),

    /// Labeling a selected object failed.
    #[error("failed to apply backup label on {target}: {source}")]
    Label {
        target: String,
        #[source]
        source: ApiError,
    },

    /// Creating a backup or its deletion request failed.
    #[error("failed to create {what}: {source}")]
    Create {
        what: String,
        #[source]
        source: ApiError,
    },

    /// Waiting for deletion failed for a reason other than the ceiling.
    #[error("api call errors when trying to ensure backup deletion: {0}")]
    Wait(#[source] PollError<ApiError>),

    #[error(transparent)]
    Api(#[from] ApiError),
}
