//! The SeedGenerator custom resource.
//!
//! A cluster-scoped singleton named [`SEEDGEN_NAME`]. Progress lives in
//! two status conditions plus an optional [`SeedGenStage`] tag; there is
//! no persisted phase field, see [`crate::seedgen::Phase`].

use chrono::{DateTime, Utc};
use kube::CustomResource;
use lca_cluster::{ApiResource, ObjectRef};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The only SeedGenerator name the agent acts on.
pub const SEEDGEN_NAME: &str = "seedimage";

/// Condition types.
pub mod condition_types {
    pub const IN_PROGRESS: &str = "SeedGenInProgress";
    pub const COMPLETED: &str = "SeedGenCompleted";
}

/// Condition reasons.
pub mod reasons {
    pub const IDLE: &str = "Idle";
    pub const IN_PROGRESS: &str = "InProgress";
    pub const COMPLETED: &str = "Completed";
    pub const FAILED: &str = "Failed";
}

/// Request to capture a seed image from this cluster.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "lca.openshift.io",
    version = "v1",
    kind = "SeedGenerator",
    plural = "seedgenerators",
    shortname = "seedgen",
    status = "SeedGeneratorStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct SeedGeneratorSpec {
    /// Image reference the seed is pushed to.
    pub seed_image: String,

    /// Overrides the default recert image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recert_image: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeedGeneratorStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Machine-readable progress marker, written alongside the messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<SeedGenStage>,
}

/// Where an in-progress attempt currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum SeedGenStage {
    WaitingForStability,
    Generating,
    ImagerLaunched,
    Finalizing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    pub last_transition_time: DateTime<Utc>,
}

/// API resource of the SeedGenerator kind.
pub fn seedgen_resource() -> ApiResource {
    ApiResource::erase::<SeedGenerator>(&())
}

/// Address of a SeedGenerator by name.
pub fn seedgen_ref(name: &str) -> ObjectRef {
    ObjectRef::cluster(seedgen_resource(), name)
}

impl SeedGenerator {
    /// Recert image to use for this request.
    pub fn recert_image<'a>(&'a self, default: &'a str) -> &'a str {
        self.spec
            .recert_image
            .as_deref()
            .filter(|image| !image.is_empty())
            .unwrap_or(default)
    }

    /// Find a status condition by type.
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.status
            .as_ref()
            .and_then(|status| status.conditions.iter().find(|c| c.type_ == type_))
    }
}
