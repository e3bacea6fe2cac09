//! Wave-ordered backup orchestration.
//!
//! Backup objects arrive as annotated manifests. This crate:
//!
//! - Groups them into waves by the `lca.openshift.io/apply-wave`
//!   annotation ([`sort_by_apply_wave`]).
//! - Creates the ones that do not exist yet and classifies the rest by
//!   their reported phase ([`BackupHandler::start_or_track`]).
//! - Labels the objects named in `lca.openshift.io/apply-label` so the
//!   backup selects exactly them.
//! - Deletes everything created for this cluster and waits for it to go
//!   away ([`BackupHandler::cleanup_backups`]).
//!
//! # Invariants
//!
//! - Sorting is deterministic: ascending wave, then ascending name
//! - A backup that exists is never re-created, whatever its phase
//! - Every tracked backup lands in exactly one tracker list

use std::sync::Arc;
use std::time::Duration;

use lca_cluster::ClusterClient;
use lca_reconcile::PollSpec;
use tokio::sync::watch;

mod cleanup;
mod error;
mod extract;
mod labels;
mod tracker;
mod waves;

pub use error::BackupError;
pub use extract::extract_backups_from_configmaps;
pub use labels::{parse_apply_label, LabelTarget};
pub use tracker::BackupTracker;
pub use waves::sort_by_apply_wave;

/// Annotation holding the wave number of a backup.
pub const APPLY_WAVE_ANNOTATION: &str = "lca.openshift.io/apply-wave";

/// Annotation listing objects to label for a backup.
pub const APPLY_LABEL_ANNOTATION: &str = "lca.openshift.io/apply-label";

/// Label placed on objects selected by a backup; the value is the backup name.
pub const BACKUP_LABEL: &str = "lca.openshift.io/backup";

/// Label tying a backup to the cluster that created it.
pub const CLUSTER_ID_LABEL: &str = "config.openshift.io/clusterID";

/// Wave assigned when the annotation is absent or empty.
pub const DEFAULT_APPLY_WAVE: i64 = 100;

/// Interval and ceiling for waiting on backup deletion.
pub const CLEANUP_POLL: PollSpec = PollSpec::new(Duration::from_secs(1), Duration::from_secs(5 * 60));

/// Creates, tracks and removes backups through the cluster API.
pub struct BackupHandler {
    client: Arc<dyn ClusterClient>,
    shutdown: watch::Receiver<bool>,
}

impl BackupHandler {
    /// Create a handler. `shutdown` aborts any wait in progress.
    pub fn new(client: Arc<dyn ClusterClient>, shutdown: watch::Receiver<bool>) -> Self {
        Self { client, shutdown }
    }
}
