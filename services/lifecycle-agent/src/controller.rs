//! Trigger loop for SeedGenerator requests.
//!
//! Reconciliation is triggered by the first sighting of each request
//! object (by uid), and afterwards only by the requeue the reconciler
//! asked for. Status writes made by the reconciler itself do not trigger
//! another pass.
//!
//! # Invariants
//!
//! - At most one reconcile runs at a time.
//! - A failed reconcile is retried with exponential backoff.
//! - Shutdown stops the loop between reconciles.

use std::collections::HashSet;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, ResourceExt};
use lca_reconcile::{cancelled, Backoff};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::crd::{SeedGenerator, SEEDGEN_NAME};
use crate::seedgen::SeedGenReconciler;

/// What the reconciler wants to happen next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Wait for the next new request.
    Never,

    /// Reconcile again right away.
    Immediately,

    /// Reconcile again after a delay.
    After(Duration),
}

/// Delay between retries of a failing reconcile.
const ERROR_BACKOFF: Backoff = Backoff {
    initial: Duration::from_secs(5),
    factor: 2.0,
    jitter: 0.1,
    steps: u32::MAX,
    cap: Duration::from_secs(300),
};

/// Watch the singleton request.
pub fn watch_requests(client: Client) -> impl Stream<Item = Result<SeedGenerator, watcher::Error>> + Send {
    let api: Api<SeedGenerator> = Api::all(client);
    let config = watcher::Config::default().fields(&format!("metadata.name={SEEDGEN_NAME}"));
    watcher(api, config).default_backoff().applied_objects()
}

/// Drive `reconciler` from `events` until shutdown or the stream ends.
pub async fn run<S, E>(reconciler: Arc<SeedGenReconciler>, events: S, mut shutdown: watch::Receiver<bool>)
where
    S: Stream<Item = Result<SeedGenerator, E>>,
    E: Display,
{
    let mut events = std::pin::pin!(events);
    let mut seen: HashSet<String> = HashSet::new();
    let mut next: Option<Instant> = None;
    let mut failures: u32 = 0;

    info!("SeedGenerator controller started");

    loop {
        let name = tokio::select! {
            event = events.next() => match event {
                Some(Ok(seedgen)) => {
                    let uid = seedgen.uid().unwrap_or_default();
                    if !seen.insert(uid) {
                        debug!(name = %seedgen.name_any(), "Ignoring update of known SeedGenerator");
                        continue;
                    }
                    seedgen.name_any()
                }
                Some(Err(e)) => {
                    warn!(error = %e, "SeedGenerator watch error");
                    continue;
                }
                None => {
                    info!("SeedGenerator watch ended");
                    break;
                }
            },
            _ = tokio::time::sleep_until(next.unwrap_or_else(Instant::now)), if next.is_some() => {
                next = None;
                SEEDGEN_NAME.to_string()
            }
            _ = cancelled(&mut shutdown) => {
                info!("SeedGenerator controller shutting down");
                break;
            }
        };

        next = match reconciler.reconcile(&name).await {
            Ok(requeue) => {
                failures = 0;
                match requeue {
                    Requeue::Never => None,
                    Requeue::Immediately => Some(Instant::now()),
                    Requeue::After(delay) => Some(Instant::now() + delay),
                }
            }
            Err(e) => {
                let delay = ERROR_BACKOFF.delay(failures);
                failures = failures.saturating_add(1);
                warn!(error = %e, retry_in_secs = delay.as_secs(), "Reconcile failed, will retry");
                Some(Instant::now() + delay)
            }
        };
    }
}
