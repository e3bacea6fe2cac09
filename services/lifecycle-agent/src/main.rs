//! Lifecycle agent
//!
//! Runs the SeedGenerator controller on the node:
//!
//! - **Recovery**: restores objects the imager ran without
//! - **Controller**: reconciles the SeedGenerator singleton until shutdown

use std::sync::Arc;

use anyhow::Result;
use lca_agent::controller;
use lca_agent::exec::HostExecutor;
use lca_agent::health::ClusterHealthChecker;
use lca_agent::recovery;
use lca_agent::workspace::Workspace;
use lca_agent::{Config, SeedGenReconciler};
use lca_cluster::{KubeCluster, KubeHubConnector};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(config.log_filter())
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting lifecycle agent");
    info!(
        log_level = %config.log_level,
        host_root = %config.host_root.display(),
        workspace = %config.workspace_dir.display(),
        namespace = %config.namespace,
        use_nsenter = config.use_nsenter,
        "Configuration loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let client = kube::Client::try_default().await?;
    let cluster = Arc::new(KubeCluster::new(client.clone()));

    // Must finish before the watch starts so restored objects are seen as new.
    let workspace = Workspace::from_config(&config);
    if let Err(e) = recovery::restore_from_workspace(cluster.as_ref(), &workspace).await {
        error!(error = %e, "Failed to restore objects from workspace");
    }

    let reconciler = Arc::new(SeedGenReconciler::new(
        config.clone(),
        cluster.clone(),
        Arc::new(KubeHubConnector),
        Arc::new(HostExecutor::new(config.use_nsenter)),
        Arc::new(ClusterHealthChecker::new(cluster)),
        shutdown_rx.clone(),
    ));

    let controller_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            controller::run(reconciler, controller::watch_requests(client), shutdown_rx).await;
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = controller_handle => {
            match result {
                Ok(()) => info!("Controller exited"),
                Err(e) => error!(error = %e, "Controller task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;

    info!("Lifecycle agent shutdown complete");
    Ok(())
}
