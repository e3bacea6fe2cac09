//! Trigger loop driven by a stream of request events.

mod common;

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use futures_util::stream;
use lca_agent::controller;
use lca_agent::crd::{condition_types, SeedGenerator};
use lca_agent::health::HealthError;
use lca_agent::seedgen::Phase;
use tokio::sync::mpsc;

fn events(rx: mpsc::UnboundedReceiver<SeedGenerator>) -> impl futures_util::Stream<Item = Result<SeedGenerator, Infallible>> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|seedgen| (Ok(seedgen), rx)) })
}

fn status_writes(fx: &Fixture) -> usize {
    fx.cluster
        .journal()
        .iter()
        .filter(|entry| entry.starts_with("status SeedGenerator"))
        .count()
}

#[tokio::test(start_paused = true)]
async fn test_new_request_is_driven_until_it_waits() {
    let fx = Fixture::new();
    fx.health.set_unstable(Some(HealthError::NodeNotReady("master-0".to_string())));
    fx.insert_request(|_| {});
    let reconciler = Arc::new(fx.reconciler());
    let (tx, rx) = mpsc::unbounded_channel();

    let driver = async {
        tx.send(fx.request().await).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        // Accepted, then postponed by the health check.
        let seedgen = fx.request().await;
        assert_eq!(seedgen.phase(), Phase::Generating);
        assert!(seedgen
            .condition(condition_types::IN_PROGRESS)
            .unwrap()
            .message
            .starts_with("Waiting for system to stabilize: "));
        let writes = status_writes(&fx);
        assert_eq!(writes, 2);

        // Updates of a known request do not trigger.
        tx.send(fx.request().await).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(status_writes(&fx), writes);

        // The requested requeue does.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(status_writes(&fx), writes + 1);

        fx.shutdown_tx.send(true).unwrap();
    };

    tokio::join!(controller::run(reconciler, events(rx), fx.shutdown_tx.subscribe()), driver);
}

#[tokio::test(start_paused = true)]
async fn test_failed_reconcile_is_retried() {
    let fx = Fixture::new();
    fx.insert_request(|_| {});
    // No agent image and no pod name: reconcile fails before reading the request.
    let config = lca_agent::Config {
        agent_image: None,
        ..fx.config.clone()
    };
    let reconciler = Arc::new(lca_agent::SeedGenReconciler::new(
        config,
        fx.cluster.clone(),
        fx.connector.clone(),
        fx.exec.clone(),
        fx.health.clone(),
        fx.shutdown_tx.subscribe(),
    ));
    let (tx, rx) = mpsc::unbounded_channel();

    let driver = async {
        tx.send(fx.request().await).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fx.request().await.phase(), Phase::Initial);
        assert!(fx.cluster.journal().is_empty());
        fx.shutdown_tx.send(true).unwrap();
    };

    tokio::join!(controller::run(reconciler, events(rx), fx.shutdown_tx.subscribe()), driver);
}

#[tokio::test]
async fn test_loop_ends_with_the_stream() {
    let fx = Fixture::new();
    let reconciler = Arc::new(fx.reconciler());
    let (tx, rx) = mpsc::unbounded_channel::<SeedGenerator>();
    drop(tx);

    controller::run(reconciler, events(rx), fx.shutdown_tx.subscribe()).await;

    assert!(fx.cluster.journal().is_empty());
}
