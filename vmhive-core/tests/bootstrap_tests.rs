//! Cluster database bootstrap across a rolling upgrade

mod common;

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use common::TestNodeBuilder;
use vmhive_core::{
    cluster::{BootstrapState, ClusterDatabaseBootstrapper},
    error::HiveError,
    test_helpers::{wait_for_condition, MockGateway},
};

fn nodes_behind() -> HiveError {
    HiveError::SomeNodesBehind {
        details: "member 3 runs schema 71".into(),
    }
}

fn bootstrapper(gateway: Arc<MockGateway>) -> ClusterDatabaseBootstrapper {
    ClusterDatabaseBootstrapper::new(
        gateway,
        Duration::from_secs(1),
        Duration::from_millis(20),
        Duration::from_secs(1),
    )
}

#[tokio::test]
async fn test_degraded_mode_keeps_heartbeating_until_notified() {
    let gateway = Arc::new(MockGateway::default());
    gateway.script_open(vec![Err(nodes_behind())]);
    let bootstrapper = bootstrapper(gateway.clone());
    let mut states = bootstrapper.subscribe();
    let shutdown = CancellationToken::new();

    let run = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { bootstrapper.run(&shutdown).await.map(|_| ()) })
    };

    states
        .wait_for(|s| matches!(s, BootstrapState::DegradedWait { attempt: 1 }))
        .await
        .unwrap();
    wait_for_condition(
        || {
            let gateway = gateway.clone();
            async move { gateway.heartbeat_rounds() >= 3 }
        },
        Duration::from_secs(2),
        Duration::from_millis(10),
    )
    .await
    .unwrap();
    assert_eq!(gateway.open_attempts(), 1);

    gateway.send_upgrade_notification();
    run.await.unwrap().unwrap();

    assert_eq!(*states.borrow(), BootstrapState::Open);
    assert_eq!(gateway.open_attempts(), 2);
    assert_eq!(gateway.upgrade_notifications_sent(), 1);

    // The throwaway heartbeat group is gone once the database is open
    let rounds = gateway.heartbeat_rounds();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(gateway.heartbeat_rounds(), rounds);
}

#[tokio::test]
async fn test_repeated_skew_waits_again() {
    let gateway = Arc::new(MockGateway::default());
    gateway.script_open(vec![Err(nodes_behind()), Err(nodes_behind())]);
    let bootstrapper = bootstrapper(gateway.clone());
    let mut states = bootstrapper.subscribe();

    let run = tokio::spawn(async move { bootstrapper.run(&CancellationToken::new()).await.map(|_| ()) });

    states
        .wait_for(|s| matches!(s, BootstrapState::DegradedWait { attempt: 1 }))
        .await
        .unwrap();
    gateway.send_upgrade_notification();

    states
        .wait_for(|s| matches!(s, BootstrapState::DegradedWait { attempt: 2 }))
        .await
        .unwrap();
    gateway.send_upgrade_notification();

    run.await.unwrap().unwrap();
    assert_eq!(gateway.open_attempts(), 3);
}

#[tokio::test]
async fn test_shutdown_during_degraded_wait() {
    let gateway = Arc::new(MockGateway::default());
    gateway.script_open(vec![Err(nodes_behind())]);
    let bootstrapper = bootstrapper(gateway.clone());
    let mut states = bootstrapper.subscribe();
    let shutdown = CancellationToken::new();

    let run = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { bootstrapper.run(&shutdown).await.map(|_| ()) })
    };

    states
        .wait_for(|s| matches!(s, BootstrapState::DegradedWait { .. }))
        .await
        .unwrap();
    shutdown.cancel();

    let result = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("bootstrap ignored shutdown")
        .unwrap();
    assert!(matches!(result, Err(HiveError::Cancelled { .. })));
    assert!(matches!(*states.borrow(), BootstrapState::Failed(_)));
    assert_eq!(gateway.open_attempts(), 1);
}

#[tokio::test]
async fn test_daemon_start_reports_degraded_bootstrap() {
    let node = TestNodeBuilder::new().clustered().build();
    node.gateway.script_open(vec![Err(nodes_behind())]);

    let daemon = Arc::new(node.daemon);
    let starting = {
        let daemon = daemon.clone();
        tokio::spawn(async move { daemon.start().await })
    };

    wait_for_condition(
        || {
            let daemon = daemon.clone();
            async move { matches!(daemon.bootstrap_state(), Some(BootstrapState::DegradedWait { .. })) }
        },
        Duration::from_secs(2),
        Duration::from_millis(10),
    )
    .await
    .unwrap();

    // Not serving yet: setup has not completed
    assert!(!daemon.state().signals().setup_complete.is_set());

    node.gateway.send_upgrade_notification();
    starting.await.unwrap().unwrap();

    assert_eq!(daemon.bootstrap_state(), Some(BootstrapState::Open));
    assert!(daemon.state().signals().ready.is_set());
    assert!(daemon.cluster_tasks_running());
}
