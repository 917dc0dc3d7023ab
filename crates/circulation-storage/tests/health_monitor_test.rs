// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the primary health monitor and its failback policies.

mod common;

use std::sync::Arc;
use std::time::Duration;

use circulation_storage::health_monitor::{
    FailbackPolicy, HealthCheck, HealthMonitor, HealthMonitorConfig,
};
use circulation_storage::router::{DatabaseRole, DatabaseRouter};

use common::{SwitchableStore, eventually, memory_store};

async fn setup(failback: FailbackPolicy) -> (Arc<SwitchableStore>, Arc<DatabaseRouter>, HealthMonitor) {
    let primary = Arc::new(SwitchableStore::new(memory_store().await));
    let secondary = memory_store().await;
    let router = Arc::new(DatabaseRouter::new(primary.clone(), secondary));
    let config = HealthMonitorConfig {
        interval: Duration::from_millis(20),
        check_timeout: Duration::from_millis(500),
        failback,
    };
    let monitor = HealthMonitor::new(router.clone(), config);
    (primary, router, monitor)
}

#[test]
fn test_failback_policy_parsing() {
    assert_eq!("manual".parse::<FailbackPolicy>(), Ok(FailbackPolicy::Manual));
    assert_eq!(
        "Automatic".parse::<FailbackPolicy>(),
        Ok(FailbackPolicy::Automatic)
    );
    assert_eq!("auto".parse::<FailbackPolicy>(), Ok(FailbackPolicy::Automatic));
    assert!("never".parse::<FailbackPolicy>().is_err());
    assert_eq!(FailbackPolicy::default(), FailbackPolicy::Manual);
    assert_eq!(
        HealthMonitorConfig::default().interval,
        Duration::from_millis(1500)
    );
}

#[tokio::test]
async fn test_healthy_primary_stays_authoritative() {
    let (_primary, router, monitor) = setup(FailbackPolicy::Manual).await;

    assert_eq!(monitor.check_primary().await, HealthCheck::PrimaryHealthy);
    assert_eq!(router.current_role(), DatabaseRole::Primary);
}

#[tokio::test]
async fn test_failed_check_switches_once() {
    let (primary, router, monitor) = setup(FailbackPolicy::Manual).await;
    primary.set_down(true);

    assert_eq!(
        monitor.check_primary().await,
        HealthCheck::PrimaryFailed { switched: true }
    );
    assert_eq!(router.current_role(), DatabaseRole::Secondary);

    assert_eq!(
        monitor.check_primary().await,
        HealthCheck::PrimaryFailed { switched: false }
    );
    assert_eq!(router.current_role(), DatabaseRole::Secondary);
}

#[tokio::test]
async fn test_manual_failback_keeps_secondary() {
    let (primary, router, monitor) = setup(FailbackPolicy::Manual).await;
    primary.set_down(true);
    monitor.check_primary().await;

    primary.set_down(false);
    for _ in 0..3 {
        assert_eq!(
            monitor.check_primary().await,
            HealthCheck::PrimaryRecovered { failed_back: false }
        );
    }
    assert_eq!(router.current_role(), DatabaseRole::Secondary);

    // An operator can still fail back explicitly.
    assert!(router.switch_to_primary());
    assert_eq!(monitor.check_primary().await, HealthCheck::PrimaryHealthy);
}

#[tokio::test]
async fn test_automatic_failback_restores_primary() {
    let (primary, router, monitor) = setup(FailbackPolicy::Automatic).await;
    primary.set_down(true);
    monitor.check_primary().await;
    assert_eq!(router.current_role(), DatabaseRole::Secondary);

    primary.set_down(false);
    assert_eq!(
        monitor.check_primary().await,
        HealthCheck::PrimaryRecovered { failed_back: true }
    );
    assert_eq!(router.current_role(), DatabaseRole::Primary);
}

#[tokio::test]
async fn test_run_loop_detects_failure_and_stops() {
    let (primary, router, monitor) = setup(FailbackPolicy::Automatic).await;
    let monitor = Arc::new(monitor);
    let shutdown = monitor.shutdown_handle();

    let running = monitor.clone();
    let handle = tokio::spawn(async move {
        running.run().await;
    });

    primary.set_down(true);
    let switched = eventually(Duration::from_secs(2), || {
        let router = router.clone();
        async move { router.current_role() == DatabaseRole::Secondary }
    })
    .await;
    assert!(switched, "monitor never failed over");

    primary.set_down(false);
    let restored = eventually(Duration::from_secs(2), || {
        let router = router.clone();
        async move { router.current_role() == DatabaseRole::Primary }
    })
    .await;
    assert!(restored, "monitor never failed back");

    shutdown.notify_one();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("monitor did not stop")
        .unwrap();
}
