// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workload client tests against a stand-in coordinator.

mod common;

use std::time::Duration;

use circulation_actors::{FailoverLink, Workload, WorkloadClient, WorkloadConfig, WorkloadSummary};
use circulation_protocol::Envelope;

use common::{FakeStorage, codec, dead_endpoint, spawn_server};

fn fast_config() -> WorkloadConfig {
    WorkloadConfig {
        retry_backoff: Duration::from_millis(20),
        pause: Duration::from_millis(5),
        max_rounds: Some(2),
    }
}

#[tokio::test]
async fn test_workload_runs_through_coordinator_list() {
    let coordinator = FakeStorage::new();
    let server = spawn_server(coordinator.clone()).await;

    let workload = Workload::parse(
        "# smoke test\nLOAN,B1,U1,BK1\nbad line\nRENEW,B1,U1,BK1\nRETURN,B1,U1,BK1\n",
    );
    assert_eq!(workload.rejected.len(), 1);

    let link = FailoverLink::with_timeout(
        "coordinator",
        vec![dead_endpoint().await, server.endpoint.clone()],
        Duration::from_millis(500),
    );
    let mut client = WorkloadClient::new(codec(), link, fast_config());

    let summary = client.run(&workload.requests).await;
    assert_eq!(
        summary,
        WorkloadSummary {
            succeeded: 3,
            failed: 0,
            undelivered: 0
        }
    );
    assert_eq!(
        coordinator.received(),
        vec![
            Envelope::loan("B1", "U1", "BK1"),
            Envelope::renew("B1", "U1", "BK1"),
            Envelope::return_book("B1", "U1", "BK1"),
        ]
    );
}

#[tokio::test]
async fn test_failed_results_are_counted() {
    let server = spawn_server(FakeStorage::refusing("no copies available")).await;
    let link = FailoverLink::with_timeout(
        "coordinator",
        vec![server.endpoint.clone()],
        Duration::from_millis(500),
    );
    let mut client = WorkloadClient::new(codec(), link, fast_config());

    let result = client.submit(&Envelope::loan("B1", "U1", "BK1")).await.unwrap();
    assert!(!result.ok);
    assert_eq!(result.message, "no copies available");
}

#[tokio::test]
async fn test_unreachable_coordinators_are_retried() {
    let link = FailoverLink::with_timeout(
        "coordinator",
        vec![dead_endpoint().await],
        Duration::from_millis(200),
    );
    let mut client = WorkloadClient::new(codec(), link, fast_config());

    let started = tokio::time::Instant::now();
    assert!(client.submit(&Envelope::loan("B1", "U1", "BK1")).await.is_none());
    // Two passes with one backoff in between.
    assert!(started.elapsed() >= Duration::from_millis(20));
}
