// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for primary/secondary routing.

mod common;

use std::sync::Arc;

use circulation_storage::persistence::CirculationStore;
use circulation_storage::router::{DatabaseRole, DatabaseRouter};

use common::{copies, memory_store};

#[tokio::test]
async fn test_router_targets_follow_the_flag() {
    let primary = memory_store().await;
    let secondary = memory_store().await;
    primary.upsert_inventory("B1", "BK1", 1).await.unwrap();
    secondary.upsert_inventory("B1", "BK1", 9).await.unwrap();

    let router = DatabaseRouter::new(primary, secondary);
    assert!(router.is_primary_up());
    assert_eq!(router.current_role(), DatabaseRole::Primary);
    assert_eq!(copies(router.current_write().as_ref(), "B1", "BK1").await, 1);

    assert!(router.switch_to_secondary());
    assert_eq!(router.current_role(), DatabaseRole::Secondary);
    assert_eq!(copies(router.current_write().as_ref(), "B1", "BK1").await, 9);
    assert_eq!(copies(router.current_read().as_ref(), "B1", "BK1").await, 9);

    // The explicit handles never move.
    assert_eq!(copies(router.primary().as_ref(), "B1", "BK1").await, 1);
    assert_eq!(copies(router.secondary().as_ref(), "B1", "BK1").await, 9);
}

#[tokio::test]
async fn test_switches_are_idempotent() {
    let router = DatabaseRouter::new(memory_store().await, memory_store().await);

    assert!(!router.switch_to_primary());
    assert!(router.switch_to_secondary());
    assert!(!router.switch_to_secondary());
    assert!(router.switch_to_primary());
    assert!(!router.switch_to_primary());
    assert_eq!(DatabaseRole::Secondary.to_string(), "secondary");
    assert!(format!("{router:?}").contains("Primary"));
}

#[tokio::test]
async fn test_concurrent_failover_flips_once() {
    let router = Arc::new(DatabaseRouter::new(
        memory_store().await,
        memory_store().await,
    ));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let router = router.clone();
            tokio::spawn(async move { router.switch_to_secondary() })
        })
        .collect();

    let mut flips = 0;
    for handle in handles {
        if handle.await.unwrap() {
            flips += 1;
        }
    }
    assert_eq!(flips, 1);
    assert!(!router.is_primary_up());
}
