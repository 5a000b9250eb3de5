//! Memory fabric end-to-end scenarios: round-trip laws, promotion under
//! pressure, invalidation visibility and outbox retry routing.

use std::time::Duration;

use serde_json::json;
use telos_core::{
    AccessPattern, OutboxOperation, StoreOptions, TierKind,
};
use telos_e2e_tests::harness::TestCore;

fn frequent() -> StoreOptions {
    StoreOptions {
        access_pattern: AccessPattern::Frequent,
        ..Default::default()
    }
}

#[tokio::test]
async fn store_then_retrieve_returns_the_value() {
    let h = TestCore::open();
    let fabric = h.core.fabric();
    let value = json!({ "body": "round trip" });

    fabric.store("law-1", value.clone(), frequent()).await.unwrap();
    assert_eq!(fabric.retrieve("law-1").await.unwrap(), Some(value));
}

#[tokio::test]
async fn promotion_under_pressure() {
    let h = TestCore::open();
    let fabric = h.core.fabric();
    let value = json!({ "doc": "hot document" });

    // Frequent small store lands in L1
    let receipt = fabric.store("doc42", value.clone(), frequent()).await.unwrap();
    assert_eq!(receipt.tier, TierKind::L1);

    // 120 consecutive reads stay L1 hits
    for _ in 0..120 {
        assert_eq!(fabric.retrieve("doc42").await.unwrap(), Some(value.clone()));
        assert_eq!(fabric.tier_of("doc42").unwrap(), Some(TierKind::L1));
    }
    let stats = fabric.stats().unwrap();
    assert_eq!(stats.l1_telemetry.hits, 120);

    // After a sync pass an L2-only reader observes the entry
    fabric.sync_once().unwrap();
    assert!(fabric.resident_in("doc42", TierKind::L2).unwrap());
}

#[tokio::test]
async fn l2_entry_promotes_to_l1_past_threshold() {
    let h = TestCore::serving();
    let fabric = h.core.fabric();

    // Cold store lands in L2
    let receipt = fabric
        .store("warming", json!({"v": 1}), StoreOptions::default())
        .await
        .unwrap();
    assert_eq!(receipt.tier, TierKind::L2);

    // Reads past the promotion threshold (default 100) trigger promotion
    for _ in 0..120 {
        fabric.retrieve("warming").await.unwrap();
    }

    // The background processor applies the promote event
    let mut promoted = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if fabric.resident_in("warming", TierKind::L1).unwrap() {
            promoted = true;
            break;
        }
    }
    assert!(promoted, "entry never promoted to L1");

    h.core.shutdown().await.unwrap();
}

#[tokio::test]
async fn invalidate_is_eventually_empty() {
    let h = TestCore::serving();
    let fabric = h.core.fabric();

    fabric
        .store("doomed", json!({"v": 1}), frequent())
        .await
        .unwrap();
    // Let the store event replicate to L3 first
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(fabric.resident_in("doomed", TierKind::L3).unwrap());

    fabric.invalidate("doomed").unwrap();

    let mut gone = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if fabric.retrieve("doomed").await.unwrap().is_none() {
            gone = true;
            break;
        }
    }
    assert!(gone, "invalidated key still retrievable");

    h.core.shutdown().await.unwrap();
}

#[tokio::test]
async fn poison_event_reaches_dead_letter_after_three_attempts() {
    let h = TestCore::open();
    let fabric = h.core.fabric();

    let id = fabric
        .outbox()
        .enqueue(
            OutboxOperation::Store,
            json!({ "key": "poisoned", "tag": "poison" }),
        )
        .unwrap();

    // First two attempts reschedule onto the retry queue
    for expected in 1..3u32 {
        fabric.process_outbox_once().unwrap();
        let (_, retries, dead) = fabric.outbox().locate(id).unwrap().unwrap();
        assert_eq!(retries, expected);
        assert!(!dead);
    }

    // Third attempt dead-letters
    fabric.process_outbox_once().unwrap();
    let (_, retries, dead) = fabric.outbox().locate(id).unwrap().unwrap();
    assert_eq!(retries, 3);
    assert!(dead);

    let depths = fabric.outbox().depths().unwrap();
    assert_eq!(depths.pending, 0);
    assert_eq!(depths.retry, 0);
    assert_eq!(depths.dead_letter, 1);
    assert!(fabric.outbox().audit_conservation().unwrap());
}

#[tokio::test]
async fn newer_write_always_wins() {
    let h = TestCore::open();
    let fabric = h.core.fabric();

    fabric
        .store("contested", json!({"v": "first"}), frequent())
        .await
        .unwrap();
    fabric
        .store("contested", json!({"v": "second"}), frequent())
        .await
        .unwrap();
    fabric.process_outbox_once().unwrap();
    fabric.sync_once().unwrap();

    assert_eq!(
        fabric.retrieve("contested").await.unwrap(),
        Some(json!({"v": "second"}))
    );
    // Every tier converged on the newer write
    let l3 = fabric.object_store();
    assert_eq!(
        l3.retrieve("contested").unwrap().unwrap().object,
        json!({"v": "second"})
    );
}

#[tokio::test]
async fn l2_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = telos_core::CoreConfig::new(dir.path()).with_fast_intervals();

    {
        let core = telos_core::CoreContext::open(config.clone()).unwrap();
        core.fabric()
            .store("durable", json!({"v": 7}), StoreOptions::default())
            .await
            .unwrap();
        core.fabric().sync_once().unwrap();
    }

    let reopened = telos_core::CoreContext::open(config).unwrap();
    assert!(reopened
        .fabric()
        .resident_in("durable", TierKind::L2)
        .unwrap());
    assert_eq!(
        reopened.fabric().retrieve("durable").await.unwrap(),
        Some(json!({"v": 7}))
    );
}
