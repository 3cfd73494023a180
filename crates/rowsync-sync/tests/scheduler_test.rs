//! Tests for the polling scheduler.
//!
//! Uses `TestClock`, so waiting between passes advances virtual time
//! instead of sleeping.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use rowsync_core::{
    models::{Category, Record, SyncState},
    time::{Clock, TestClock},
};
use rowsync_sync::{
    store::mock::MockRecordStore, ClientConfig, DeliveryClient, Scheduler, SyncConfig, SyncEngine,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

async fn accepting_downstream() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 1})))
        .mount(&server)
        .await;
    server
}

fn engine(store: &MockRecordStore, endpoint: String) -> Arc<SyncEngine> {
    let client =
        DeliveryClient::new(ClientConfig { endpoint, ..ClientConfig::default() }).unwrap();
    Arc::new(SyncEngine::new(Arc::new(store.clone()), client, SyncConfig::default()).unwrap())
}

async fn wait_for_sleeps(clock: &TestClock, count: u64) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while clock.sleep_count() < count {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("scheduler did not reach the expected number of waits");
}

/// A drained backlog waits one poll interval between passes.
#[tokio::test]
async fn waits_poll_interval_after_partial_batch() -> Result<()> {
    let server = accepting_downstream().await;
    let store = MockRecordStore::new();
    store.insert(Record::pending("P-1", "p", Category::FarmStay)).await;
    let clock = TestClock::new();
    let engine = engine(&store, server.uri());

    let handle = Scheduler::new(
        engine.clone(),
        Arc::new(clock.clone()) as Arc<dyn Clock>,
        CancellationToken::new(),
    )
    .spawn();
    wait_for_sleeps(&clock, 2).await;
    handle.shutdown(Duration::from_secs(5)).await?;

    assert!(clock.elapsed() >= Duration::from_secs(240));
    assert_eq!(clock.elapsed().as_secs() % 120, 0);
    assert_eq!(store.sync_state("P-1").await, Some(SyncState::Synced));
    assert!(engine.stats().await.passes_completed >= 2);
    Ok(())
}

/// Full pages run back to back until the backlog drains.
#[tokio::test]
async fn full_page_runs_next_pass_immediately() -> Result<()> {
    let server = accepting_downstream().await;
    let store = MockRecordStore::new();
    store
        .insert_all((0..25).map(|i| {
            Record::pending(format!("C-{i:02}"), format!("chef {i}"), Category::VillageChef)
        }))
        .await;
    let clock = TestClock::new();
    let engine = engine(&store, server.uri());

    let handle = Scheduler::new(
        engine.clone(),
        Arc::new(clock.clone()) as Arc<dyn Clock>,
        CancellationToken::new(),
    )
    .spawn();
    wait_for_sleeps(&clock, 1).await;
    handle.shutdown(Duration::from_secs(5)).await?;

    // 10 and 10 continue, 5 waits: three passes before the first sleep.
    let stats = engine.stats().await;
    assert!(stats.passes_completed >= 3);
    assert_eq!(stats.records_synced, 25);
    assert!(store.records().await.iter().all(|record| record.sync_state == SyncState::Synced));
    Ok(())
}

/// A failing pass keeps the cadence and the loop keeps running.
#[tokio::test]
async fn failed_pass_waits_and_retries() -> Result<()> {
    let server = accepting_downstream().await;
    let store = MockRecordStore::new();
    store.fail_begin("database unavailable").await;
    let clock = TestClock::new();
    let engine = engine(&store, server.uri());

    let handle = Scheduler::new(
        engine.clone(),
        Arc::new(clock.clone()) as Arc<dyn Clock>,
        CancellationToken::new(),
    )
    .spawn();
    wait_for_sleeps(&clock, 3).await;
    handle.shutdown(Duration::from_secs(5)).await?;

    assert!(engine.stats().await.passes_failed >= 3);
    assert_eq!(clock.elapsed().as_secs() % 120, 0);
    Ok(())
}

/// A panicking pass is contained and the loop continues.
#[tokio::test]
async fn panicking_pass_does_not_stop_loop() -> Result<()> {
    let server = accepting_downstream().await;
    let store = MockRecordStore::new();
    store.insert(Record::pending("X-1", "x", Category::FarmStay)).await;
    store.panic_on_select().await;
    let clock = TestClock::new();

    let handle = Scheduler::new(
        engine(&store, server.uri()),
        Arc::new(clock.clone()) as Arc<dyn Clock>,
        CancellationToken::new(),
    )
    .spawn();
    wait_for_sleeps(&clock, 2).await;
    assert!(!handle.is_finished());

    store.clear_faults().await;
    let seen = clock.sleep_count();
    wait_for_sleeps(&clock, seen + 2).await;
    handle.shutdown(Duration::from_secs(5)).await?;

    assert_eq!(store.sync_state("X-1").await, Some(SyncState::Synced));
    Ok(())
}

/// Cancelling the token stops the loop while it waits.
#[tokio::test]
async fn cancellation_stops_waiting_loop() -> Result<()> {
    let server = accepting_downstream().await;
    let store = MockRecordStore::new();
    let token = CancellationToken::new();

    let scheduler = Scheduler::new(
        engine(&store, server.uri()),
        Arc::new(rowsync_core::RealClock::new()) as Arc<dyn Clock>,
        token.clone(),
    );
    let handle = scheduler.spawn();

    tokio::time::sleep(Duration::from_millis(100)).await;
    token.cancel();
    handle.shutdown(Duration::from_secs(2)).await?;
    Ok(())
}

/// A pass stuck on a silent downstream cannot stretch shutdown past the
/// shared deadline, even when another wait follows on the same deadline.
#[tokio::test]
async fn stalled_pass_is_abandoned_at_shutdown_deadline() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"code": 1}))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;
    let store = MockRecordStore::new();
    store.insert(Record::pending("H-01", "stay", Category::FarmStay)).await;

    let handle = Scheduler::new(
        engine(&store, server.uri()),
        Arc::new(rowsync_core::RealClock::new()) as Arc<dyn Clock>,
        CancellationToken::new(),
    )
    .spawn();

    tokio::time::timeout(Duration::from_secs(10), async {
        while server.received_requests().await.unwrap_or_default().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    let grace = Duration::from_millis(300);
    let started = tokio::time::Instant::now();
    let deadline = started + grace;

    assert!(handle.shutdown_until(deadline).await.is_err());
    let server_wait = tokio::time::timeout_at(deadline, std::future::pending::<()>()).await;

    assert!(server_wait.is_err());
    assert!(started.elapsed() < grace * 2);
    assert_eq!(store.sync_state("H-01").await, Some(SyncState::Pending));
    Ok(())
}
