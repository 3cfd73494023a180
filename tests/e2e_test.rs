//! End-to-end tests for the full sync workflow.
//!
//! Wires the PostgreSQL record store, the engine, the scheduler and the HTTP
//! router together against a live database named by `DATABASE_URL` and a
//! wiremock downstream service. Tests share the `records` table, so each
//! one holds a lock and starts from an empty table.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    body::Body,
    http::{header, Request},
};
use rowsync_api::{create_router, AppState};
use rowsync_core::{
    models::{Category, Record, RecordCode, SyncState},
    storage::{schema, Storage},
    Clock, TestClock,
};
use rowsync_sync::{
    ClientConfig, Continuation, DeliveryClient, PostgresRecordStore, Scheduler, SyncConfig,
    SyncEngine,
};
use serde_json::{json, Value};
use sqlx::PgPool;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

static TABLE_LOCK: Mutex<()> = Mutex::const_new(());

struct TestEnv {
    _guard: MutexGuard<'static, ()>,
    storage: Arc<Storage>,
    downstream: MockServer,
}

impl TestEnv {
    async fn new(reply: Value) -> Result<Self> {
        let guard = TABLE_LOCK.lock().await;

        let url = std::env::var("DATABASE_URL")?;
        let pool = PgPool::connect(&url).await?;
        schema::ensure_schema(&pool).await?;
        sqlx::query("DELETE FROM records").execute(&pool).await?;

        let downstream = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply))
            .mount(&downstream)
            .await;

        Ok(Self { _guard: guard, storage: Arc::new(Storage::new(pool)), downstream })
    }

    fn engine(&self) -> Result<Arc<SyncEngine>> {
        let client = DeliveryClient::new(ClientConfig {
            endpoint: self.downstream.uri(),
            ..ClientConfig::default()
        })?;
        let store = Arc::new(PostgresRecordStore::new(self.storage.clone()));
        Ok(Arc::new(SyncEngine::new(store, client, SyncConfig::default())?))
    }

    async fn seed(&self, records: &[Record]) -> Result<()> {
        for record in records {
            self.storage.records.create(record).await?;
        }
        Ok(())
    }

    async fn state(&self, code: &str) -> Result<Option<SyncState>> {
        let record = self.storage.records.find_by_code(&RecordCode::from(code)).await?;
        Ok(record.map(|record| record.sync_state))
    }

    async fn count(&self, state: SyncState) -> Result<i64> {
        Ok(self.storage.records.count_by_sync_state(state).await?)
    }
}

fn numbered(prefix: &str, count: usize, category: Category) -> Vec<Record> {
    (0..count)
        .map(|i| Record::pending(format!("{prefix}-{i:03}"), format!("{prefix} {i}"), category))
        .collect()
}

/// A backlog of 25 chefs drains over three committed passes.
#[tokio::test]
#[ignore = "requires PostgreSQL (DATABASE_URL)"]
async fn backlog_drains_page_by_page() -> Result<()> {
    let env = TestEnv::new(json!({"code": 1, "message": "saved"})).await?;
    env.seed(&numbered("C", 25, Category::VillageChef)).await?;
    let engine = env.engine()?;

    let first = engine.run_pass().await?;
    assert_eq!(first.selected, 10);
    assert_eq!(first.continuation, Continuation::Continue);
    assert_eq!(env.state("C-000").await?, Some(SyncState::Synced));
    assert_eq!(env.state("C-010").await?, Some(SyncState::Pending));

    let second = engine.run_pass().await?;
    assert_eq!(second.selected, 10);

    let third = engine.run_pass().await?;
    assert_eq!(third.selected, 5);
    assert_eq!(third.continuation, Continuation::Wait);

    assert_eq!(env.count(SyncState::Synced).await?, 25);
    assert_eq!(env.count(SyncState::Pending).await?, 0);
    Ok(())
}

/// Ineligible rows are never selected and keep their state.
#[tokio::test]
#[ignore = "requires PostgreSQL (DATABASE_URL)"]
async fn ineligible_records_are_left_alone() -> Result<()> {
    let env = TestEnv::new(json!({"code": 1, "message": "saved"})).await?;

    let mut inactive = Record::pending("X-INACTIVE", "inactive", Category::FarmStay);
    inactive.state = 0;
    let mut unaudited = Record::pending("X-UNAUDITED", "unaudited", Category::FarmStay);
    unaudited.audit_state = 1.into();
    let mut foreign = Record::pending("X-FOREIGN", "foreign", Category::FarmStay);
    foreign.category = "restaurant".to_string();
    env.seed(&[inactive, unaudited, foreign, Record::pending("H-1", "ok", Category::FarmStay)])
        .await?;

    let report = env.engine()?.run_pass().await?;

    assert_eq!(report.selected, 1);
    assert_eq!(env.state("H-1").await?, Some(SyncState::Synced));
    for code in ["X-INACTIVE", "X-UNAUDITED", "X-FOREIGN"] {
        assert_eq!(env.state(code).await?, Some(SyncState::Pending));
    }
    Ok(())
}

/// A downstream rejection is committed as `Failed` and never retried.
#[tokio::test]
#[ignore = "requires PostgreSQL (DATABASE_URL)"]
async fn rejected_records_are_not_reselected() -> Result<()> {
    let env = TestEnv::new(json!({"code": 0, "message": "duplicate"})).await?;
    env.seed(&numbered("H", 3, Category::CountryHotel)).await?;
    let engine = env.engine()?;

    let first = engine.run_pass().await?;
    assert_eq!(first.failed, 3);
    assert_eq!(env.count(SyncState::Failed).await?, 3);

    let second = engine.run_pass().await?;
    assert_eq!(second.selected, 0);
    Ok(())
}

/// The HTTP route delivers a record straight from the database.
#[tokio::test]
#[ignore = "requires PostgreSQL (DATABASE_URL)"]
async fn on_demand_route_delivers_from_database() -> Result<()> {
    let env = TestEnv::new(json!({"code": 1, "message": "saved"})).await?;
    env.seed(&[Record::pending("C-1", "chef", Category::VillageChef)]).await?;
    let app = create_router(AppState::new(
        env.engine()?,
        Arc::new(TestClock::new()) as Arc<dyn Clock>,
    ));

    let request = Request::builder()
        .method("POST")
        .uri("/api/records/sync")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("record_code=C-1"))?;
    let response = app.clone().oneshot(request).await?;
    let body: Value =
        serde_json::from_slice(&axum::body::to_bytes(response.into_body(), usize::MAX).await?)?;

    assert_eq!(body["code"], 1);
    assert_eq!(body["data"]["code"], "C-1");
    assert_eq!(env.state("C-1").await?, Some(SyncState::Synced));

    let request = Request::builder().uri("/health").body(Body::empty())?;
    let response = app.oneshot(request).await?;
    assert!(response.status().is_success());
    Ok(())
}

/// The scheduler drains the table in the background and stops on request.
///
/// The first pass takes 14 records and waits; the second takes the last two.
#[tokio::test]
#[ignore = "requires PostgreSQL (DATABASE_URL)"]
async fn scheduler_drains_table() -> Result<()> {
    let env = TestEnv::new(json!({"code": 1, "message": "saved"})).await?;
    env.seed(&numbered("C", 12, Category::VillageChef)).await?;
    env.seed(&numbered("H", 4, Category::FarmStay)).await?;
    let clock = TestClock::new();

    let handle = Scheduler::new(
        env.engine()?,
        Arc::new(clock.clone()) as Arc<dyn Clock>,
        CancellationToken::new(),
    )
    .spawn();

    tokio::time::timeout(Duration::from_secs(10), async {
        while clock.sleep_count() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    handle.shutdown(Duration::from_secs(5)).await?;

    assert_eq!(env.count(SyncState::Synced).await?, 16);
    Ok(())
}
