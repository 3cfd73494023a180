//! Integration tests for the records repository.
//!
//! These run against a live PostgreSQL instance named by `DATABASE_URL`.
//! Every test works inside a transaction that is rolled back at the end, and
//! clears the table inside that transaction first so committed rows from
//! elsewhere cannot skew selection counts.

use rowsync_core::{
    models::{Category, CategoryGroup, Record, RecordCode, SyncState},
    storage::{schema, Storage},
    CoreError,
};
use sqlx::{PgPool, Postgres, Transaction};

async fn storage() -> Storage {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPool::connect(&url).await.unwrap();
    schema::ensure_schema(&pool).await.unwrap();
    Storage::new(pool)
}

async fn clean_tx(storage: &Storage) -> Transaction<'static, Postgres> {
    let mut tx = storage.records.begin().await.unwrap();
    sqlx::query("DELETE FROM records").execute(&mut *tx).await.unwrap();
    tx
}

async fn seed(storage: &Storage, tx: &mut Transaction<'_, Postgres>, records: &[Record]) {
    for record in records {
        storage.records.create_in_tx(tx, record).await.unwrap();
    }
}

fn numbered(prefix: &str, count: usize, category: Category) -> Vec<Record> {
    (0..count)
        .map(|i| Record::pending(format!("{prefix}-{i:03}"), format!("{prefix} {i}"), category))
        .collect()
}

#[tokio::test]
#[ignore = "requires PostgreSQL (DATABASE_URL)"]
async fn health_check_succeeds() {
    let storage = storage().await;

    assert!(storage.health_check().await.is_ok());
}

/// Created records read back with the same column values.
#[tokio::test]
#[ignore = "requires PostgreSQL (DATABASE_URL)"]
async fn create_then_find_round_trips_columns() {
    let storage = storage().await;
    let mut tx = clean_tx(&storage).await;

    let mut record = Record::pending("RT-1", "Round Trip", Category::VillageChef);
    record.province = "Yunnan".to_string().into();
    record.banquet_count = 7.into();
    seed(&storage, &mut tx, &[record.clone()]).await;

    let found = storage.records.find_by_code_in_tx(&mut tx, &record.code).await.unwrap();

    assert_eq!(found, Some(record));
    tx.rollback().await.unwrap();
}

#[tokio::test]
#[ignore = "requires PostgreSQL (DATABASE_URL)"]
async fn duplicate_code_is_a_constraint_violation() {
    let storage = storage().await;
    let mut tx = clean_tx(&storage).await;
    let record = Record::pending("DUP-1", "First", Category::FarmStay);
    seed(&storage, &mut tx, &[record.clone()]).await;

    let err = storage.records.create_in_tx(&mut tx, &record).await.unwrap_err();

    assert!(matches!(err, CoreError::ConstraintViolation(_)));
}

/// Selection returns only eligible rows of the requested categories.
#[tokio::test]
#[ignore = "requires PostgreSQL (DATABASE_URL)"]
async fn selection_applies_eligibility_predicate() {
    let storage = storage().await;
    let mut tx = clean_tx(&storage).await;

    let eligible = Record::pending("SEL-1", "Eligible", Category::FarmStay);
    let mut synced = Record::pending("SEL-2", "Synced", Category::FarmStay);
    synced.sync_state = SyncState::Synced;
    let mut inactive = Record::pending("SEL-3", "Inactive", Category::CountryHotel);
    inactive.state = 0;
    let mut unaudited = Record::pending("SEL-4", "Unaudited", Category::CountryHotel);
    unaudited.audit_state = rowsync_core::Nullable::absent();
    let other_group = Record::pending("SEL-5", "Chef", Category::VillageChef);
    let mut unsupported = Record::pending("SEL-6", "Restaurant", Category::FarmStay);
    unsupported.category = "restaurant".to_string();

    seed(&storage, &mut tx, &[eligible, synced, inactive, unaudited, other_group, unsupported])
        .await;

    let selected = storage
        .records
        .select_pending_in_tx(&mut tx, CategoryGroup::Hospitality.categories(), 10)
        .await
        .unwrap();

    let codes: Vec<_> = selected.iter().map(|record| record.code.as_str()).collect();
    assert_eq!(codes, vec!["SEL-1"]);
    tx.rollback().await.unwrap();
}

/// Selection stops at the limit and orders by code.
#[tokio::test]
#[ignore = "requires PostgreSQL (DATABASE_URL)"]
async fn selection_is_capped_and_ordered() {
    let storage = storage().await;
    let mut tx = clean_tx(&storage).await;
    seed(&storage, &mut tx, &numbered("CAP", 13, Category::VillageChef)).await;

    let selected = storage
        .records
        .select_pending_in_tx(&mut tx, CategoryGroup::Chefs.categories(), 10)
        .await
        .unwrap();

    assert_eq!(selected.len(), 10);
    assert_eq!(selected[0].code, RecordCode::from("CAP-000"));
    assert_eq!(selected[9].code, RecordCode::from("CAP-009"));
    tx.rollback().await.unwrap();
}

#[tokio::test]
#[ignore = "requires PostgreSQL (DATABASE_URL)"]
async fn negative_limit_is_invalid_input() {
    let storage = storage().await;
    let mut tx = clean_tx(&storage).await;

    let err = storage
        .records
        .select_pending_in_tx(&mut tx, CategoryGroup::Chefs.categories(), -1)
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::InvalidInput(_)));
}

/// An updated record leaves the pending set within the same transaction.
#[tokio::test]
#[ignore = "requires PostgreSQL (DATABASE_URL)"]
async fn update_sync_state_removes_record_from_selection() {
    let storage = storage().await;
    let mut tx = clean_tx(&storage).await;
    seed(&storage, &mut tx, &numbered("UPD", 2, Category::CountryHotel)).await;

    storage
        .records
        .update_sync_state_in_tx(&mut tx, &RecordCode::from("UPD-000"), SyncState::Synced)
        .await
        .unwrap();

    let selected = storage
        .records
        .select_pending_in_tx(&mut tx, CategoryGroup::Hospitality.categories(), 10)
        .await
        .unwrap();
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].code, RecordCode::from("UPD-001"));

    let updated =
        storage.records.find_by_code_in_tx(&mut tx, &RecordCode::from("UPD-000")).await.unwrap();
    assert_eq!(updated.map(|record| record.sync_state), Some(SyncState::Synced));
    tx.rollback().await.unwrap();
}

/// A failed update leaves the surrounding transaction usable.
#[tokio::test]
#[ignore = "requires PostgreSQL (DATABASE_URL)"]
async fn failed_update_does_not_poison_transaction() {
    let storage = storage().await;
    let mut tx = clean_tx(&storage).await;
    seed(&storage, &mut tx, &numbered("SP", 1, Category::FarmStay)).await;

    let missing = storage
        .records
        .update_sync_state_in_tx(&mut tx, &RecordCode::from("SP-missing"), SyncState::Failed)
        .await;
    assert!(matches!(missing, Err(CoreError::NotFound(_))));

    storage
        .records
        .update_sync_state_in_tx(&mut tx, &RecordCode::from("SP-000"), SyncState::Synced)
        .await
        .unwrap();
    tx.rollback().await.unwrap();
}
