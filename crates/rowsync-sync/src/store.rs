//! Store abstraction used by the synchronization engine.
//!
//! The engine only needs a handful of transaction-scoped operations, so they
//! are expressed as object-safe traits. Production code runs them against
//! PostgreSQL through `rowsync_core::storage`; tests use the in-memory
//! [`mock::MockRecordStore`].

use std::{future::Future, pin::Pin, sync::Arc};

use rowsync_core::{
    error::{CoreError, Result},
    models::{CategoryGroup, Record, RecordCode, SyncState},
    storage::{records, Storage},
};
use sqlx::{Postgres, Transaction};

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Entry point to the record store.
pub trait RecordStore: Send + Sync + 'static {
    /// Opens a transaction. Every read and write of a pass or on-demand
    /// invocation goes through it.
    fn begin(&self) -> StoreFuture<'_, Box<dyn StoreTransaction>>;

    /// Checks that the store is reachable.
    fn ping(&self) -> StoreFuture<'_, ()>;
}

/// Operations available inside one store transaction.
///
/// Dropping a transaction without calling [`commit`](Self::commit) discards
/// its writes.
pub trait StoreTransaction: Send {
    /// Returns up to `limit` eligible records of `group`, ordered by code and
    /// locked until the transaction ends.
    fn select_eligible(&mut self, group: CategoryGroup, limit: i64) -> StoreFuture<'_, Vec<Record>>;

    /// Looks up a record by code regardless of its delivery state.
    fn find_record<'a>(&'a mut self, code: &'a RecordCode) -> StoreFuture<'a, Option<Record>>;

    /// Writes `sync_state` for one record.
    ///
    /// A failed write leaves the transaction usable for other records.
    fn update_sync_state<'a>(
        &'a mut self,
        code: &'a RecordCode,
        state: SyncState,
    ) -> StoreFuture<'a, ()>;

    /// Commits all writes.
    fn commit(self: Box<Self>) -> StoreFuture<'static, ()>;

    /// Discards all writes.
    fn rollback(self: Box<Self>) -> StoreFuture<'static, ()>;
}

/// PostgreSQL record store backed by `rowsync_core::storage::Storage`.
#[derive(Clone)]
pub struct PostgresRecordStore {
    storage: Arc<Storage>,
}

impl PostgresRecordStore {
    /// Creates a new PostgreSQL store adapter.
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

impl RecordStore for PostgresRecordStore {
    fn begin(&self) -> StoreFuture<'_, Box<dyn StoreTransaction>> {
        let repository = self.storage.records.clone();
        Box::pin(async move {
            let tx = repository.begin().await?;
            Ok(Box::new(PostgresTransaction { repository, tx }) as Box<dyn StoreTransaction>)
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(self.storage.health_check())
    }
}

struct PostgresTransaction {
    repository: Arc<records::Repository>,
    tx: Transaction<'static, Postgres>,
}

impl StoreTransaction for PostgresTransaction {
    fn select_eligible(
        &mut self,
        group: CategoryGroup,
        limit: i64,
    ) -> StoreFuture<'_, Vec<Record>> {
        Box::pin(async move {
            self.repository.select_pending_in_tx(&mut self.tx, group.categories(), limit).await
        })
    }

    fn find_record<'a>(&'a mut self, code: &'a RecordCode) -> StoreFuture<'a, Option<Record>> {
        Box::pin(async move { self.repository.find_by_code_in_tx(&mut self.tx, code).await })
    }

    fn update_sync_state<'a>(
        &'a mut self,
        code: &'a RecordCode,
        state: SyncState,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.repository.update_sync_state_in_tx(&mut self.tx, code, state).await
        })
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move { self.tx.commit().await.map_err(CoreError::from) })
    }

    fn rollback(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move { self.tx.rollback().await.map_err(CoreError::from) })
    }
}

pub mod mock {
    //! In-memory record store for testing engine logic without a database.
    //!
    //! Transactions stage their writes and apply them only on commit.
    //! Faults can be injected per operation to exercise rollback paths.

    use std::{
        collections::{BTreeMap, HashMap, HashSet},
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    use rowsync_core::{
        error::{CoreError, Result},
        models::{CategoryGroup, Record, RecordCode, SyncState},
    };
    use tokio::sync::RwLock;

    use super::{RecordStore, StoreFuture, StoreTransaction};

    #[derive(Default)]
    struct Faults {
        begin: Option<String>,
        ping: Option<String>,
        select: Option<String>,
        commit: Option<String>,
        update: HashSet<RecordCode>,
        panic_on_select: bool,
    }

    #[derive(Default)]
    struct Counters {
        begins: AtomicUsize,
        commits: AtomicUsize,
        rollbacks: AtomicUsize,
        updates: AtomicUsize,
    }

    /// Mock store holding committed records in memory.
    ///
    /// Clones share state, so a test can keep a handle for assertions while
    /// the engine owns another.
    #[derive(Clone, Default)]
    pub struct MockRecordStore {
        records: Arc<RwLock<BTreeMap<RecordCode, Record>>>,
        faults: Arc<RwLock<Faults>>,
        counters: Arc<Counters>,
    }

    impl MockRecordStore {
        /// Creates an empty store.
        pub fn new() -> Self {
            Self::default()
        }

        /// Inserts or replaces a committed record.
        pub async fn insert(&self, record: Record) {
            self.records.write().await.insert(record.code.clone(), record);
        }

        /// Inserts several committed records.
        pub async fn insert_all(&self, records: impl IntoIterator<Item = Record>) {
            let mut guard = self.records.write().await;
            for record in records {
                guard.insert(record.code.clone(), record);
            }
        }

        /// Returns the committed state of one record.
        pub async fn sync_state(&self, code: &str) -> Option<SyncState> {
            self.records.read().await.get(&RecordCode::from(code)).map(|record| record.sync_state)
        }

        /// Returns all committed records ordered by code.
        pub async fn records(&self) -> Vec<Record> {
            self.records.read().await.values().cloned().collect()
        }

        /// Makes `begin` fail with a database error.
        pub async fn fail_begin(&self, message: impl Into<String>) {
            self.faults.write().await.begin = Some(message.into());
        }

        /// Makes `ping` fail with a database error.
        pub async fn fail_ping(&self, message: impl Into<String>) {
            self.faults.write().await.ping = Some(message.into());
        }

        /// Makes selection fail with a database error.
        pub async fn fail_select(&self, message: impl Into<String>) {
            self.faults.write().await.select = Some(message.into());
        }

        /// Makes selection panic.
        pub async fn panic_on_select(&self) {
            self.faults.write().await.panic_on_select = true;
        }

        /// Makes commit fail with a database error.
        pub async fn fail_commit(&self, message: impl Into<String>) {
            self.faults.write().await.commit = Some(message.into());
        }

        /// Makes state updates for `code` fail.
        pub async fn fail_update(&self, code: &str) {
            self.faults.write().await.update.insert(RecordCode::from(code));
        }

        /// Removes all injected faults.
        pub async fn clear_faults(&self) {
            *self.faults.write().await = Faults::default();
        }

        /// Number of transactions opened.
        pub fn begins(&self) -> usize {
            self.counters.begins.load(Ordering::SeqCst)
        }

        /// Number of transactions committed.
        pub fn commits(&self) -> usize {
            self.counters.commits.load(Ordering::SeqCst)
        }

        /// Number of explicit rollbacks.
        pub fn rollbacks(&self) -> usize {
            self.counters.rollbacks.load(Ordering::SeqCst)
        }

        /// Number of successful state writes, committed or not.
        pub fn updates(&self) -> usize {
            self.counters.updates.load(Ordering::SeqCst)
        }
    }

    impl RecordStore for MockRecordStore {
        fn begin(&self) -> StoreFuture<'_, Box<dyn StoreTransaction>> {
            Box::pin(async move {
                if let Some(message) = &self.faults.read().await.begin {
                    return Err(CoreError::Database(message.clone()));
                }
                self.counters.begins.fetch_add(1, Ordering::SeqCst);

                Ok(Box::new(MockTransaction { store: self.clone(), staged: HashMap::new() })
                    as Box<dyn StoreTransaction>)
            })
        }

        fn ping(&self) -> StoreFuture<'_, ()> {
            Box::pin(async move {
                match &self.faults.read().await.ping {
                    Some(message) => Err(CoreError::Database(message.clone())),
                    None => Ok(()),
                }
            })
        }
    }

    struct MockTransaction {
        store: MockRecordStore,
        staged: HashMap<RecordCode, SyncState>,
    }

    impl MockTransaction {
        fn overlay(&self, record: &Record) -> Record {
            let mut view = record.clone();
            if let Some(state) = self.staged.get(&record.code) {
                view.sync_state = *state;
            }
            view
        }
    }

    impl StoreTransaction for MockTransaction {
        fn select_eligible(
            &mut self,
            group: CategoryGroup,
            limit: i64,
        ) -> StoreFuture<'_, Vec<Record>> {
            Box::pin(async move {
                {
                    let faults = self.store.faults.read().await;
                    if faults.panic_on_select {
                        panic!("injected selection panic");
                    }
                    if let Some(message) = &faults.select {
                        return Err(CoreError::Database(message.clone()));
                    }
                }
                let limit = usize::try_from(limit).map_err(|_| {
                    CoreError::InvalidInput(format!("negative selection limit: {limit}"))
                })?;

                let records = self.store.records.read().await;
                Ok(records
                    .values()
                    .map(|record| self.overlay(record))
                    .filter(|record| record.is_eligible_in(group))
                    .take(limit)
                    .collect())
            })
        }

        fn find_record<'a>(&'a mut self, code: &'a RecordCode) -> StoreFuture<'a, Option<Record>> {
            Box::pin(async move {
                let records = self.store.records.read().await;
                Ok(records.get(code).map(|record| self.overlay(record)))
            })
        }

        fn update_sync_state<'a>(
            &'a mut self,
            code: &'a RecordCode,
            state: SyncState,
        ) -> StoreFuture<'a, ()> {
            Box::pin(async move {
                if self.store.faults.read().await.update.contains(code) {
                    return Err(CoreError::Database(format!("injected update failure for {code}")));
                }
                if !self.store.records.read().await.contains_key(code) {
                    return Err(CoreError::NotFound(format!("record {code}")));
                }
                self.staged.insert(code.clone(), state);
                self.store.counters.updates.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }

        fn commit(self: Box<Self>) -> StoreFuture<'static, ()> {
            Box::pin(async move {
                if let Some(message) = &self.store.faults.read().await.commit {
                    return Err(CoreError::Database(message.clone()));
                }
                let mut records = self.store.records.write().await;
                for (code, state) in &self.staged {
                    if let Some(record) = records.get_mut(code) {
                        record.sync_state = *state;
                    }
                }
                self.store.counters.commits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }

        fn rollback(self: Box<Self>) -> StoreFuture<'static, ()> {
            Box::pin(async move {
                self.store.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use rowsync_core::models::Category;

    use super::{mock::MockRecordStore, *};

    #[tokio::test]
    async fn mock_commit_applies_staged_updates() {
        let store = MockRecordStore::new();
        store.insert(Record::pending("A-1", "A", Category::FarmStay)).await;

        let mut tx = store.begin().await.unwrap();
        tx.update_sync_state(&RecordCode::from("A-1"), SyncState::Synced).await.unwrap();
        assert_eq!(store.sync_state("A-1").await, Some(SyncState::Pending));

        tx.commit().await.unwrap();
        assert_eq!(store.sync_state("A-1").await, Some(SyncState::Synced));
    }

    #[tokio::test]
    async fn mock_rollback_and_drop_discard_updates() {
        let store = MockRecordStore::new();
        store.insert(Record::pending("A-1", "A", Category::FarmStay)).await;

        let mut tx = store.begin().await.unwrap();
        tx.update_sync_state(&RecordCode::from("A-1"), SyncState::Failed).await.unwrap();
        tx.rollback().await.unwrap();

        let mut dropped = store.begin().await.unwrap();
        dropped.update_sync_state(&RecordCode::from("A-1"), SyncState::Failed).await.unwrap();
        drop(dropped);

        assert_eq!(store.sync_state("A-1").await, Some(SyncState::Pending));
        assert_eq!(store.rollbacks(), 1);
        assert_eq!(store.commits(), 0);
    }

    #[tokio::test]
    async fn mock_selection_sees_own_staged_updates() {
        let store = MockRecordStore::new();
        store
            .insert_all([
                Record::pending("A-1", "A", Category::VillageChef),
                Record::pending("A-2", "B", Category::VillageChef),
            ])
            .await;

        let mut tx = store.begin().await.unwrap();
        tx.update_sync_state(&RecordCode::from("A-1"), SyncState::Synced).await.unwrap();
        let selected = tx.select_eligible(CategoryGroup::Chefs, 10).await.unwrap();

        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].code, RecordCode::from("A-2"));
    }

    #[tokio::test]
    async fn mock_update_of_unknown_record_is_not_found() {
        let store = MockRecordStore::new();

        let mut tx = store.begin().await.unwrap();
        let err = tx.update_sync_state(&RecordCode::from("nope"), SyncState::Synced).await;

        assert!(matches!(err, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn postgres_store_reports_unreachable_database() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .acquire_timeout(std::time::Duration::from_millis(500))
            .connect_lazy("postgresql://127.0.0.1:1/rowsync")
            .unwrap();
        let store = PostgresRecordStore::new(Arc::new(Storage::new(pool)));

        assert!(store.ping().await.is_err());
    }
}
