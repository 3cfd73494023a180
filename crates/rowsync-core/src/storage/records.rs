//! Repository for record database operations.
//!
//! Selection and state updates are transaction-scoped so one delivery pass
//! holds row locks on its whole batch until it commits.

use std::sync::Arc;

use sqlx::{Connection, Executor, PgPool, Postgres, Transaction};

use crate::{
    error::{CoreError, Result},
    models::{Category, Record, RecordCode, SyncState, ACTIVE_STATE, APPROVED_AUDIT_STATE},
};

const RECORD_COLUMNS: &str = "code, name, mobile_phone, category, state, audit_state, sync_state, \
     company_name, login_name, id_card, sex, birthday, province, city, area, town, village, \
     address, logo_url, business_license_url, food_license_url, health_certificate_url, \
     health_certificate_due, level, banquet_count, report_count, register_source, created_at";

/// Repository for the `records` table.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Begins a transaction on the shared pool.
    ///
    /// # Errors
    ///
    /// Returns error if no connection can be acquired.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    /// Inserts a record.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::ConstraintViolation` if the code already exists.
    pub async fn create(&self, record: &Record) -> Result<RecordCode> {
        self.create_impl(&*self.pool, record).await
    }

    /// Inserts a record within a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails.
    pub async fn create_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        record: &Record,
    ) -> Result<RecordCode> {
        self.create_impl(&mut **tx, record).await
    }

    async fn create_impl<'e, E>(&self, executor: E, record: &Record) -> Result<RecordCode>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sql = format!(
            "INSERT INTO records ({RECORD_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, \
             $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, \
             $26, $27, $28) RETURNING code"
        );

        let code = sqlx::query_scalar(&sql)
            .bind(&record.code)
            .bind(&record.name)
            .bind(&record.mobile_phone)
            .bind(&record.category)
            .bind(record.state)
            .bind(record.audit_state.as_option())
            .bind(record.sync_state)
            .bind(record.company_name.as_option())
            .bind(record.login_name.as_option())
            .bind(record.id_card.as_option())
            .bind(record.sex.as_option())
            .bind(record.birthday.as_option())
            .bind(record.province.as_option())
            .bind(record.city.as_option())
            .bind(record.area.as_option())
            .bind(record.town.as_option())
            .bind(record.village.as_option())
            .bind(record.address.as_option())
            .bind(record.logo_url.as_option())
            .bind(record.business_license_url.as_option())
            .bind(record.food_license_url.as_option())
            .bind(record.health_certificate_url.as_option())
            .bind(record.health_certificate_due.as_option())
            .bind(record.level.as_option())
            .bind(record.banquet_count.as_option())
            .bind(record.report_count.as_option())
            .bind(record.register_source.as_option())
            .bind(record.created_at.as_option())
            .fetch_one(executor)
            .await?;

        Ok(code)
    }

    /// Finds a record by code.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_code(&self, code: &RecordCode) -> Result<Option<Record>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE code = $1");

        let record =
            sqlx::query_as::<_, Record>(&sql).bind(code).fetch_optional(&*self.pool).await?;

        Ok(record)
    }

    /// Finds a record by code and locks its row until the transaction ends.
    ///
    /// The lookup ignores `sync_state`, so a `Synced` or `Failed` record is
    /// returned as well.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_code_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        code: &RecordCode,
    ) -> Result<Option<Record>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE code = $1 FOR UPDATE");

        let record = sqlx::query_as::<_, Record>(&sql).bind(code).fetch_optional(&mut **tx).await?;

        Ok(record)
    }

    /// Selects up to `limit` eligible records in the given categories.
    ///
    /// A record is eligible when it is pending, active, approved and in one
    /// of `categories`. Rows come back ordered by code and stay locked until
    /// the transaction ends.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` for a negative limit, or a database
    /// error if the query fails.
    pub async fn select_pending_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        categories: &[Category],
        limit: i64,
    ) -> Result<Vec<Record>> {
        if limit < 0 {
            return Err(CoreError::InvalidInput(format!("negative selection limit: {limit}")));
        }

        let labels: Vec<String> =
            categories.iter().map(|category| category.as_str().to_string()).collect();

        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records \
             WHERE sync_state = $1 AND state = $2 AND audit_state = $3 AND category = ANY($4) \
             ORDER BY code \
             LIMIT $5 \
             FOR UPDATE"
        );

        let records = sqlx::query_as::<_, Record>(&sql)
            .bind(SyncState::Pending)
            .bind(ACTIVE_STATE)
            .bind(APPROVED_AUDIT_STATE)
            .bind(&labels)
            .bind(limit)
            .fetch_all(&mut **tx)
            .await?;

        Ok(records)
    }

    /// Writes `sync_state` for one record.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if no row has this code.
    pub async fn update_sync_state(&self, code: &RecordCode, state: SyncState) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        self.update_sync_state_in_tx(&mut tx, code, state).await?;
        tx.commit().await?;

        Ok(())
    }

    /// Writes `sync_state` for one record under a savepoint.
    ///
    /// On failure the savepoint is rolled back and the enclosing transaction
    /// remains usable for the rest of the batch.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if no row has this code, or a database
    /// error if the update fails.
    pub async fn update_sync_state_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        code: &RecordCode,
        state: SyncState,
    ) -> Result<()> {
        let mut savepoint = (&mut **tx).begin().await?;

        let outcome = sqlx::query("UPDATE records SET sync_state = $1 WHERE code = $2")
            .bind(state)
            .bind(code)
            .execute(&mut *savepoint)
            .await;

        match outcome {
            Ok(done) if done.rows_affected() == 0 => {
                savepoint.rollback().await?;
                Err(CoreError::NotFound(format!("record {code}")))
            },
            Ok(_) => {
                savepoint.commit().await?;
                Ok(())
            },
            Err(err) => {
                savepoint.rollback().await?;
                Err(err.into())
            },
        }
    }

    /// Counts records in the given delivery state.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count_by_sync_state(&self, state: SyncState) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE sync_state = $1")
            .bind(state)
            .fetch_one(&*self.pool)
            .await?;

        Ok(count)
    }
}
