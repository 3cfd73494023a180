//! Idempotent schema bootstrap for the `records` table.

use sqlx::PgPool;

use crate::error::Result;

const CREATE_RECORDS: &str = r#"
    CREATE TABLE IF NOT EXISTS records (
        code TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        mobile_phone TEXT NOT NULL DEFAULT '',
        category TEXT NOT NULL,
        state INTEGER NOT NULL,
        audit_state BIGINT,
        sync_state INTEGER NOT NULL DEFAULT 1 CHECK (sync_state IN (1, 2, 3)),
        company_name TEXT,
        login_name TEXT,
        id_card TEXT,
        sex TEXT,
        birthday TEXT,
        province TEXT,
        city TEXT,
        area TEXT,
        town TEXT,
        village TEXT,
        address TEXT,
        logo_url TEXT,
        business_license_url TEXT,
        food_license_url TEXT,
        health_certificate_url TEXT,
        health_certificate_due TEXT,
        level TEXT,
        banquet_count BIGINT,
        report_count BIGINT,
        register_source BIGINT,
        created_at TEXT
    )
"#;

const CREATE_PENDING_INDEX: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_records_pending
    ON records(category, code)
    WHERE sync_state = 1 AND state = 1 AND audit_state = 2
"#;

/// Creates the `records` table and its pending-row index if missing.
///
/// # Errors
///
/// Returns `CoreError::Database` if either statement fails.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(CREATE_RECORDS).execute(pool).await?;
    sqlx::query(CREATE_PENDING_INDEX).execute(pool).await?;

    Ok(())
}
