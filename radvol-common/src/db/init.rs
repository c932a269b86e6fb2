//! Database initialization
//!
//! Creates the SQLite database on first run and brings the schema up
//! idempotently. Every `create_*` function uses `CREATE TABLE IF NOT
//! EXISTS`, so init is safe to call on every startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection pool and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL allows concurrent readers while a batch worker writes
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables (idempotent - safe to call multiple times)
///
/// Also used directly by tests against `:memory:` pools so test schemas
/// never drift from production.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_batches_table(pool).await?;
    create_staging_rows_table(pool).await?;
    create_volumetria_facts_table(pool).await?;
    create_exclusion_records_table(pool).await?;

    // Reference tables, loaded read-only once per batch
    create_depara_mappings_table(pool).await?;
    create_exam_break_rules_table(pool).await?;
    create_exam_registry_table(pool).await?;
    create_physician_roster_table(pool).await?;
    create_price_tiers_table(pool).await?;

    Ok(())
}

/// Upload batches: one row per submitted source file
async fn create_batches_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS batches (
            batch_id TEXT PRIMARY KEY,
            source_file TEXT NOT NULL,
            content_hash TEXT NOT NULL DEFAULT '',
            submitted_by TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'pendente',
            rows_total INTEGER NOT NULL DEFAULT 0,
            rows_processed INTEGER NOT NULL DEFAULT 0,
            rows_inserted INTEGER NOT NULL DEFAULT 0,
            rows_error INTEGER NOT NULL DEFAULT 0,
            detail TEXT NOT NULL DEFAULT '',
            started_at TEXT NOT NULL,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Staging rows: durable per-batch holding area with row-level status
async fn create_staging_rows_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS staging_rows (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            batch_id TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            reason TEXT,
            UNIQUE(batch_id, ordinal),
            FOREIGN KEY (batch_id) REFERENCES batches(batch_id)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Canonical committed facts. Natural identity is
/// (client, patient, exam_name, derivation, batch_id); `derivation` is ''
/// for plain rows and the break-rule suffix for split allocations.
async fn create_volumetria_facts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS volumetria_facts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            client TEXT NOT NULL,
            patient TEXT NOT NULL,
            exam_name TEXT NOT NULL,
            derivation TEXT NOT NULL DEFAULT '',
            batch_id TEXT NOT NULL,
            modality TEXT,
            specialty TEXT,
            category TEXT,
            priority TEXT,
            physician TEXT,
            quantity INTEGER NOT NULL DEFAULT 1,
            value REAL NOT NULL DEFAULT 0,
            realized_at TEXT,
            reported_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(client, patient, exam_name, derivation, batch_id),
            FOREIGN KEY (batch_id) REFERENCES batches(batch_id)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Exclusion ledger: append-only, keyed by (source_file, row_ordinal)
async fn create_exclusion_records_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS exclusion_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_file TEXT NOT NULL,
            row_ordinal INTEGER NOT NULL,
            payload TEXT NOT NULL,
            motive TEXT NOT NULL,
            detail TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            UNIQUE(source_file, row_ordinal)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// De-para value backfill mappings: exam name -> reference value
async fn create_depara_mappings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS depara_mappings (
            exam_name TEXT PRIMARY KEY,
            reference_value REAL NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Exam break rules: one row per derived allocation of a compound exam
async fn create_exam_break_rules_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS exam_break_rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_exam TEXT NOT NULL,
            derived_suffix TEXT NOT NULL,
            target_category TEXT NOT NULL,
            value_share REAL NOT NULL DEFAULT 1.0,
            UNIQUE(source_exam, derived_suffix)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Canonical exam registry: authoritative specialty/category per exam name
async fn create_exam_registry_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS exam_registry (
            exam_name TEXT PRIMARY KEY,
            specialty TEXT NOT NULL,
            category TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Physician roster: normalized physician name -> specialty
async fn create_physician_roster_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS physician_roster (
            physician_normalized TEXT PRIMARY KEY,
            specialty TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Tiered price table consumed by the pricing resolver
async fn create_price_tiers_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS price_tiers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            client TEXT NOT NULL,
            modality TEXT NOT NULL,
            specialty TEXT NOT NULL,
            category TEXT NOT NULL,
            priority TEXT NOT NULL,
            volume_from INTEGER NOT NULL,
            volume_to INTEGER NOT NULL,
            base_price REAL NOT NULL,
            urgency_price REAL NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_schema_is_idempotent() {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        create_schema(&pool).await.unwrap();
        create_schema(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'batches'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn init_database_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("radvol.db");
        let pool = init_database(&db_path).await.unwrap();
        assert!(db_path.exists());

        let ok: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&pool).await.unwrap();
        assert_eq!(ok, 1);
    }
}
