//! Batch persistence and status machine storage

use radvol_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{Batch, BatchProgress, BatchStatus};

/// Save a batch (insert or update on batch_id)
pub async fn save_batch(pool: &SqlitePool, batch: &Batch) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO batches (
            batch_id, source_file, content_hash, submitted_by, status,
            rows_total, rows_processed, rows_inserted, rows_error,
            detail, started_at, completed_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(batch_id) DO UPDATE SET
            submitted_by = excluded.submitted_by,
            status = excluded.status,
            rows_total = excluded.rows_total,
            rows_processed = excluded.rows_processed,
            rows_inserted = excluded.rows_inserted,
            rows_error = excluded.rows_error,
            detail = excluded.detail,
            started_at = excluded.started_at,
            completed_at = excluded.completed_at
        "#,
    )
    .bind(batch.batch_id.to_string())
    .bind(&batch.source_file)
    .bind(&batch.content_hash)
    .bind(&batch.submitted_by)
    .bind(batch.status.as_str())
    .bind(batch.progress.rows_total as i64)
    .bind(batch.progress.rows_processed as i64)
    .bind(batch.progress.rows_inserted as i64)
    .bind(batch.progress.rows_error as i64)
    .bind(&batch.detail)
    .bind(batch.started_at.to_rfc3339())
    .bind(batch.completed_at.map(|dt| dt.to_rfc3339()))
    .execute(pool)
    .await?;

    Ok(())
}

/// Load a batch by id
pub async fn load_batch(pool: &SqlitePool, batch_id: Uuid) -> Result<Option<Batch>> {
    let row = sqlx::query(
        r#"
        SELECT batch_id, source_file, content_hash, submitted_by, status,
               rows_total, rows_processed, rows_inserted, rows_error,
               detail, started_at, completed_at
        FROM batches
        WHERE batch_id = ?
        "#,
    )
    .bind(batch_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(batch_from_row).transpose()
}

/// Find an existing batch for the same upload content.
///
/// Duplicate submissions reuse the original batch id so reprocessing lands
/// on the same fact identities.
pub async fn find_by_content(
    pool: &SqlitePool,
    source_file: &str,
    content_hash: &str,
) -> Result<Option<Batch>> {
    let row = sqlx::query(
        r#"
        SELECT batch_id, source_file, content_hash, submitted_by, status,
               rows_total, rows_processed, rows_inserted, rows_error,
               detail, started_at, completed_at
        FROM batches
        WHERE source_file = ? AND content_hash = ?
        ORDER BY started_at DESC
        LIMIT 1
        "#,
    )
    .bind(source_file)
    .bind(content_hash)
    .fetch_optional(pool)
    .await?;

    row.map(batch_from_row).transpose()
}

/// Mark stale non-terminal batches as failed on startup.
///
/// A batch still `pendente`/`processando` when the service starts belongs
/// to a dead worker task and will never progress; resubmission is safe
/// thanks to idempotent fact upserts.
pub async fn cleanup_stale_batches(pool: &SqlitePool) -> Result<usize> {
    let result = sqlx::query(
        r#"
        UPDATE batches
        SET status = 'erro',
            completed_at = ?,
            detail = 'Batch abandoned by service restart; resubmit the file'
        WHERE status IN ('pendente', 'processando')
        "#,
    )
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as usize)
}

fn batch_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Batch> {
    let batch_id_str: String = row.get("batch_id");
    let batch_id = Uuid::parse_str(&batch_id_str)
        .map_err(|e| Error::Internal(format!("Failed to parse batch_id: {}", e)))?;

    let status_str: String = row.get("status");
    let status: BatchStatus = status_str
        .parse()
        .map_err(|e: String| Error::Internal(e))?;

    let started_at: String = row.get("started_at");
    let started_at = chrono::DateTime::parse_from_rfc3339(&started_at)
        .map_err(|e| Error::Internal(format!("Failed to parse started_at: {}", e)))?
        .with_timezone(&chrono::Utc);

    let completed_at: Option<String> = row.get("completed_at");
    let completed_at = completed_at
        .map(|s| chrono::DateTime::parse_from_rfc3339(&s))
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to parse completed_at: {}", e)))?
        .map(|dt| dt.with_timezone(&chrono::Utc));

    Ok(Batch {
        batch_id,
        source_file: row.get("source_file"),
        content_hash: row.get("content_hash"),
        submitted_by: row.get("submitted_by"),
        status,
        progress: BatchProgress {
            rows_total: row.get::<i64, _>("rows_total") as u64,
            rows_processed: row.get::<i64, _>("rows_processed") as u64,
            rows_inserted: row.get::<i64, _>("rows_inserted") as u64,
            rows_error: row.get::<i64, _>("rows_error") as u64,
        },
        detail: row.get("detail"),
        started_at,
        completed_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use radvol_common::db::create_schema;

    async fn setup() -> SqlitePool {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        create_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn save_and_load_round_trips() {
        let pool = setup().await;
        let mut batch = Batch::new("vol_jan.csv".into(), "hash1".into(), "billing-ops".into());
        batch.progress.rows_total = 120;
        batch.transition_to(BatchStatus::Processing);

        save_batch(&pool, &batch).await.unwrap();
        let loaded = load_batch(&pool, batch.batch_id).await.unwrap().unwrap();

        assert_eq!(loaded.source_file, "vol_jan.csv");
        assert_eq!(loaded.status, BatchStatus::Processing);
        assert_eq!(loaded.progress.rows_total, 120);
        assert_eq!(loaded.submitted_by, "billing-ops");
    }

    #[tokio::test]
    async fn progress_updates_overwrite_on_conflict() {
        let pool = setup().await;
        let mut batch = Batch::new("vol.csv".into(), "h".into(), "ops".into());
        save_batch(&pool, &batch).await.unwrap();

        batch.progress.rows_processed = 500;
        batch.transition_to(BatchStatus::Completed);
        save_batch(&pool, &batch).await.unwrap();

        let loaded = load_batch(&pool, batch.batch_id).await.unwrap().unwrap();
        assert_eq!(loaded.progress.rows_processed, 500);
        assert_eq!(loaded.status, BatchStatus::Completed);
        assert!(loaded.completed_at.is_some());
    }

    #[tokio::test]
    async fn duplicate_content_finds_original_batch() {
        let pool = setup().await;
        let batch = Batch::new("vol.csv".into(), "samehash".into(), "ops".into());
        save_batch(&pool, &batch).await.unwrap();

        let found = find_by_content(&pool, "vol.csv", "samehash").await.unwrap();
        assert_eq!(found.unwrap().batch_id, batch.batch_id);

        let missing = find_by_content(&pool, "vol.csv", "otherhash").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn stale_batches_marked_failed() {
        let pool = setup().await;
        let mut running = Batch::new("a.csv".into(), "h1".into(), "ops".into());
        running.transition_to(BatchStatus::Processing);
        save_batch(&pool, &running).await.unwrap();

        let mut done = Batch::new("b.csv".into(), "h2".into(), "ops".into());
        done.transition_to(BatchStatus::Completed);
        save_batch(&pool, &done).await.unwrap();

        let cleaned = cleanup_stale_batches(&pool).await.unwrap();
        assert_eq!(cleaned, 1);

        let reloaded = load_batch(&pool, running.batch_id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, BatchStatus::Failed);
    }
}
