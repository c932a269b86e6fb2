//! Staging row persistence
//!
//! The durable per-batch holding area. Rows land here at upload time with
//! status `pending`; the rule engine is the only mutator. Staging may be
//! purged after the batch reaches a terminal state; facts and exclusions
//! outlive it.

use radvol_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::NormalizedRow;

/// Row-level status within a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    Pending,
    Processed,
    Error,
}

impl RowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processed => "processed",
            Self::Error => "error",
        }
    }
}

/// One staged row loaded back for processing
#[derive(Debug, Clone)]
pub struct StagedRow {
    pub id: i64,
    pub ordinal: u64,
    pub row: NormalizedRow,
}

/// Append parsed rows to a batch inside one transaction
pub async fn append_rows(
    pool: &SqlitePool,
    batch_id: Uuid,
    rows: &[(u64, NormalizedRow)],
) -> Result<()> {
    let batch_id_str = batch_id.to_string();
    let mut tx = pool.begin().await?;

    for (ordinal, row) in rows {
        let payload = serde_json::to_string(row)
            .map_err(|e| Error::Internal(format!("Failed to serialize staging row: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO staging_rows (batch_id, ordinal, payload, status)
            VALUES (?, ?, ?, 'pending')
            ON CONFLICT(batch_id, ordinal) DO UPDATE SET
                payload = excluded.payload,
                status = 'pending',
                reason = NULL
            "#,
        )
        .bind(&batch_id_str)
        .bind(*ordinal as i64)
        .bind(payload)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Fetch the next chunk of pending rows in ordinal order
pub async fn fetch_pending_chunk(
    pool: &SqlitePool,
    batch_id: Uuid,
    limit: usize,
) -> Result<Vec<StagedRow>> {
    let rows = sqlx::query(
        r#"
        SELECT id, ordinal, payload
        FROM staging_rows
        WHERE batch_id = ? AND status = 'pending'
        ORDER BY ordinal
        LIMIT ?
        "#,
    )
    .bind(batch_id.to_string())
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let payload: String = row.get("payload");
            let parsed: NormalizedRow = serde_json::from_str(&payload)
                .map_err(|e| Error::Internal(format!("Corrupt staging payload: {}", e)))?;
            Ok(StagedRow {
                id: row.get("id"),
                ordinal: row.get::<i64, _>("ordinal") as u64,
                row: parsed,
            })
        })
        .collect()
}

/// Mark one staged row processed or errored
pub async fn mark_row(
    pool: &SqlitePool,
    row_id: i64,
    status: RowStatus,
    reason: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE staging_rows SET status = ?, reason = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(reason)
        .bind(row_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Reset all rows of a batch to pending for an idempotent reprocess
pub async fn reset_batch_rows(pool: &SqlitePool, batch_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE staging_rows SET status = 'pending', reason = NULL WHERE batch_id = ?")
        .bind(batch_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Snapshot of all staged ordinals with payloads, for the exclusion
/// ledger's reconciliation fallback
pub async fn snapshot(pool: &SqlitePool, batch_id: Uuid) -> Result<Vec<StagedRow>> {
    let rows = sqlx::query(
        r#"
        SELECT id, ordinal, payload
        FROM staging_rows
        WHERE batch_id = ?
        ORDER BY ordinal
        "#,
    )
    .bind(batch_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            let payload: String = row.get("payload");
            let parsed: NormalizedRow = serde_json::from_str(&payload)
                .map_err(|e| Error::Internal(format!("Corrupt staging payload: {}", e)))?;
            Ok(StagedRow {
                id: row.get("id"),
                ordinal: row.get::<i64, _>("ordinal") as u64,
                row: parsed,
            })
        })
        .collect()
}

/// Remove staged rows for a terminal batch
pub async fn purge_batch(pool: &SqlitePool, batch_id: Uuid) -> Result<usize> {
    let result = sqlx::query("DELETE FROM staging_rows WHERE batch_id = ?")
        .bind(batch_id.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Batch;
    use radvol_common::db::create_schema;

    fn sample_row(patient: &str) -> NormalizedRow {
        NormalizedRow {
            client: "HOSP".into(),
            patient: patient.into(),
            exam_name: "CRANIO".into(),
            modality: None,
            specialty: None,
            category: None,
            priority: None,
            physician: None,
            quantity: 1,
            value: 0.0,
            realized_date: None,
            realized_time: None,
            reported_date: None,
            reported_time: None,
            parse_notes: Vec::new(),
        }
    }

    async fn setup_with_batch() -> (SqlitePool, Uuid) {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        create_schema(&pool).await.unwrap();
        let batch = Batch::new("vol.csv".into(), "h".into(), "ops".into());
        crate::db::batches::save_batch(&pool, &batch).await.unwrap();
        (pool, batch.batch_id)
    }

    #[tokio::test]
    async fn append_and_fetch_in_ordinal_order() {
        let (pool, batch_id) = setup_with_batch().await;
        append_rows(
            &pool,
            batch_id,
            &[(1, sample_row("B")), (0, sample_row("A"))],
        )
        .await
        .unwrap();

        let chunk = fetch_pending_chunk(&pool, batch_id, 10).await.unwrap();
        assert_eq!(chunk.len(), 2);
        assert_eq!(chunk[0].ordinal, 0);
        assert_eq!(chunk[0].row.patient, "A");
    }

    #[tokio::test]
    async fn marked_rows_leave_the_pending_chunk() {
        let (pool, batch_id) = setup_with_batch().await;
        append_rows(&pool, batch_id, &[(0, sample_row("A")), (1, sample_row("B"))])
            .await
            .unwrap();

        let chunk = fetch_pending_chunk(&pool, batch_id, 10).await.unwrap();
        mark_row(&pool, chunk[0].id, RowStatus::Processed, None).await.unwrap();

        let remaining = fetch_pending_chunk(&pool, batch_id, 10).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].row.patient, "B");
    }

    #[tokio::test]
    async fn re_append_resets_row_to_pending() {
        let (pool, batch_id) = setup_with_batch().await;
        append_rows(&pool, batch_id, &[(0, sample_row("A"))]).await.unwrap();
        let chunk = fetch_pending_chunk(&pool, batch_id, 10).await.unwrap();
        mark_row(&pool, chunk[0].id, RowStatus::Error, Some("lookup_miss")).await.unwrap();

        // Resubmission of the same source re-stages the same ordinal
        append_rows(&pool, batch_id, &[(0, sample_row("A"))]).await.unwrap();
        let chunk = fetch_pending_chunk(&pool, batch_id, 10).await.unwrap();
        assert_eq!(chunk.len(), 1);
    }

    #[tokio::test]
    async fn purge_removes_all_batch_rows() {
        let (pool, batch_id) = setup_with_batch().await;
        append_rows(&pool, batch_id, &[(0, sample_row("A")), (1, sample_row("B"))])
            .await
            .unwrap();

        let purged = purge_batch(&pool, batch_id).await.unwrap();
        assert_eq!(purged, 2);
        assert!(snapshot(&pool, batch_id).await.unwrap().is_empty());
    }
}
