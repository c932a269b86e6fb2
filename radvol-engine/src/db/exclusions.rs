//! Exclusion ledger persistence
//!
//! Append-only: records are written once, keyed by
//! (source_file, row_ordinal), and never mutated. Corrections are new
//! records under a different key, never edits.

use radvol_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{BatchStatus, ExclusionRecord, ExclusionSummary, MotiveCode};

/// Record one exclusion. Write-once: a second write to the same
/// (source_file, row_ordinal) is a no-op, preserving the first record.
pub async fn record_exclusion(
    pool: &SqlitePool,
    source_file: &str,
    row_ordinal: u64,
    payload: &serde_json::Value,
    motive: MotiveCode,
    detail: &str,
) -> Result<()> {
    let payload_text = serde_json::to_string(payload)
        .map_err(|e| Error::Internal(format!("Failed to serialize exclusion payload: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO exclusion_records (
            source_file, row_ordinal, payload, motive, detail, created_at
        ) VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(source_file, row_ordinal) DO NOTHING
        "#,
    )
    .bind(source_file)
    .bind(row_ordinal as i64)
    .bind(payload_text)
    .bind(motive.as_str())
    .bind(detail)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Fetch one record by id
pub async fn get_exclusion(pool: &SqlitePool, id: i64) -> Result<Option<ExclusionRecord>> {
    let row = sqlx::query(
        r#"
        SELECT id, source_file, row_ordinal, payload, motive, detail, created_at
        FROM exclusion_records
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(record_from_row).transpose()
}

/// All records with a given motive, oldest first
pub async fn query_by_motive(
    pool: &SqlitePool,
    motive: MotiveCode,
) -> Result<Vec<ExclusionRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT id, source_file, row_ordinal, payload, motive, detail, created_at
        FROM exclusion_records
        WHERE motive = ?
        ORDER BY id
        "#,
    )
    .bind(motive.as_str())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(record_from_row).collect()
}

/// All records for one source file, ordinal order
pub async fn query_by_source_file(
    pool: &SqlitePool,
    source_file: &str,
) -> Result<Vec<ExclusionRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT id, source_file, row_ordinal, payload, motive, detail, created_at
        FROM exclusion_records
        WHERE source_file = ?
        ORDER BY row_ordinal
        "#,
    )
    .bind(source_file)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(record_from_row).collect()
}

/// Terminal exclusion state for a batch.
///
/// Distinguishes "zero exclusions, fully processed" from "not yet
/// computed": a non-terminal batch always reports `NotComputed`.
pub async fn summary_for_batch(pool: &SqlitePool, batch_id: Uuid) -> Result<ExclusionSummary> {
    let batch = crate::db::batches::load_batch(pool, batch_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("batch {}", batch_id)))?;

    if batch.status != BatchStatus::Completed {
        return Ok(ExclusionSummary::NotComputed);
    }

    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM exclusion_records WHERE source_file = ?")
            .bind(&batch.source_file)
            .fetch_one(pool)
            .await?;

    if count == 0 {
        Ok(ExclusionSummary::Clean)
    } else {
        Ok(ExclusionSummary::Excluded {
            count: count as u64,
        })
    }
}

/// Export all records for a source file as a tabular CSV
pub async fn export_csv(pool: &SqlitePool, source_file: &str) -> Result<Vec<u8>> {
    let records = query_by_source_file(pool, source_file).await?;

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(["source_file", "row_ordinal", "motive", "detail", "created_at", "payload"])
        .map_err(|e| Error::Internal(format!("CSV export failed: {}", e)))?;

    for record in &records {
        writer
            .write_record([
                record.source_file.as_str(),
                &record.row_ordinal.to_string(),
                record.motive.as_str(),
                record.detail.as_str(),
                &record.created_at.to_rfc3339(),
                &record.payload.to_string(),
            ])
            .map_err(|e| Error::Internal(format!("CSV export failed: {}", e)))?;
    }

    writer
        .into_inner()
        .map_err(|e| Error::Internal(format!("CSV export failed: {}", e)))
}

fn record_from_row(row: sqlx::sqlite::SqliteRow) -> Result<ExclusionRecord> {
    let payload: String = row.get("payload");
    let payload: serde_json::Value = serde_json::from_str(&payload)
        .map_err(|e| Error::Internal(format!("Corrupt exclusion payload: {}", e)))?;

    let motive: String = row.get("motive");
    let motive: MotiveCode = motive.parse().map_err(|e: String| Error::Internal(e))?;

    let created_at: String = row.get("created_at");
    let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| Error::Internal(format!("Failed to parse created_at: {}", e)))?
        .with_timezone(&chrono::Utc);

    Ok(ExclusionRecord {
        id: row.get("id"),
        source_file: row.get("source_file"),
        row_ordinal: row.get::<i64, _>("row_ordinal") as u64,
        payload,
        motive,
        detail: row.get("detail"),
        created_at,
    })
}
