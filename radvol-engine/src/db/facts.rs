//! Canonical fact persistence
//!
//! Writes are upserts on the natural identity
//! (client, patient, exam_name, derivation, batch_id) so re-running a
//! batch never creates duplicate facts; concurrent writers to the same
//! identity serialize as last-write-wins.

use radvol_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::VolumetriaFact;
use crate::reconcile::Dimension;

const DATETIME_FMT: &str = "%Y-%m-%dT%H:%M:%S";

/// Upsert one fact on its natural identity
pub async fn upsert_fact(pool: &SqlitePool, fact: &VolumetriaFact) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        INSERT INTO volumetria_facts (
            client, patient, exam_name, derivation, batch_id,
            modality, specialty, category, priority, physician,
            quantity, value, realized_at, reported_at, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(client, patient, exam_name, derivation, batch_id) DO UPDATE SET
            modality = excluded.modality,
            specialty = excluded.specialty,
            category = excluded.category,
            priority = excluded.priority,
            physician = excluded.physician,
            quantity = excluded.quantity,
            value = excluded.value,
            realized_at = excluded.realized_at,
            reported_at = excluded.reported_at,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&fact.client)
    .bind(&fact.patient)
    .bind(&fact.exam_name)
    .bind(&fact.derivation)
    .bind(fact.batch_id.to_string())
    .bind(&fact.modality)
    .bind(&fact.specialty)
    .bind(&fact.category)
    .bind(&fact.priority)
    .bind(&fact.physician)
    .bind(fact.quantity)
    .bind(fact.value)
    .bind(fact.realized_at.map(|dt| dt.format(DATETIME_FMT).to_string()))
    .bind(fact.reported_at.map(|dt| dt.format(DATETIME_FMT).to_string()))
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(())
}

/// All facts committed for one batch
pub async fn facts_for_batch(pool: &SqlitePool, batch_id: Uuid) -> Result<Vec<VolumetriaFact>> {
    let rows = sqlx::query(
        r#"
        SELECT client, patient, exam_name, derivation, batch_id,
               modality, specialty, category, priority, physician,
               quantity, value, realized_at, reported_at
        FROM volumetria_facts
        WHERE batch_id = ?
        ORDER BY client, patient, exam_name, derivation
        "#,
    )
    .bind(batch_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(fact_from_row).collect()
}

/// Count of distinct (patient, exam) identities committed for a batch,
/// used by the exclusion-ledger fallback to detect silently lost rows
pub async fn fact_count_for_batch(pool: &SqlitePool, batch_id: Uuid) -> Result<u64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM volumetria_facts WHERE batch_id = ?")
        .bind(batch_id.to_string())
        .fetch_one(pool)
        .await?;
    Ok(count as u64)
}

/// Does any fact exist for this (batch, client, patient, exam) identity,
/// under any derivation?
pub async fn has_fact_identity(
    pool: &SqlitePool,
    batch_id: Uuid,
    client: &str,
    patient: &str,
    exam_name: &str,
) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM volumetria_facts
        WHERE batch_id = ? AND client = ? AND patient = ? AND exam_name = ?
        "#,
    )
    .bind(batch_id.to_string())
    .bind(client)
    .bind(patient)
    .bind(exam_name)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// Grouped quantity totals over the chosen dimensions, feeding the
/// reconciliation comparator and the pricing summary
pub async fn grouped_quantities(
    pool: &SqlitePool,
    batch_id: Uuid,
    dimensions: &[Dimension],
) -> Result<Vec<(Vec<String>, i64)>> {
    let columns: Vec<&'static str> = dimensions.iter().map(|d| d.fact_column()).collect();
    let select_list = if columns.is_empty() {
        "''".to_string()
    } else {
        columns
            .iter()
            .map(|c| format!("COALESCE({}, '')", c))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let group_clause = if columns.is_empty() {
        String::new()
    } else {
        format!("GROUP BY {}", columns.join(", "))
    };

    // Dimension names map to a fixed column set in `Dimension::fact_column`,
    // never to caller-supplied strings.
    let sql = format!(
        "SELECT {}, SUM(quantity) AS qty FROM volumetria_facts WHERE batch_id = ? {} ",
        select_list, group_clause
    );

    let rows = sqlx::query(&sql)
        .bind(batch_id.to_string())
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let key: Vec<String> = (0..dimensions.len())
                .map(|i| row.get::<String, _>(i))
                .collect();
            let qty: i64 = row.get("qty");
            (key, qty)
        })
        .collect())
}

fn fact_from_row(row: sqlx::sqlite::SqliteRow) -> Result<VolumetriaFact> {
    let batch_id_str: String = row.get("batch_id");
    let batch_id = Uuid::parse_str(&batch_id_str)
        .map_err(|e| Error::Internal(format!("Failed to parse batch_id: {}", e)))?;

    let realized_at: Option<String> = row.get("realized_at");
    let realized_at = realized_at
        .map(|s| chrono::NaiveDateTime::parse_from_str(&s, DATETIME_FMT))
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to parse realized_at: {}", e)))?;

    let reported_at: Option<String> = row.get("reported_at");
    let reported_at = reported_at
        .map(|s| chrono::NaiveDateTime::parse_from_str(&s, DATETIME_FMT))
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to parse reported_at: {}", e)))?;

    Ok(VolumetriaFact {
        client: row.get("client"),
        patient: row.get("patient"),
        exam_name: row.get("exam_name"),
        derivation: row.get("derivation"),
        batch_id,
        modality: row.get("modality"),
        specialty: row.get("specialty"),
        category: row.get("category"),
        priority: row.get("priority"),
        physician: row.get("physician"),
        quantity: row.get("quantity"),
        value: row.get("value"),
        realized_at,
        reported_at,
    })
}
