//! Batch workflow orchestration
//!
//! Drives one upload through its phases: parse and stage, chunked rule
//! processing, exclusion-ledger fallback, conclusion. Progress is
//! persisted after every chunk so a crash loses at most the in-flight
//! chunk; fact writes are upserts on natural identity so rerunning the
//! same batch is safe. Cancellation is cooperative, checked between
//! chunks.

use chrono::NaiveTime;
use radvol_common::{Error, Result};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::{batches, exclusions, facts, reference, staging};
use crate::ingest::{read_upload, RowParser};
use crate::models::{
    Batch, BatchStatus, BillingWindow, MotiveCode, NormalizedRow, ParsedRow, VolumetriaFact,
};
use crate::rules::{RowResolution, RuleEngine, RulePassStats};

/// SHA-256 of the uploaded bytes, hex encoded
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Register a batch for an upload, reusing the original batch when the
/// same content was submitted before.
///
/// Reuse keeps the batch id stable, so reprocessing lands on the same
/// fact identities instead of duplicating them. A batch still running is
/// not resubmittable.
pub async fn prepare_batch(
    pool: &SqlitePool,
    source_file: &str,
    bytes: &[u8],
    submitted_by: &str,
) -> Result<Batch> {
    let hash = content_hash(bytes);

    let batch = match batches::find_by_content(pool, source_file, &hash).await? {
        Some(mut existing) => {
            if !existing.status.is_terminal() {
                return Err(Error::InvalidInput(format!(
                    "Batch {} for this content is still {}",
                    existing.batch_id,
                    existing.status.as_str()
                )));
            }
            tracing::info!(
                batch_id = %existing.batch_id,
                source_file,
                "Duplicate submission, reprocessing original batch"
            );
            existing.reset_for_reprocess(submitted_by.to_string());
            staging::reset_batch_rows(pool, existing.batch_id).await?;
            existing
        }
        None => Batch::new(source_file.to_string(), hash, submitted_by.to_string()),
    };

    batches::save_batch(pool, &batch).await?;
    Ok(batch)
}

/// Run one batch to a terminal state.
///
/// Never returns an error: systemic failures mark the batch `erro` with
/// the failure detail, cancellation marks it `cancelado`. The returned
/// batch carries the final state for logging.
pub async fn run_batch(
    pool: &SqlitePool,
    mut batch: Batch,
    bytes: &[u8],
    chunk_size: usize,
    window: BillingWindow,
    cancel: CancellationToken,
) -> Batch {
    let batch_id = batch.batch_id;
    tracing::info!(%batch_id, source_file = %batch.source_file, "Batch processing started");

    match process(pool, &mut batch, bytes, chunk_size, window, &cancel).await {
        Ok(()) => {
            tracing::info!(
                %batch_id,
                status = batch.status.as_str(),
                rows_processed = batch.progress.rows_processed,
                rows_inserted = batch.progress.rows_inserted,
                rows_error = batch.progress.rows_error,
                "Batch finished"
            );
        }
        Err(e) => {
            tracing::error!(%batch_id, error = %e, "Batch failed");
            batch.detail = format!("Processing failed: {}", e);
            batch.transition_to(BatchStatus::Failed);
            if let Err(save_err) = batches::save_batch(pool, &batch).await {
                tracing::error!(%batch_id, error = %save_err, "Failed to persist batch failure");
            }
        }
    }

    batch
}

async fn process(
    pool: &SqlitePool,
    batch: &mut Batch,
    bytes: &[u8],
    chunk_size: usize,
    window: BillingWindow,
    cancel: &CancellationToken,
) -> Result<()> {
    // Phase 1: parse and stage. Rows missing mandatory fields go
    // straight to the exclusion ledger and never reach staging.
    let raw_rows = read_upload(bytes)?;
    batch.progress.rows_total = raw_rows.len() as u64;
    batch.detail = "Staging rows".to_string();
    batch.transition_to(BatchStatus::Processing);
    batches::save_batch(pool, batch).await?;

    let parser = RowParser::default();
    let mut staged = Vec::with_capacity(raw_rows.len());
    for raw in &raw_rows {
        match parser.parse(raw) {
            ParsedRow::Normalized(row) => staged.push((raw.ordinal, *row)),
            ParsedRow::Rejected(rejected) => {
                exclusions::record_exclusion(
                    pool,
                    &batch.source_file,
                    rejected.ordinal,
                    &rejected.payload,
                    rejected.motive,
                    &rejected.detail,
                )
                .await?;
                batch.progress.rows_processed += 1;
                batch.progress.rows_error += 1;
            }
        }
    }
    staging::append_rows(pool, batch.batch_id, &staged).await?;
    batches::save_batch(pool, batch).await?;

    // Phase 2: chunked rule processing
    let refdata = reference::load_reference_data(pool, window).await?;
    let engine = RuleEngine::standard();
    let mut stats = RulePassStats::default();

    batch.detail = "Applying rules".to_string();
    loop {
        if cancel.is_cancelled() {
            tracing::info!(batch_id = %batch.batch_id, "Batch cancelled between chunks");
            batch.detail = "Cancelled by operator".to_string();
            batch.transition_to(BatchStatus::Cancelled);
            batches::save_batch(pool, batch).await?;
            return Ok(());
        }

        let chunk = staging::fetch_pending_chunk(pool, batch.batch_id, chunk_size).await?;
        if chunk.is_empty() {
            break;
        }

        for staged_row in chunk {
            match engine.process_row(staged_row.row.clone(), &refdata, &mut stats) {
                RowResolution::Committed(allocations) => {
                    for (row, derivation) in allocations {
                        let fact = fact_from_row(row, derivation, batch.batch_id);
                        facts::upsert_fact(pool, &fact).await?;
                        batch.progress.rows_inserted += 1;
                    }
                    staging::mark_row(pool, staged_row.id, staging::RowStatus::Processed, None)
                        .await?;
                }
                RowResolution::Excluded { motive, detail } => {
                    let payload = serde_json::to_value(&staged_row.row).map_err(|e| {
                        Error::Internal(format!("Failed to serialize excluded row: {}", e))
                    })?;
                    exclusions::record_exclusion(
                        pool,
                        &batch.source_file,
                        staged_row.ordinal,
                        &payload,
                        motive,
                        &detail,
                    )
                    .await?;
                    staging::mark_row(
                        pool,
                        staged_row.id,
                        staging::RowStatus::Error,
                        Some(motive.as_str()),
                    )
                    .await?;
                    batch.progress.rows_error += 1;
                }
            }
            batch.progress.rows_processed += 1;
        }

        // Progress per chunk; a crash loses at most the chunk in flight
        batches::save_batch(pool, batch).await?;
    }

    // Phase 3: exclusion-ledger fallback. Any staged row with neither a
    // committed fact nor an exclusion record was silently lost; backfill
    // a best-effort motive so the ledger stays complete.
    let backfilled = exclusion_fallback(pool, batch, &window).await?;
    if backfilled > 0 {
        tracing::warn!(
            batch_id = %batch.batch_id,
            backfilled,
            "Exclusion fallback backfilled records for silently lost rows"
        );
    }

    // Phase 4: conclude
    batch.detail = conclusion_detail(&stats, backfilled);
    batch.transition_to(BatchStatus::Completed);
    batches::save_batch(pool, batch).await?;
    staging::purge_batch(pool, batch.batch_id).await?;

    Ok(())
}

/// Set difference between the staging snapshot and the committed facts,
/// backfilled into the ledger with an inferred motive
async fn exclusion_fallback(
    pool: &SqlitePool,
    batch: &Batch,
    window: &BillingWindow,
) -> Result<u64> {
    let before = exclusions::query_by_source_file(pool, &batch.source_file)
        .await?
        .len();

    for staged_row in staging::snapshot(pool, batch.batch_id).await? {
        let has_fact = facts::has_fact_identity(
            pool,
            batch.batch_id,
            &staged_row.row.client,
            &staged_row.row.patient,
            &staged_row.row.exam_name,
        )
        .await?;
        if has_fact {
            continue;
        }

        let (motive, detail) = infer_motive(&staged_row.row, window);
        let payload = serde_json::to_value(&staged_row.row)
            .map_err(|e| Error::Internal(format!("Failed to serialize staged row: {}", e)))?;
        // Write-once insert: rows already excluded by the live path are
        // untouched
        exclusions::record_exclusion(
            pool,
            &batch.source_file,
            staged_row.ordinal,
            &payload,
            motive,
            &detail,
        )
        .await?;
    }

    let after = exclusions::query_by_source_file(pool, &batch.source_file)
        .await?
        .len();
    Ok((after - before) as u64)
}

/// Best-effort motive for a row lost without a live exclusion record
fn infer_motive(row: &NormalizedRow, window: &BillingWindow) -> (MotiveCode, String) {
    if let Some(reported) = row.reported_date {
        if reported > window.report_cutoff {
            return (
                MotiveCode::TemporalExclusion,
                format!(
                    "report date {} after billing cutoff {} (backfilled)",
                    reported, window.report_cutoff
                ),
            );
        }
    }
    (
        MotiveCode::ProcessingGap,
        "Row staged but never committed; no live exclusion recorded".to_string(),
    )
}

fn conclusion_detail(stats: &RulePassStats, backfilled: u64) -> String {
    let mut parts = Vec::new();
    if !stats.anomalies.is_empty() {
        parts.push(format!("{} anomalies for review", stats.anomalies.len()));
    }
    if backfilled > 0 {
        parts.push(format!("{} exclusions backfilled", backfilled));
    }
    if parts.is_empty() {
        "Completed".to_string()
    } else {
        parts.join("; ")
    }
}

fn fact_from_row(row: NormalizedRow, derivation: String, batch_id: Uuid) -> VolumetriaFact {
    let midnight = NaiveTime::from_hms_opt(0, 0, 0).unwrap_or_default();
    VolumetriaFact {
        client: row.client,
        patient: row.patient,
        exam_name: row.exam_name,
        derivation,
        batch_id,
        modality: row.modality,
        specialty: row.specialty,
        category: row.category,
        priority: row.priority,
        physician: row.physician,
        quantity: row.quantity,
        value: row.value,
        realized_at: row
            .realized_date
            .map(|d| d.and_time(row.realized_time.unwrap_or(midnight))),
        reported_at: row
            .reported_date
            .map(|d| d.and_time(row.reported_time.unwrap_or(midnight))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use radvol_common::db::create_schema;

    const UPLOAD: &str = "\
Cliente;Paciente;Exame;Medico Laudador;Especialidade;Valor;Data Realizacao;Data Laudo
HOSP;ANA;CRANIO;Dr. Joao Souza;GERAL;0;05/01/24;06/01/24
HOSP;RUI;TORAX;Dra. Maria;RAIO-X;12,50;10/01/24;11/01/24
HOSP;;SEM PACIENTE;;;;;
HOSP;EVA;CRANIO;;RAIO-X;18,00;02/01/24;15/02/24
";

    fn window() -> BillingWindow {
        BillingWindow {
            period_start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            report_cutoff: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        }
    }

    async fn setup() -> SqlitePool {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        create_schema(&pool).await.unwrap();
        sqlx::query("INSERT INTO depara_mappings (exam_name, reference_value) VALUES ('CRANIO', 18.0)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO exam_registry (exam_name, specialty, category) VALUES ('CRANIO', 'TOMOGRAFIA', 'TC')",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO physician_roster (physician_normalized, specialty) VALUES ('joao souza', 'NEURO')",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    #[tokio::test]
    async fn full_batch_reaches_completed_with_facts_and_exclusions() {
        let pool = setup().await;
        let bytes = UPLOAD.as_bytes();

        let batch = prepare_batch(&pool, "vol_jan.csv", bytes, "billing-ops")
            .await
            .unwrap();
        let done = run_batch(&pool, batch, bytes, 2, window(), CancellationToken::new()).await;

        assert_eq!(done.status, BatchStatus::Completed);
        assert_eq!(done.progress.rows_total, 4);
        assert_eq!(done.progress.rows_processed, 4);
        // ANA and RUI commit; the blank patient is rejected pre-staging;
        // EVA's late report is a temporal exclusion
        assert_eq!(done.progress.rows_inserted, 2);
        assert_eq!(done.progress.rows_error, 2);

        let committed = facts::facts_for_batch(&pool, done.batch_id).await.unwrap();
        assert_eq!(committed.len(), 2);
        let ana = committed.iter().find(|f| f.patient == "ANA").unwrap();
        assert_eq!(ana.value, 18.0);
        // Registry wins over the generic marker before the roster rule
        // ever sees the row
        assert_eq!(ana.specialty.as_deref(), Some("TOMOGRAFIA"));
        assert_eq!(ana.category.as_deref(), Some("TC"));

        let ledger = exclusions::query_by_source_file(&pool, "vol_jan.csv")
            .await
            .unwrap();
        assert_eq!(ledger.len(), 2);
        assert!(ledger
            .iter()
            .any(|r| r.motive == MotiveCode::MissingRequiredField));
        assert!(ledger
            .iter()
            .any(|r| r.motive == MotiveCode::TemporalExclusion));

        // Staging purged on completion
        assert!(staging::snapshot(&pool, done.batch_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn resubmitting_same_content_reuses_the_batch() {
        let pool = setup().await;
        let bytes = UPLOAD.as_bytes();

        let first = prepare_batch(&pool, "vol.csv", bytes, "ops").await.unwrap();
        let done = run_batch(&pool, first, bytes, 100, window(), CancellationToken::new()).await;

        let second = prepare_batch(&pool, "vol.csv", bytes, "ops").await.unwrap();
        assert_eq!(second.batch_id, done.batch_id);

        let rerun = run_batch(&pool, second, bytes, 100, window(), CancellationToken::new()).await;
        assert_eq!(rerun.status, BatchStatus::Completed);
        // Idempotent: still the same two facts, no duplicates
        assert_eq!(
            facts::fact_count_for_batch(&pool, rerun.batch_id).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn running_batch_cannot_be_resubmitted() {
        let pool = setup().await;
        let bytes = UPLOAD.as_bytes();

        let mut batch = prepare_batch(&pool, "vol.csv", bytes, "ops").await.unwrap();
        batch.transition_to(BatchStatus::Processing);
        batches::save_batch(&pool, &batch).await.unwrap();

        let err = prepare_batch(&pool, "vol.csv", bytes, "ops").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn cancelled_token_ends_the_batch_cancelado() {
        let pool = setup().await;
        let bytes = UPLOAD.as_bytes();
        let token = CancellationToken::new();
        token.cancel();

        let batch = prepare_batch(&pool, "vol.csv", bytes, "ops").await.unwrap();
        let done = run_batch(&pool, batch, bytes, 1, window(), token).await;

        assert_eq!(done.status, BatchStatus::Cancelled);
        let reloaded = batches::load_batch(&pool, done.batch_id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, BatchStatus::Cancelled);
    }

    #[tokio::test]
    async fn chunk_progress_survives_an_abandoned_run() {
        let pool = setup().await;
        let bytes = UPLOAD.as_bytes();

        let mut batch = prepare_batch(&pool, "vol.csv", bytes, "ops").await.unwrap();

        // Stage the upload and work through exactly one chunk of one row,
        // then abandon the run before the rest is touched
        let parser = RowParser::default();
        let raw_rows = read_upload(bytes).unwrap();
        let staged: Vec<_> = raw_rows
            .iter()
            .filter_map(|raw| match parser.parse(raw) {
                ParsedRow::Normalized(row) => Some((raw.ordinal, *row)),
                ParsedRow::Rejected(_) => None,
            })
            .collect();
        batch.progress.rows_total = raw_rows.len() as u64;
        batch.transition_to(BatchStatus::Processing);
        staging::append_rows(&pool, batch.batch_id, &staged).await.unwrap();

        let chunk = staging::fetch_pending_chunk(&pool, batch.batch_id, 1).await.unwrap();
        assert_eq!(chunk.len(), 1);
        let first = &chunk[0];
        let fact = fact_from_row(first.row.clone(), String::new(), batch.batch_id);
        facts::upsert_fact(&pool, &fact).await.unwrap();
        staging::mark_row(&pool, first.id, staging::RowStatus::Processed, None)
            .await
            .unwrap();
        batch.progress.rows_processed += 1;
        batch.progress.rows_inserted += 1;
        batches::save_batch(&pool, &batch).await.unwrap();

        let batch_id = batch.batch_id;
        let first_ordinal = first.ordinal;
        drop(batch);

        // The per-chunk save is what a restart reads back
        let reloaded = batches::load_batch(&pool, batch_id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, BatchStatus::Processing);
        assert_eq!(reloaded.progress.rows_processed, 1);
        assert_eq!(reloaded.progress.rows_inserted, 1);

        // A rerun resumes from the remaining pending staging rows only
        let remaining = staging::fetch_pending_chunk(&pool, batch_id, 100).await.unwrap();
        assert_eq!(remaining.len(), staged.len() - 1);
        assert!(remaining.iter().all(|r| r.ordinal != first_ordinal));
    }

    #[tokio::test]
    async fn fallback_backfills_silently_lost_rows() {
        let pool = setup().await;
        let batch = Batch::new("lost.csv".into(), "h".into(), "ops".into());
        batches::save_batch(&pool, &batch).await.unwrap();

        // Simulate a crash: a row staged, never resolved either way
        let mut lost = NormalizedRow {
            client: "HOSP".into(),
            patient: "ZOE".into(),
            exam_name: "CRANIO".into(),
            modality: None,
            specialty: None,
            category: None,
            priority: None,
            physician: None,
            quantity: 1,
            value: 18.0,
            realized_date: NaiveDate::from_ymd_opt(2024, 1, 5),
            realized_time: None,
            reported_date: NaiveDate::from_ymd_opt(2024, 2, 20),
            reported_time: None,
            parse_notes: Vec::new(),
        };
        staging::append_rows(&pool, batch.batch_id, &[(0, lost.clone())])
            .await
            .unwrap();
        lost.patient = "LIA".into();
        lost.reported_date = NaiveDate::from_ymd_opt(2024, 1, 20);
        staging::append_rows(&pool, batch.batch_id, &[(1, lost)]).await.unwrap();

        let backfilled = exclusion_fallback(&pool, &batch, &window()).await.unwrap();
        assert_eq!(backfilled, 2);

        let ledger = exclusions::query_by_source_file(&pool, "lost.csv").await.unwrap();
        assert_eq!(ledger[0].motive, MotiveCode::TemporalExclusion);
        assert_eq!(ledger[1].motive, MotiveCode::ProcessingGap);
    }

    #[test]
    fn content_hash_is_stable_and_content_sensitive() {
        let a = content_hash(b"abc");
        assert_eq!(a, content_hash(b"abc"));
        assert_ne!(a, content_hash(b"abd"));
        assert_eq!(a.len(), 64);
    }
}
