//! Reconciliation API handlers
//!
//! POST /volumetria/reconciliation compares the committed facts of a
//! batch against an externally supplied reference upload; the /export
//! variant returns the divergences as CSV.

use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::ingest::{read_upload, RowParser};
use crate::models::{NormalizedRow, ParsedRow};
use crate::reconcile::{
    self, Dimension, GroupedCounts, ReconciliationReport,
};
use crate::{db, AppState};

/// POST /volumetria/reconciliation request
#[derive(Debug, Deserialize)]
pub struct ReconciliationRequest {
    /// Batch whose committed facts form the system side
    pub batch_id: Uuid,
    /// Storage path of the reference upload
    pub reference_path: String,
    /// Grouping dimensions; absent file dimensions act as wildcards
    pub dimensions: Vec<Dimension>,
}

/// POST /volumetria/reconciliation response
#[derive(Debug, Serialize)]
pub struct ReconciliationResponse {
    pub batch_id: Uuid,
    #[serde(flatten)]
    pub report: ReconciliationReport,
    /// Reference rows rejected by the parser and left out of the
    /// comparison
    pub reference_rows_rejected: u64,
}

async fn build_report(
    state: &AppState,
    request: &ReconciliationRequest,
) -> ApiResult<ReconciliationResponse> {
    if request.dimensions.is_empty() {
        return Err(ApiError::BadRequest(
            "At least one grouping dimension is required".into(),
        ));
    }

    let batch = db::batches::load_batch(&state.db, request.batch_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Batch {}", request.batch_id)))?;

    let bytes = state.storage.download_by_path(&request.reference_path).await?;
    let raw_rows = read_upload(&bytes)?;

    let parser = RowParser::default();
    let mut reference_rows: Vec<NormalizedRow> = Vec::with_capacity(raw_rows.len());
    let mut rejected = 0u64;
    for raw in &raw_rows {
        match parser.parse(raw) {
            ParsedRow::Normalized(row) => reference_rows.push(*row),
            ParsedRow::Rejected(_) => rejected += 1,
        }
    }

    let dimensions = reconcile::effective_dimensions(&request.dimensions, &reference_rows);
    let file_side = reconcile::group_reference_rows(&reference_rows, &dimensions);

    let system_side: GroupedCounts =
        db::facts::grouped_quantities(&state.db, batch.batch_id, &dimensions)
            .await?
            .into_iter()
            .collect();

    let divergences = reconcile::compare(&system_side, &file_side);
    tracing::info!(
        batch_id = %batch.batch_id,
        reference_path = %request.reference_path,
        divergences = divergences.len(),
        "Reconciliation computed"
    );

    Ok(ReconciliationResponse {
        batch_id: batch.batch_id,
        report: ReconciliationReport {
            dimensions,
            divergences,
        },
        reference_rows_rejected: rejected,
    })
}

/// POST /volumetria/reconciliation
pub async fn run_reconciliation(
    State(state): State<AppState>,
    Json(request): Json<ReconciliationRequest>,
) -> ApiResult<Json<ReconciliationResponse>> {
    let response = build_report(&state, &request).await?;
    Ok(Json(response))
}

/// POST /volumetria/reconciliation/export
///
/// Same comparison, CSV body: one row per divergence.
pub async fn export_reconciliation(
    State(state): State<AppState>,
    Json(request): Json<ReconciliationRequest>,
) -> ApiResult<impl IntoResponse> {
    let response = build_report(&state, &request).await?;
    let csv_bytes = reconcile::export_csv(&response.report)?;
    let disposition = format!(
        "attachment; filename=\"reconciliation_{}.csv\"",
        request.batch_id
    );

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        csv_bytes,
    ))
}

/// Build reconciliation routes
pub fn reconciliation_routes() -> Router<AppState> {
    Router::new()
        .route("/volumetria/reconciliation", post(run_reconciliation))
        .route(
            "/volumetria/reconciliation/export",
            post(export_reconciliation),
        )
}
