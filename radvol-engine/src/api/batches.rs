//! Batch API handlers
//!
//! POST /volumetria/batches, GET /volumetria/batches/{id},
//! POST /volumetria/batches/{id}/cancel, exclusion listing and export.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{Batch, BatchStatus, ExclusionSummary, BillingWindow};
use crate::{db, workflow, AppState};

/// POST /volumetria/batches request
#[derive(Debug, Deserialize)]
pub struct SubmitBatchRequest {
    /// Storage path of the uploaded file, resolved via blob storage
    pub upload_path: String,
    /// Already-authenticated caller identity, audit attribution only
    pub submitted_by: String,
}

/// POST /volumetria/batches response
#[derive(Debug, Serialize)]
pub struct SubmitBatchResponse {
    pub batch_id: Uuid,
    pub status: BatchStatus,
    pub started_at: chrono::DateTime<Utc>,
}

/// GET /volumetria/batches/{id} response, the polled status record
#[derive(Debug, Serialize)]
pub struct BatchStatusResponse {
    pub batch_id: Uuid,
    pub source_file_name: String,
    pub status: BatchStatus,
    pub rows_total: u64,
    pub rows_processed: u64,
    pub rows_inserted: u64,
    pub rows_error: u64,
    pub started_at: chrono::DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<chrono::DateTime<Utc>>,
    pub detail: String,
    pub exclusions: ExclusionSummary,
}

impl BatchStatusResponse {
    fn from_batch(batch: Batch, exclusions: ExclusionSummary) -> Self {
        Self {
            batch_id: batch.batch_id,
            source_file_name: batch.source_file,
            status: batch.status,
            rows_total: batch.progress.rows_total,
            rows_processed: batch.progress.rows_processed,
            rows_inserted: batch.progress.rows_inserted,
            rows_error: batch.progress.rows_error,
            started_at: batch.started_at,
            completed_at: batch.completed_at,
            detail: batch.detail,
            exclusions,
        }
    }
}

/// POST /volumetria/batches
///
/// Enqueue a batch for the uploaded file and return immediately;
/// processing runs in a background task observed by polling.
pub async fn submit_batch(
    State(state): State<AppState>,
    Json(request): Json<SubmitBatchRequest>,
) -> ApiResult<(StatusCode, Json<SubmitBatchResponse>)> {
    if request.submitted_by.trim().is_empty() {
        return Err(ApiError::BadRequest("submitted_by must not be empty".into()));
    }

    let bytes = state.storage.download_by_path(&request.upload_path).await?;
    let source_file = request
        .upload_path
        .rsplit('/')
        .next()
        .unwrap_or(&request.upload_path)
        .to_string();

    let batch = workflow::prepare_batch(&state.db, &source_file, &bytes, &request.submitted_by)
        .await
        .map_err(|e| match e {
            radvol_common::Error::InvalidInput(msg) => ApiError::Conflict(msg),
            other => ApiError::from(other),
        })?;

    let response = SubmitBatchResponse {
        batch_id: batch.batch_id,
        status: batch.status,
        started_at: batch.started_at,
    };

    let token = CancellationToken::new();
    state
        .cancellation_tokens
        .write()
        .await
        .insert(batch.batch_id, token.clone());

    tracing::info!(
        batch_id = %batch.batch_id,
        source_file = %source_file,
        submitted_by = %request.submitted_by,
        "Batch submitted"
    );

    let state_clone = state.clone();
    let batch_id = batch.batch_id;
    let chunk_size = state.config.chunk_size;
    tokio::spawn(async move {
        let window = BillingWindow::for_month(Utc::now().date_naive());
        workflow::run_batch(&state_clone.db, batch, &bytes, chunk_size, window, token).await;
        state_clone.cancellation_tokens.write().await.remove(&batch_id);
    });

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// GET /volumetria/batches/{id}
pub async fn get_batch_status(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<BatchStatusResponse>> {
    let batch = db::batches::load_batch(&state.db, batch_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Batch {}", batch_id)))?;
    let exclusions = db::exclusions::summary_for_batch(&state.db, batch_id).await?;

    Ok(Json(BatchStatusResponse::from_batch(batch, exclusions)))
}

/// POST /volumetria/batches/{id}/cancel response
#[derive(Debug, Serialize)]
pub struct CancelBatchResponse {
    pub batch_id: Uuid,
    pub status: BatchStatus,
    pub cancellation_requested: bool,
}

/// POST /volumetria/batches/{id}/cancel
///
/// Cooperative: sets the batch's cancellation flag; the worker observes
/// it between chunks and ends the batch `cancelado`.
pub async fn cancel_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<CancelBatchResponse>> {
    let batch = db::batches::load_batch(&state.db, batch_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Batch {}", batch_id)))?;

    if batch.status.is_terminal() {
        return Err(ApiError::Conflict(format!(
            "Batch {} already {}",
            batch_id,
            batch.status.as_str()
        )));
    }

    let requested = match state.cancellation_tokens.read().await.get(&batch_id) {
        Some(token) => {
            token.cancel();
            true
        }
        None => false,
    };

    tracing::info!(%batch_id, requested, "Batch cancellation requested");

    Ok(Json(CancelBatchResponse {
        batch_id,
        status: batch.status,
        cancellation_requested: requested,
    }))
}

/// GET /volumetria/batches/{id}/exclusions
pub async fn list_exclusions(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<Vec<crate::models::ExclusionRecord>>> {
    let batch = db::batches::load_batch(&state.db, batch_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Batch {}", batch_id)))?;

    let records = db::exclusions::query_by_source_file(&state.db, &batch.source_file).await?;
    Ok(Json(records))
}

/// GET /volumetria/batches/{id}/exclusions/export
///
/// CSV, one row per exclusion record with the original payload.
pub async fn export_exclusions(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let batch = db::batches::load_batch(&state.db, batch_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Batch {}", batch_id)))?;

    let csv_bytes = db::exclusions::export_csv(&state.db, &batch.source_file).await?;
    let disposition = format!(
        "attachment; filename=\"exclusions_{}.csv\"",
        batch.batch_id
    );

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        csv_bytes,
    ))
}

/// Build batch routes
pub fn batch_routes() -> Router<AppState> {
    Router::new()
        .route("/volumetria/batches", post(submit_batch))
        .route("/volumetria/batches/:batch_id", get(get_batch_status))
        .route("/volumetria/batches/:batch_id/cancel", post(cancel_batch))
        .route(
            "/volumetria/batches/:batch_id/exclusions",
            get(list_exclusions),
        )
        .route(
            "/volumetria/batches/:batch_id/exclusions/export",
            get(export_exclusions),
        )
}
