//! Pricing API handler
//!
//! GET /volumetria/batches/{id}/pricing prices the committed facts of a
//! batch against each client's tier table. Groups without a matching
//! tier are returned explicitly, never folded into the total as zero.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::pricing::{self, PricingSummary};
use crate::reconcile::Dimension;
use crate::{db, AppState};

/// Per-client pricing over one batch
#[derive(Debug, Serialize)]
pub struct ClientPricing {
    pub client: String,
    #[serde(flatten)]
    pub summary: PricingSummary,
}

/// GET /volumetria/batches/{id}/pricing response
#[derive(Debug, Serialize)]
pub struct BatchPricingResponse {
    pub batch_id: Uuid,
    pub clients: Vec<ClientPricing>,
}

/// GET /volumetria/batches/{id}/pricing
pub async fn get_batch_pricing(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<BatchPricingResponse>> {
    let batch = db::batches::load_batch(&state.db, batch_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Batch {}", batch_id)))?;

    if !batch.status.is_terminal() {
        return Err(ApiError::Conflict(format!(
            "Batch {} is still {}; pricing runs over committed facts",
            batch_id,
            batch.status.as_str()
        )));
    }

    let dimensions = [
        Dimension::Client,
        Dimension::Modality,
        Dimension::Specialty,
        Dimension::Category,
        Dimension::Priority,
    ];
    let groups = db::facts::grouped_quantities(&state.db, batch_id, &dimensions).await?;

    // Regroup per client so each client prices against its own tiers
    let mut per_client: BTreeMap<String, Vec<((String, String, String, String), i64)>> =
        BTreeMap::new();
    for (key, quantity) in groups {
        let [client, modality, specialty, category, priority]: [String; 5] = key
            .try_into()
            .map_err(|_| ApiError::Internal("Unexpected grouping key shape".into()))?;
        per_client
            .entry(client)
            .or_default()
            .push(((modality, specialty, category, priority), quantity));
    }

    let mut clients = Vec::with_capacity(per_client.len());
    for (client, client_groups) in per_client {
        let tiers = db::reference::load_price_tiers(&state.db, &client).await?;
        let summary = pricing::summarize(&tiers, &client, &client_groups);
        clients.push(ClientPricing { client, summary });
    }

    Ok(Json(BatchPricingResponse { batch_id, clients }))
}

/// Build pricing routes
pub fn pricing_routes() -> Router<AppState> {
    Router::new().route("/volumetria/batches/:batch_id/pricing", get(get_batch_pricing))
}
