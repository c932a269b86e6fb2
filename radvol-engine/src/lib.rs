//! radvol-engine library interface
//!
//! Exposes the pipeline modules for integration testing.

pub mod api;
pub mod db;
pub mod error;
pub mod ingest;
pub mod models;
pub mod pricing;
pub mod reconcile;
pub mod rules;
pub mod storage;
pub mod workflow;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use radvol_common::config::ServiceConfig;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::storage::BlobStorage;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Resolved service configuration
    pub config: Arc<ServiceConfig>,
    /// Blob storage behind the upload paths
    pub storage: Arc<dyn BlobStorage>,
    /// Cancellation tokens for batches in flight
    pub cancellation_tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    /// Service startup timestamp for uptime reporting
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, config: ServiceConfig, storage: Arc<dyn BlobStorage>) -> Self {
        Self {
            db,
            config: Arc::new(config),
            storage,
            cancellation_tokens: Arc::new(RwLock::new(HashMap::new())),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::batch_routes())
        .merge(api::pricing_routes())
        .merge(api::reconciliation_routes())
        .merge(api::health_routes())
        .with_state(state)
}
