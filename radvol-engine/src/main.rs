//! radvol-engine - Volumetria normalization and billing-rule service
//!
//! Batch pipeline for teleradiology exam-volume uploads: parse, stage,
//! apply the ordered business rules, commit canonical facts or
//! reason-coded exclusions. Companion reconciliation and pricing
//! endpoints read the committed facts. Progress is observed by polling.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use radvol_engine::storage::LocalFsStorage;
use radvol_engine::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting radvol-engine");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let cli_data_folder = std::env::args().nth(1);
    let config = radvol_common::config::resolve_config(cli_data_folder.as_deref())?;
    radvol_common::config::ensure_data_folder(&config)?;

    let db_path = config.database_path();
    info!("Database: {}", db_path.display());
    let db = radvol_common::db::init_database(&db_path).await?;

    // Non-terminal batches from a previous run belong to dead worker
    // tasks; mark them failed so they can be resubmitted.
    let stale = radvol_engine::db::batches::cleanup_stale_batches(&db).await?;
    if stale > 0 {
        info!(stale, "Marked stale batches as failed on startup");
    }

    let storage = Arc::new(LocalFsStorage::new(&config.data_folder));
    let port = config.port;
    let state = AppState::new(db, config, storage);
    let app = radvol_engine::build_router(state);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    info!("Listening on http://127.0.0.1:{}", port);

    axum::serve(listener, app).await?;

    Ok(())
}
