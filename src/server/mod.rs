//! HTTP API
//!
//! All routes live under `/api`. Handlers share one [`AppState`] holding
//! the record store, the blob store and the resolved settings.

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::compression::{predicate::SizeAbove, CompressionLayer};
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tower_http::trace::TraceLayer;
use crate::config::{ensure_db_dir, Settings};
use crate::storage::{BlobStore, Store};

pub mod artifacts;
pub mod datasets;
pub mod error;
pub mod experiments;
pub mod health;
pub mod runs;

pub use error::ErrorResponse;

/// Server state
pub struct AppState {
    pub store: Store,
    pub blobs: BlobStore,
    pub settings: Settings,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Open (and if needed create) the database and data directories
    pub fn open(settings: Settings) -> crate::Result<Self> {
        let blobs = BlobStore::open(&settings.data_dir)?;
        let store = Store::open(&settings.database)?;
        let failed = store.fail_interrupted_datasets()?;
        if failed > 0 {
            tracing::warn!("Marked {} interrupted dataset ingestions as failed", failed);
        }
        Ok(Self { store, blobs, settings })
    }
}

/// Build the API router with its middleware stack
pub fn build_router(state: SharedState) -> Router {
    let upload_limit = DefaultBodyLimit::max(state.settings.max_upload_bytes);

    let uploads = Router::new()
        .route("/api/datasets/ingest", post(datasets::ingest_dataset))
        .route("/api/artifacts/upload", post(artifacts::upload_artifact))
        .layer(upload_limit);

    let api = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/datasets", get(datasets::list_datasets))
        .route(
            "/api/datasets/{id}",
            get(datasets::get_dataset).delete(datasets::delete_dataset),
        )
        .route("/api/datasets/{id}/preview", get(datasets::preview_dataset))
        .route("/api/datasets/{id}/stats", get(datasets::dataset_stats))
        .route(
            "/api/experiments",
            get(experiments::list_experiments).post(experiments::create_experiment),
        )
        .route(
            "/api/experiments/{id}",
            get(experiments::get_experiment)
                .patch(experiments::update_experiment)
                .delete(experiments::delete_experiment),
        )
        .route("/api/experiments/{id}/runs", get(experiments::list_experiment_runs))
        .route("/api/runs", get(runs::list_runs).post(runs::create_run))
        .route(
            "/api/runs/{id}",
            get(runs::get_run).patch(runs::update_run).delete(runs::delete_run),
        )
        .route("/api/runs/{id}/metrics", post(runs::log_metrics))
        .route("/api/runs/{id}/params", post(runs::log_params))
        .route("/api/runs/{id}/logs", get(runs::read_logs).post(runs::append_logs))
        .route(
            "/api/artifacts",
            get(artifacts::list_artifacts).post(artifacts::create_artifact),
        )
        .route(
            "/api/artifacts/{id}",
            get(artifacts::get_artifact).delete(artifacts::delete_artifact),
        )
        .route("/api/artifacts/{id}/download", get(artifacts::download_artifact));

    let compression = CompressionLayer::new()
        .compress_when(SizeAbove::new(state.settings.compression_min_bytes));

    api.merge(uploads)
        .layer(cors_layer(&state.settings.cors_origin))
        .layer(compression)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request());

    match HeaderValue::from_str(origin) {
        Ok(origin) => cors.allow_origin(origin),
        Err(_) => {
            tracing::warn!("Ignoring invalid CORS origin {:?}", origin);
            cors
        }
    }
}

pub async fn start_server(settings: Settings) -> anyhow::Result<()> {
    ensure_db_dir(&settings.database)?;
    let addr = settings.bind_addr();
    let state = Arc::new(AppState::open(settings)?);
    let app = build_router(state.clone());

    tracing::info!(
        "Data root {} (database {})",
        state.blobs.root().display(),
        state.settings.database.display()
    );
    tracing::info!("Starting server on {}", addr);
    println!("🧪 Playground API running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
