use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use crate::server::SharedState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub storage: StorageHealth,
}

#[derive(Debug, Serialize)]
pub struct StorageHealth {
    pub database: &'static str,
    pub data_dir: &'static str,
}

fn label(ok: bool) -> &'static str {
    if ok { "ok" } else { "unavailable" }
}

/// Health check: `ok` when the database answers and the data root exists
pub async fn health_check(State(state): State<SharedState>) -> (StatusCode, Json<HealthResponse>) {
    let database_ok = match state.store.ping() {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Health check: database unavailable: {}", e);
            false
        }
    };
    let data_dir_ok = state.blobs.is_healthy();

    let (status, code) = if database_ok && data_dir_ok {
        ("ok", StatusCode::OK)
    } else {
        ("degraded", StatusCode::SERVICE_UNAVAILABLE)
    };

    let health = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        storage: StorageHealth {
            database: label(database_ok),
            data_dir: label(data_dir_ok),
        },
    };

    (code, Json(health))
}
