use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::record::{Page, DEFAULT_LIMIT};
use crate::run::{NewRun, Run, RunStatus, RunUpdate};
use crate::server::datasets::DeleteParams;
use crate::server::SharedState;
use crate::storage::{RunFilter, RunMapping};
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
pub struct ListRunsParams {
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
    pub experiment_id: Option<String>,
    pub status: Option<RunStatus>,
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

#[derive(Debug, Deserialize)]
pub struct AppendLogRequest {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunLog {
    pub run_id: String,
    pub text: String,
}

fn find_run(state: &SharedState, id: &str) -> Result<Run> {
    state
        .store
        .get_run(id)?
        .ok_or_else(|| Error::NotFound(format!("Run {}", id)))
}

pub async fn create_run(
    State(state): State<SharedState>,
    payload: std::result::Result<Json<NewRun>, JsonRejection>,
) -> Result<(StatusCode, Json<Run>)> {
    let Json(payload) = payload?;
    let run = state.store.insert_run(payload)?;
    tracing::info!("Created run {} in experiment {}", run.id, run.experiment_id);
    Ok((StatusCode::CREATED, Json(run)))
}

pub async fn list_runs(
    State(state): State<SharedState>,
    params: std::result::Result<Query<ListRunsParams>, QueryRejection>,
) -> Result<Json<Vec<Run>>> {
    let Query(params) = params?;
    let filter = RunFilter {
        experiment_id: params.experiment_id,
        status: params.status,
    };
    let page = Page::new(params.skip, params.limit);
    Ok(Json(state.store.list_runs(page, &filter)?))
}

pub async fn get_run(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Run>> {
    Ok(Json(find_run(&state, &id)?))
}

pub async fn update_run(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<RunUpdate>, JsonRejection>,
) -> Result<Json<Run>> {
    let Json(payload) = payload?;
    let run = state.store.update_run(&id, payload)?;
    match run.duration_secs() {
        Some(secs) if run.status.is_terminal() => {
            tracing::info!("Run {} finished as {} after {:.1}s", run.id, run.status, secs)
        }
        _ => tracing::debug!("Run {} is {}", run.id, run.status),
    }
    Ok(Json(run))
}

pub async fn delete_run(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    params: std::result::Result<Query<DeleteParams>, QueryRejection>,
) -> Result<StatusCode> {
    let Query(params) = params?;
    let tree = state.store.delete_run(&id, params.cascade)?;
    state.blobs.remove_tree(&tree);
    tracing::info!("Deleted run {} ({} artifacts)", id, tree.artifact_ids.len());
    Ok(StatusCode::NO_CONTENT)
}

/// Merge keys into the run's metrics
pub async fn log_metrics(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<Run>> {
    let Json(metrics) = payload?;
    Ok(Json(state.store.merge_run_mapping(&id, RunMapping::Metrics, metrics)?))
}

/// Merge keys into the run's parameters
pub async fn log_params(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<Run>> {
    let Json(params) = payload?;
    Ok(Json(state.store.merge_run_mapping(&id, RunMapping::Parameters, params)?))
}

pub async fn append_logs(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<AppendLogRequest>, JsonRejection>,
) -> Result<StatusCode> {
    let Json(payload) = payload?;
    find_run(&state, &id)?;
    if payload.text.is_empty() {
        return Err(Error::Validation("text must not be empty".to_string()));
    }
    state.blobs.append_run_log(&id, &payload.text).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn read_logs(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<RunLog>> {
    find_run(&state, &id)?;
    let text = state.blobs.read_run_log(&id).await?;
    Ok(Json(RunLog { run_id: id, text }))
}
