use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use crate::experiment::{Experiment, ExperimentUpdate, NewExperiment};
use crate::record::{Page, DEFAULT_LIMIT};
use crate::run::Run;
use crate::server::datasets::DeleteParams;
use crate::server::SharedState;
use crate::storage::RunFilter;
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
pub struct ListExperimentsParams {
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
    pub dataset_id: Option<String>,
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

pub async fn create_experiment(
    State(state): State<SharedState>,
    payload: std::result::Result<Json<NewExperiment>, JsonRejection>,
) -> Result<(StatusCode, Json<Experiment>)> {
    let Json(payload) = payload?;
    let experiment = state.store.insert_experiment(payload)?;
    if experiment.task_type.is_supervised() && experiment.target_column.is_none() {
        tracing::warn!("Experiment {} is {} but has no target column", experiment.id, experiment.task_type);
    }
    tracing::info!("Created experiment {} on dataset {}", experiment.id, experiment.dataset_id);
    Ok((StatusCode::CREATED, Json(experiment)))
}

pub async fn list_experiments(
    State(state): State<SharedState>,
    params: std::result::Result<Query<ListExperimentsParams>, QueryRejection>,
) -> Result<Json<Vec<Experiment>>> {
    let Query(params) = params?;
    let page = Page::new(params.skip, params.limit);
    Ok(Json(state.store.list_experiments(page, params.dataset_id.as_deref())?))
}

pub async fn get_experiment(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Experiment>> {
    state
        .store
        .get_experiment(&id)?
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("Experiment {}", id)))
}

pub async fn update_experiment(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<ExperimentUpdate>, JsonRejection>,
) -> Result<Json<Experiment>> {
    let Json(payload) = payload?;
    Ok(Json(state.store.update_experiment(&id, payload)?))
}

pub async fn delete_experiment(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    params: std::result::Result<Query<DeleteParams>, QueryRejection>,
) -> Result<StatusCode> {
    let Query(params) = params?;
    let tree = state.store.delete_experiment(&id, params.cascade)?;
    state.blobs.remove_tree(&tree);
    tracing::info!("Deleted experiment {} ({} runs)", id, tree.run_ids.len());
    Ok(StatusCode::NO_CONTENT)
}

/// Runs belonging to one experiment
pub async fn list_experiment_runs(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    page: std::result::Result<Query<Page>, QueryRejection>,
) -> Result<Json<Vec<Run>>> {
    let Query(page) = page?;
    if state.store.get_experiment(&id)?.is_none() {
        return Err(Error::NotFound(format!("Experiment {}", id)));
    }
    let filter = RunFilter { experiment_id: Some(id), status: None };
    Ok(Json(state.store.list_runs(page, &filter)?))
}
