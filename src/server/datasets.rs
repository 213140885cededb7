use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::QueryRejection,
        Multipart, Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use crate::dataset::{Dataset, DatasetStatus, FileType};
use crate::ingest::{self, IngestRequest, Upload};
use crate::record::Page;
use crate::server::SharedState;
use crate::tabular::ColumnSchema;
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
pub struct PreviewParams {
    pub n_rows: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteParams {
    #[serde(default)]
    pub cascade: bool,
}

/// Schema summary served by `/stats`
#[derive(Debug, Serialize)]
pub struct DatasetStats {
    pub id: String,
    pub name: String,
    pub status: DatasetStatus,
    pub file_type: FileType,
    pub num_rows: u64,
    pub num_columns: u64,
    pub target_column: Option<String>,
    pub columns: Vec<ColumnSchema>,
}

fn optional_text(text: String) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
}

/// Ingest an uploaded file (multipart: file, name, description?, target?, sample_limit?)
pub async fn ingest_dataset(
    State(state): State<SharedState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<Dataset>)> {
    let mut multipart = multipart?;
    let mut request = IngestRequest::default();
    let mut upload: Option<Upload> = None;

    while let Some(mut field) = multipart.next_field().await? {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "file" => {
                if upload.is_some() {
                    return Err(Error::Validation("Only one file may be uploaded".to_string()));
                }
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| Error::Validation("file field has no file name".to_string()))?;
                let mut incoming = Upload::begin(&state.blobs, &file_name).await?;
                while let Some(chunk) = field.chunk().await? {
                    incoming.write(&chunk).await?;
                }
                tracing::debug!("Finished receiving {} upload for dataset {}", incoming.file_type(), incoming.id());
                upload = Some(incoming);
            }
            "name" => request.name = field.text().await?,
            "description" => request.description = optional_text(field.text().await?),
            "target" => request.target = optional_text(field.text().await?),
            "sample_limit" => {
                let text = field.text().await?;
                if let Some(text) = optional_text(text) {
                    let limit = text.parse::<usize>().map_err(|_| {
                        Error::Validation(format!("sample_limit must be a positive integer, got '{}'", text))
                    })?;
                    request.sample_limit = Some(limit);
                }
            }
            other => tracing::debug!("Ignoring form field {}", other),
        }
    }

    let upload = upload.ok_or_else(|| Error::Validation("Missing file field".to_string()))?;
    let dataset = ingest::ingest(
        &state.store,
        &state.blobs,
        upload,
        request,
        state.settings.sample_limit,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(dataset)))
}

pub async fn list_datasets(
    State(state): State<SharedState>,
    page: std::result::Result<Query<Page>, QueryRejection>,
) -> Result<Json<Vec<Dataset>>> {
    let Query(page) = page?;
    Ok(Json(state.store.list_datasets(page)?))
}

fn find_dataset(state: &SharedState, id: &str) -> Result<Dataset> {
    state
        .store
        .get_dataset(id)?
        .ok_or_else(|| Error::NotFound(format!("Dataset {}", id)))
}

pub async fn get_dataset(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Dataset>> {
    Ok(Json(find_dataset(&state, &id)?))
}

/// First rows of a ready dataset
pub async fn preview_dataset(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    params: std::result::Result<Query<PreviewParams>, QueryRejection>,
) -> Result<Json<Vec<Map<String, Value>>>> {
    let Query(params) = params?;
    let dataset = find_dataset(&state, &id)?;
    let n_rows = params.n_rows.unwrap_or(state.settings.preview_rows);
    Ok(Json(ingest::preview(&dataset, Some(n_rows)).await?))
}

/// Stored schema and counts, without re-reading the file
pub async fn dataset_stats(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<DatasetStats>> {
    let dataset = find_dataset(&state, &id)?;
    Ok(Json(DatasetStats {
        id: dataset.id,
        name: dataset.name,
        status: dataset.status,
        file_type: dataset.file_type,
        num_rows: dataset.num_rows,
        num_columns: dataset.num_columns,
        target_column: dataset.target_column,
        columns: dataset.schema_info,
    }))
}

pub async fn delete_dataset(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    params: std::result::Result<Query<DeleteParams>, QueryRejection>,
) -> Result<StatusCode> {
    let Query(params) = params?;
    let tree = state.store.delete_dataset(&id, params.cascade)?;
    state.blobs.remove_tree(&tree);
    tracing::info!(
        "Deleted dataset {} ({} experiments, {} runs, {} artifacts)",
        id,
        tree.experiment_ids.len(),
        tree.run_ids.len(),
        tree.artifact_ids.len()
    );
    Ok(StatusCode::NO_CONTENT)
}
