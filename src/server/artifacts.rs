use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::{JsonRejection, QueryRejection},
        Multipart, Path, Query, State,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode},
    Json,
};
use serde::Deserialize;
use crate::artifact::{Artifact, ArtifactType, NewArtifact};
use crate::record::{self, Page, DEFAULT_LIMIT};
use crate::server::SharedState;
use crate::storage::StagedFile;
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
pub struct ListArtifactsParams {
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
    pub run_id: Option<String>,
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

fn find_artifact(state: &SharedState, id: &str) -> Result<Artifact> {
    state
        .store
        .get_artifact(id)?
        .ok_or_else(|| Error::NotFound(format!("Artifact {}", id)))
}

/// Register an artifact stored elsewhere; the client supplies the uri.
///
/// Files under the data root are only reachable through uploads.
pub async fn create_artifact(
    State(state): State<SharedState>,
    payload: std::result::Result<Json<NewArtifact>, JsonRejection>,
) -> Result<(StatusCode, Json<Artifact>)> {
    let Json(payload) = payload?;
    payload.validate()?;
    if state.blobs.contains(payload.uri.trim()) {
        return Err(Error::Validation(
            "uri must not point into the server's data directory; upload the file instead".to_string(),
        ));
    }
    let artifact = payload.into_artifact(record::new_id(), None);
    state.store.insert_artifact(&artifact)?;
    Ok((StatusCode::CREATED, Json(artifact)))
}

/// Upload an artifact file (multipart: file, run_id, name, artifact_type?,
/// content_type?, metadata?)
pub async fn upload_artifact(
    State(state): State<SharedState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<Artifact>)> {
    let mut multipart = multipart?;
    let id = record::new_id();
    let mut staged: Option<StagedFile> = None;
    let mut part_content_type: Option<String> = None;
    let mut run_id = String::new();
    let mut name: Option<String> = None;
    let mut artifact_type = ArtifactType::default();
    let mut content_type: Option<String> = None;
    let mut metadata = None;

    while let Some(mut field) = multipart.next_field().await? {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "file" => {
                if staged.is_some() {
                    return Err(Error::Validation("Only one file may be uploaded".to_string()));
                }
                let file_name = field.file_name().unwrap_or_default().to_string();
                let extension = std::path::Path::new(&file_name)
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(str::to_lowercase);
                part_content_type = field.content_type().map(str::to_string);
                if name.is_none() && !file_name.is_empty() {
                    name = Some(file_name.clone());
                }

                let final_path = state.blobs.artifact_path(&id, extension.as_deref());
                let mut partial = state.blobs.create_partial(final_path).await?;
                while let Some(chunk) = field.chunk().await? {
                    partial.write(&chunk).await?;
                }
                staged = Some(partial.finish().await?);
            }
            "run_id" => run_id = field.text().await?,
            "name" => name = Some(field.text().await?),
            "artifact_type" => artifact_type = field.text().await?.trim().parse()?,
            "content_type" => content_type = Some(field.text().await?),
            "metadata" => {
                let text = field.text().await?;
                if !text.trim().is_empty() {
                    metadata = Some(serde_json::from_str(&text).map_err(|e| {
                        Error::Validation(format!("metadata is not valid JSON: {}", e))
                    })?);
                }
            }
            other => tracing::debug!("Ignoring form field {}", other),
        }
    }

    let staged = staged.ok_or_else(|| Error::Validation("Missing file field".to_string()))?;
    let size = staged.size();
    let new = NewArtifact {
        run_id,
        name: name.unwrap_or_default(),
        artifact_type,
        uri: staged.final_path().to_string_lossy().into_owned(),
        content_type: content_type.or(part_content_type),
        metadata,
    };
    new.validate()?;
    if state.store.get_run(new.run_id.trim())?.is_none() {
        return Err(Error::NotFound(format!("Run {}", new.run_id.trim())));
    }

    let artifact = new.into_artifact(id, Some(size));
    let final_path = staged.promote()?;
    if let Err(e) = state.store.insert_artifact(&artifact) {
        if let Err(remove_err) = state.blobs.remove_file(&final_path) {
            tracing::warn!("Failed to remove {}: {}", final_path.display(), remove_err);
        }
        return Err(e);
    }

    tracing::info!("Stored artifact {} for run {} ({} bytes)", artifact.id, artifact.run_id, size);
    Ok((StatusCode::CREATED, Json(artifact)))
}

pub async fn list_artifacts(
    State(state): State<SharedState>,
    params: std::result::Result<Query<ListArtifactsParams>, QueryRejection>,
) -> Result<Json<Vec<Artifact>>> {
    let Query(params) = params?;
    let page = Page::new(params.skip, params.limit);
    Ok(Json(state.store.list_artifacts(page, params.run_id.as_deref())?))
}

pub async fn get_artifact(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Artifact>> {
    Ok(Json(find_artifact(&state, &id)?))
}

/// Serve the stored file of an uploaded artifact
pub async fn download_artifact(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<(HeaderMap, Vec<u8>)> {
    let artifact = find_artifact(&state, &id)?;
    if !state.blobs.owns_artifact(&artifact.uri) {
        return Err(Error::NotFound(format!("Stored file for artifact {}", id)));
    }

    let bytes = match tokio::fs::read(&artifact.uri).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound(format!("Stored file for artifact {}", id)));
        }
        Err(e) => return Err(e.into()),
    };

    let mut headers = HeaderMap::new();
    let content_type = HeaderValue::from_str(&artifact.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);
    let disposition = format!("attachment; filename=\"{}\"", attachment_name(&artifact.name));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok((headers, bytes))
}

/// Artifact name reduced to characters safe inside a quoted header value
fn attachment_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .filter(|c| *c != '"' && *c != '\\')
        .collect();
    if cleaned.trim().is_empty() { "artifact".to_string() } else { cleaned }
}

pub async fn delete_artifact(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let tree = state.store.delete_artifact(&id)?;
    state.blobs.remove_tree(&tree);
    Ok(StatusCode::NO_CONTENT)
}
