//! Dataset ingestion and preview
//!
//! An upload is streamed to a partial file, parsed on a blocking thread,
//! and then either committed (file promoted, record marked ready) or
//! rolled back (file removed, record marked error).

use std::path::{Path, PathBuf};
use serde_json::{Map, Value};
use crate::dataset::{Dataset, DatasetStatus, FileType};
use crate::record::{self, required_text};
use crate::storage::{BlobStore, PartialFile, Store};
use crate::tabular::{self, ColumnSchema};
use crate::{Error, Result};

/// Default number of rows returned by a preview
pub const DEFAULT_PREVIEW_ROWS: usize = 100;

/// Upper bound on rows returned by a preview
pub const MAX_PREVIEW_ROWS: usize = 10_000;

/// Form fields that accompany an uploaded file
#[derive(Debug, Clone, Default)]
pub struct IngestRequest {
    pub name: String,
    pub description: Option<String>,
    pub target: Option<String>,
    pub sample_limit: Option<usize>,
}

/// An upload in progress, named by the dataset id it will become
pub struct Upload {
    id: String,
    file_type: FileType,
    partial: PartialFile,
}

impl Upload {
    /// Validate the file name and open a partial file for it
    pub async fn begin(blobs: &BlobStore, file_name: &str) -> Result<Self> {
        let file_type = FileType::from_file_name(file_name)?;
        let id = record::new_id();
        let partial = blobs
            .create_partial(blobs.dataset_path(&id, file_type.extension()))
            .await?;
        tracing::debug!("Receiving {} as dataset {}", file_name, id);
        Ok(Self { id, file_type, partial })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    pub async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.partial.write(chunk).await
    }
}

/// Rows loaded from a file and the statistics derived from them
struct Sampled {
    num_rows: u64,
    num_columns: u64,
    schema_info: Vec<ColumnSchema>,
}

/// Finish an upload: parse, infer the schema and commit.
///
/// Parse failures and an unknown target column persist an `error`
/// record and are reported as validation errors. In every failure case
/// the uploaded file is removed.
pub async fn ingest(
    store: &Store,
    blobs: &BlobStore,
    upload: Upload,
    request: IngestRequest,
    default_sample_limit: usize,
) -> Result<Dataset> {
    let name = required_text("name", &request.name)?;
    let sample_limit = request.sample_limit.unwrap_or(default_sample_limit);
    if sample_limit == 0 {
        return Err(Error::Validation("sample_limit must be at least 1".to_string()));
    }

    let Upload { id, file_type, partial } = upload;
    let staged = partial.finish().await?;

    let now = record::now();
    let mut dataset = Dataset {
        id,
        name,
        description: request.description,
        file_path: None,
        file_type,
        file_size: staged.size(),
        checksum: Some(staged.checksum().to_string()),
        num_rows: 0,
        num_columns: 0,
        target_column: request.target.clone(),
        status: DatasetStatus::Processing,
        error: None,
        schema_info: Vec::new(),
        created_at: now,
        updated_at: now,
    };
    store.insert_dataset(&dataset)?;

    let path = staged.path().to_path_buf();
    let target = request.target;
    let sampled = run_blocking(move || {
        let sampled = load_sample(&path, file_type, sample_limit)?;
        if let Some(target) = &target {
            if !sampled.schema_info.iter().any(|c| &c.name == target) {
                return Err(Error::Validation(format!(
                    "Target column '{}' not found in dataset",
                    target
                )));
            }
        }
        Ok(sampled)
    })
    .await;

    let sampled = match sampled {
        Ok(sampled) => sampled,
        Err(e) => {
            drop(staged);
            let detail = e.to_string();
            tracing::warn!("Ingestion of dataset {} failed: {}", dataset.id, detail);
            store.mark_dataset_error(&dataset.id, &detail)?;
            if e.is_parse_failure() {
                return Err(Error::Validation(format!("Failed to parse {} file: {}", file_type, e)));
            }
            return Err(e);
        }
    };

    let final_path = match staged.promote() {
        Ok(path) => path,
        Err(e) => {
            discard_commit(store, blobs, &dataset.id, None, &e);
            return Err(e);
        }
    };
    dataset.file_path = Some(final_path.to_string_lossy().into_owned());
    dataset.num_rows = sampled.num_rows;
    dataset.num_columns = sampled.num_columns;
    dataset.schema_info = sampled.schema_info;

    match store.mark_dataset_ready(&dataset) {
        Ok(stored) => {
            tracing::info!(
                "Ingested dataset {} ({} rows, {} columns)",
                stored.id,
                stored.num_rows,
                stored.num_columns
            );
            Ok(stored)
        }
        Err(e) => {
            discard_commit(store, blobs, &dataset.id, Some(&final_path), &e);
            Err(e)
        }
    }
}

/// Undo a commit that failed after parsing: remove the promoted file, if
/// any, and mark the record failed. Cleanup errors are logged so the
/// record never stays `processing`.
fn discard_commit(store: &Store, blobs: &BlobStore, id: &str, promoted: Option<&Path>, cause: &Error) {
    tracing::warn!("Could not commit dataset {}: {}", id, cause);
    if let Some(path) = promoted {
        if let Err(e) = blobs.remove_file(path) {
            tracing::warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
    if let Err(e) = store.mark_dataset_error(id, &cause.to_string()) {
        tracing::warn!("Could not mark dataset {} as failed: {}", id, e);
    }
}

fn load_sample(path: &Path, file_type: FileType, limit: usize) -> Result<Sampled> {
    let reader = tabular::reader_for(file_type);
    tracing::debug!("Sampling up to {} rows from {} file {}", limit, reader.file_type(), path.display());
    let table = reader.sample(path, limit)?;
    let schema_info = tabular::infer_schema(&table)?;
    Ok(Sampled {
        num_rows: table.num_rows() as u64,
        num_columns: table.num_columns() as u64,
        schema_info,
    })
}

/// First `n_rows` of a ready dataset as row objects.
///
/// `n_rows` defaults to [`DEFAULT_PREVIEW_ROWS`] and is capped at
/// [`MAX_PREVIEW_ROWS`].
pub async fn preview(dataset: &Dataset, n_rows: Option<usize>) -> Result<Vec<Map<String, Value>>> {
    let n_rows = n_rows.unwrap_or(DEFAULT_PREVIEW_ROWS);
    if n_rows == 0 {
        return Err(Error::Validation("n_rows must be at least 1".to_string()));
    }
    let n_rows = n_rows.min(MAX_PREVIEW_ROWS);

    let path = match (&dataset.file_path, dataset.status) {
        (Some(path), DatasetStatus::Ready) => PathBuf::from(path),
        _ => {
            return Err(Error::Conflict(format!(
                "Dataset {} is {} and cannot be previewed",
                dataset.id, dataset.status
            )));
        }
    };

    let file_type = dataset.file_type;
    run_blocking(move || tabular::reader_for(file_type).head(&path, n_rows)?.to_rows()).await
}

async fn run_blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Io(std::io::Error::other(format!("blocking task failed: {}", e))))?
}
