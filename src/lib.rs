//! # Playground - experiment tracking backend
//!
//! Dataset ingestion with schema inference, plus experiment, run and
//! artifact records for ML experimentation.
//!
//! Playground provides:
//! - SQLite-backed storage for datasets, experiments, runs and artifacts
//! - File-based blob storage for uploads, run logs and artifacts
//! - Arrow-based readers for CSV, JSON, JSON Lines and Parquet
//! - Per-column schema inference over sampled rows
//! - An axum HTTP API under `/api`

pub mod record;
pub mod dataset;
pub mod experiment;
pub mod run;
pub mod artifact;
pub mod storage;
pub mod tabular;
pub mod ingest;
pub mod server;
pub mod config;

// Re-exports for convenient access
pub use dataset::{Dataset, DatasetStatus, FileType};
pub use experiment::{Experiment, TaskType};
pub use run::{Run, RunStatus};
pub use artifact::{Artifact, ArtifactType};
pub use storage::{BlobStore, Store};

/// Result type alias for Playground operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Playground operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Machine-readable error kind reported to API clients
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::UnsupportedFormat(_) => "unsupported_format",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::Storage(_)
            | Error::Io(_)
            | Error::Arrow(_)
            | Error::Parquet(_)
            | Error::Json(_) => "storage_error",
        }
    }

    /// Whether this error came out of reading tabular content
    pub fn is_parse_failure(&self) -> bool {
        matches!(self, Error::Arrow(_) | Error::Parquet(_) | Error::Json(_))
    }
}
