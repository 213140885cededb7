//! Storage Layer - SQLite records plus file blobs
//!
//! System of record is SQLite with tables:
//! - datasets(id, name, file_path, file_type, status, schema_info, ...)
//! - experiments(id, name, task_type, dataset_id, config, ...)
//! - runs(id, name, status, experiment_id, metrics, parameters, tags, ...)
//! - artifacts(id, run_id, name, artifact_type, uri, metadata, ...)
//!
//! Uploaded files, run logs and artifact files live under the data root in
//! `datasets/`, `runs/` and `artifacts/`, named by record id.

pub mod blobs;
pub mod schema;
pub mod sqlite;

pub use blobs::{BlobStore, PartialFile, StagedFile};
pub use sqlite::{DbStats, DeletedTree, RunFilter, RunMapping, Store};
