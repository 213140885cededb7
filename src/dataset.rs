//! Dataset records - an uploaded tabular file plus derived metadata

use crate::tabular::ColumnSchema;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Lifecycle of an uploaded dataset.
///
/// `uploading -> processing -> ready | error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetStatus {
    Uploading,
    Processing,
    Ready,
    Error,
}

impl DatasetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetStatus::Uploading => "uploading",
            DatasetStatus::Processing => "processing",
            DatasetStatus::Ready => "ready",
            DatasetStatus::Error => "error",
        }
    }

    /// Whether the dataset may move from `self` to `next`
    pub fn can_transition_to(&self, next: DatasetStatus) -> bool {
        matches!(
            (self, next),
            (DatasetStatus::Uploading, DatasetStatus::Processing)
                | (DatasetStatus::Uploading, DatasetStatus::Error)
                | (DatasetStatus::Processing, DatasetStatus::Ready)
                | (DatasetStatus::Processing, DatasetStatus::Error)
        )
    }
}

impl FromStr for DatasetStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "uploading" => Ok(DatasetStatus::Uploading),
            "processing" => Ok(DatasetStatus::Processing),
            "ready" => Ok(DatasetStatus::Ready),
            "error" => Ok(DatasetStatus::Error),
            _ => Err(Error::Validation(format!("Unknown dataset status: {}", s))),
        }
    }
}

impl std::fmt::Display for DatasetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Supported upload formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Csv,
    Json,
    Jsonl,
    Parquet,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Csv => "csv",
            FileType::Json => "json",
            FileType::Jsonl => "jsonl",
            FileType::Parquet => "parquet",
        }
    }

    /// File extension used for stored copies
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    /// Detect the format from an uploaded file name's extension
    pub fn from_file_name(name: &str) -> Result<Self> {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| {
                Error::UnsupportedFormat(format!("File '{}' has no extension", name))
            })?;
        ext.parse()
    }
}

impl FromStr for FileType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(FileType::Csv),
            "json" => Ok(FileType::Json),
            "jsonl" | "ndjson" => Ok(FileType::Jsonl),
            "parquet" => Ok(FileType::Parquet),
            other => Err(Error::UnsupportedFormat(format!(
                "Unsupported file type: {} (expected csv, json, jsonl or parquet)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A dataset record.
///
/// `file_path` is `None` only for datasets whose ingestion failed; the
/// uploaded bytes are discarded in that case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub file_path: Option<String>,
    pub file_type: FileType,
    /// Size of the uploaded file in bytes
    pub file_size: u64,
    /// blake3 digest of the uploaded bytes
    pub checksum: Option<String>,
    pub num_rows: u64,
    pub num_columns: u64,
    pub target_column: Option<String>,
    pub status: DatasetStatus,
    pub error: Option<String>,
    pub schema_info: Vec<ColumnSchema>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Dataset {
    /// Look up a column's statistics by name
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.schema_info.iter().find(|c| c.name == name)
    }

    pub fn is_ready(&self) -> bool {
        self.status == DatasetStatus::Ready && self.file_path.is_some()
    }
}
