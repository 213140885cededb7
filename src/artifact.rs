//! Artifact records - files or objects produced by a run

use crate::record::{self, ensure_mapping, required_text};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Content type assumed when the client does not send one
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
    Model,
    Plot,
    Data,
    #[default]
    Other,
}

impl ArtifactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::Model => "model",
            ArtifactType::Plot => "plot",
            ArtifactType::Data => "data",
            ArtifactType::Other => "other",
        }
    }
}

impl FromStr for ArtifactType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "model" => Ok(ArtifactType::Model),
            "plot" => Ok(ArtifactType::Plot),
            "data" => Ok(ArtifactType::Data),
            "other" => Ok(ArtifactType::Other),
            _ => Err(Error::Validation(format!("Unknown artifact type: {}", s))),
        }
    }
}

impl std::fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An artifact record.
///
/// `uri` is either a path under the artifacts directory (for uploaded
/// files) or an external location supplied by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub run_id: String,
    pub name: String,
    pub artifact_type: ArtifactType,
    pub uri: String,
    pub content_type: String,
    pub size: Option<u64>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when registering an artifact
#[derive(Debug, Clone, Deserialize)]
pub struct NewArtifact {
    pub run_id: String,
    pub name: String,
    #[serde(default)]
    pub artifact_type: ArtifactType,
    pub uri: String,
    pub content_type: Option<String>,
    pub metadata: Option<Value>,
}

impl NewArtifact {
    pub fn validate(&self) -> Result<()> {
        required_text("run_id", &self.run_id)?;
        required_text("name", &self.name)?;
        required_text("uri", &self.uri)?;
        if let Some(metadata) = &self.metadata {
            ensure_mapping("metadata", metadata)?;
        }
        Ok(())
    }

    /// Build the record to insert, stamped with the current time
    pub fn into_artifact(self, id: String, size: Option<u64>) -> Artifact {
        let now = record::now();
        Artifact {
            id,
            run_id: self.run_id.trim().to_string(),
            name: self.name.trim().to_string(),
            artifact_type: self.artifact_type,
            uri: self.uri.trim().to_string(),
            content_type: self
                .content_type
                .filter(|ct| !ct.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            size,
            metadata: self.metadata.unwrap_or_else(record::empty_mapping),
            created_at: now,
            updated_at: now,
        }
    }
}
