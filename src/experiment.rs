//! Experiment records - a named grouping of runs against one dataset

use crate::record::{ensure_mapping, required_text};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Kind of learning task an experiment targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Classification,
    Regression,
    Clustering,
    Nlp,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Classification => "classification",
            TaskType::Regression => "regression",
            TaskType::Clustering => "clustering",
            TaskType::Nlp => "nlp",
        }
    }

    /// Supervised tasks need a target column
    pub fn is_supervised(&self) -> bool {
        matches!(self, TaskType::Classification | TaskType::Regression)
    }
}

impl FromStr for TaskType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "classification" => Ok(TaskType::Classification),
            "regression" => Ok(TaskType::Regression),
            "clustering" => Ok(TaskType::Clustering),
            "nlp" => Ok(TaskType::Nlp),
            _ => Err(Error::Validation(format!("Unknown task type: {}", s))),
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub task_type: TaskType,
    pub dataset_id: String,
    pub target_column: Option<String>,
    pub config: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when creating an experiment
#[derive(Debug, Clone, Deserialize)]
pub struct NewExperiment {
    pub name: String,
    pub description: Option<String>,
    pub task_type: TaskType,
    pub dataset_id: String,
    pub target_column: Option<String>,
    pub config: Option<Value>,
}

impl NewExperiment {
    /// Check field shapes; foreign keys are checked by the store.
    pub fn validate(&self) -> Result<()> {
        required_text("name", &self.name)?;
        required_text("dataset_id", &self.dataset_id)?;
        if let Some(config) = &self.config {
            ensure_mapping("config", config)?;
        }
        Ok(())
    }
}

/// Partial update; absent fields are left untouched
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExperimentUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub target_column: Option<String>,
    pub config: Option<Value>,
}

impl ExperimentUpdate {
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            required_text("name", name)?;
        }
        if let Some(config) = &self.config {
            ensure_mapping("config", config)?;
        }
        Ok(())
    }

    /// Apply the update to an existing record
    pub fn apply(self, experiment: &mut Experiment) {
        if let Some(name) = self.name {
            experiment.name = name.trim().to_string();
        }
        if let Some(description) = self.description {
            experiment.description = Some(description);
        }
        if let Some(target) = self.target_column {
            experiment.target_column = Some(target);
        }
        if let Some(config) = self.config {
            experiment.config = config;
        }
    }
}
