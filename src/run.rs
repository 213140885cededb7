//! Run records - one execution attempt within an experiment
//!
//! Runs move through `pending -> running -> {completed | failed | cancelled}`.
//! Entering `running` stamps `start_time`; entering a terminal state stamps
//! `end_time`, so `end_time >= start_time` always holds.

use crate::record::{ensure_mapping, required_text};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled)
    }

    /// Whether a run may move from `self` to `next`
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        match (self, next) {
            (RunStatus::Pending, RunStatus::Running) => true,
            (RunStatus::Pending, RunStatus::Failed | RunStatus::Cancelled) => true,
            (RunStatus::Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" | "canceled" => Ok(RunStatus::Cancelled),
            _ => Err(Error::Validation(format!("Unknown run status: {}", s))),
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub status: RunStatus,
    pub experiment_id: String,
    pub pipeline_config: Value,
    pub metrics: Value,
    pub parameters: Value,
    pub tags: BTreeMap<String, String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub git_commit: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    /// Move to `next`, stamping start/end times.
    ///
    /// Setting the current status again is a no-op.
    pub fn transition(&mut self, next: RunStatus, at: DateTime<Utc>) -> Result<()> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(Error::Conflict(format!(
                "Run {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        if next == RunStatus::Running && self.start_time.is_none() {
            self.start_time = Some(at);
        }
        if next.is_terminal() {
            let start = *self.start_time.get_or_insert(at);
            self.end_time = Some(at.max(start));
        }
        self.status = next;
        Ok(())
    }

    /// Seconds between start and end, when both are set
    pub fn duration_secs(&self) -> Option<f64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }
}

/// Fields accepted when creating a run
#[derive(Debug, Clone, Deserialize)]
pub struct NewRun {
    pub name: String,
    pub description: Option<String>,
    pub experiment_id: String,
    pub status: Option<RunStatus>,
    pub pipeline_config: Option<Value>,
    pub parameters: Option<Value>,
    pub metrics: Option<Value>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub git_commit: Option<String>,
}

impl NewRun {
    pub fn validate(&self) -> Result<()> {
        required_text("name", &self.name)?;
        required_text("experiment_id", &self.experiment_id)?;
        for (field, value) in [
            ("pipeline_config", &self.pipeline_config),
            ("parameters", &self.parameters),
            ("metrics", &self.metrics),
        ] {
            if let Some(value) = value {
                ensure_mapping(field, value)?;
            }
        }
        if let Some(status) = self.status {
            if status != RunStatus::Pending && status != RunStatus::Running {
                return Err(Error::Validation(format!(
                    "A run cannot be created in status {}",
                    status
                )));
            }
        }
        Ok(())
    }
}

/// Partial update; absent fields are left untouched
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<RunStatus>,
    pub pipeline_config: Option<Value>,
    pub metrics: Option<Value>,
    pub parameters: Option<Value>,
    pub tags: Option<BTreeMap<String, String>>,
    pub error: Option<String>,
    pub git_commit: Option<String>,
}

impl RunUpdate {
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            required_text("name", name)?;
        }
        for (field, value) in [
            ("pipeline_config", &self.pipeline_config),
            ("parameters", &self.parameters),
            ("metrics", &self.metrics),
        ] {
            if let Some(value) = value {
                ensure_mapping(field, value)?;
            }
        }
        Ok(())
    }

    /// Apply the update, running the status transition last
    pub fn apply(self, run: &mut Run, at: DateTime<Utc>) -> Result<()> {
        if let Some(status) = self.status {
            run.transition(status, at)?;
        }
        if let Some(name) = self.name {
            run.name = name.trim().to_string();
        }
        if let Some(description) = self.description {
            run.description = Some(description);
        }
        if let Some(config) = self.pipeline_config {
            run.pipeline_config = config;
        }
        if let Some(metrics) = self.metrics {
            run.metrics = metrics;
        }
        if let Some(parameters) = self.parameters {
            run.parameters = parameters;
        }
        if let Some(tags) = self.tags {
            run.tags = tags;
        }
        if let Some(error) = self.error {
            run.error = Some(error);
        }
        if let Some(commit) = self.git_commit {
            run.git_commit = Some(commit);
        }
        Ok(())
    }
}
