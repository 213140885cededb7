//! SQLite storage implementation
//!
//! One owned connection behind a mutex. Every mutation runs in its own
//! transaction, and parent references are checked inside that
//! transaction so a dangling reference never gets written.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde::Serialize;
use serde_json::Value;
use crate::artifact::{Artifact, ArtifactType};
use crate::dataset::{Dataset, DatasetStatus, FileType};
use crate::experiment::{Experiment, ExperimentUpdate, NewExperiment, TaskType};
use crate::record::{self, Page};
use crate::run::{NewRun, Run, RunStatus, RunUpdate};
use crate::tabular::ColumnSchema;
use crate::{Error, Result};
use super::schema;

const DATASET_COLUMNS: &str = "id, name, description, file_path, file_type, file_size, checksum, \
     num_rows, num_columns, target_column, status, error, schema_info, created_at, updated_at";

const EXPERIMENT_COLUMNS: &str =
    "id, name, description, task_type, dataset_id, target_column, config, created_at, updated_at";

const RUN_COLUMNS: &str = "id, name, description, status, experiment_id, pipeline_config, metrics, \
     parameters, tags, start_time, end_time, error, git_commit, created_at, updated_at";

const ARTIFACT_COLUMNS: &str = "id, run_id, name, artifact_type, uri, content_type, size, metadata, \
     created_at, updated_at";

/// SQLite-backed storage for datasets, experiments, runs and artifacts
pub struct Store {
    conn: Mutex<Connection>,
}

/// Filters for listing runs
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub experiment_id: Option<String>,
    pub status: Option<RunStatus>,
}

/// JSON maps on a run that can be merged key by key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMapping {
    Metrics,
    Parameters,
}

impl RunMapping {
    fn column(&self) -> &'static str {
        match self {
            RunMapping::Metrics => "metrics",
            RunMapping::Parameters => "parameters",
        }
    }
}

/// Everything removed by a (possibly cascading) delete.
///
/// Files are removed by the caller once the transaction has committed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletedTree {
    pub dataset_files: Vec<String>,
    pub experiment_ids: Vec<String>,
    pub run_ids: Vec<String>,
    pub artifact_ids: Vec<String>,
    pub artifact_uris: Vec<String>,
}

/// Record counts per table
#[derive(Debug, Clone, Serialize)]
pub struct DbStats {
    pub datasets: usize,
    pub experiments: usize,
    pub runs: usize,
    pub artifacts: usize,
}

impl Store {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let store = Self { conn: Mutex::new(conn) };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn: Mutex::new(conn) };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Initialize the database schema
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn();
        conn.pragma_update(None, "foreign_keys", "ON")?;
        for stmt in schema::all_schema_statements() {
            conn.execute(stmt, [])?;
        }
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // a panic mid-request cannot leave an open transaction behind:
        // rusqlite rolls back when the Transaction is dropped
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Check the database answers queries
    pub fn ping(&self) -> Result<()> {
        self.conn().query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    /// Get statistics about the database
    pub fn stats(&self) -> Result<DbStats> {
        let conn = self.conn();
        let count = |table: &str| -> Result<usize> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
            Ok(n as usize)
        };
        Ok(DbStats {
            datasets: count("datasets")?,
            experiments: count("experiments")?,
            runs: count("runs")?,
            artifacts: count("artifacts")?,
        })
    }

    // ========== Dataset Operations ==========

    /// Insert a new dataset record
    pub fn insert_dataset(&self, dataset: &Dataset) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            &format!(
                "INSERT INTO datasets ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                DATASET_COLUMNS
            ),
            params![
                dataset.id,
                dataset.name,
                dataset.description,
                dataset.file_path,
                dataset.file_type.as_str(),
                dataset.file_size as i64,
                dataset.checksum,
                dataset.num_rows as i64,
                dataset.num_columns as i64,
                dataset.target_column,
                dataset.status.as_str(),
                dataset.error,
                serde_json::to_string(&dataset.schema_info)?,
                dataset.created_at,
                dataset.updated_at,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Get a dataset by id
    pub fn get_dataset(&self, id: &str) -> Result<Option<Dataset>> {
        fetch_dataset(&self.conn(), id)
    }

    /// List datasets in insertion order
    pub fn list_datasets(&self, page: Page) -> Result<Vec<Dataset>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM datasets ORDER BY rowid LIMIT ?1 OFFSET ?2",
            DATASET_COLUMNS
        ))?;
        let datasets = stmt
            .query_map(params![page.sql_limit(), page.sql_offset()], row_to_dataset)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(datasets)
    }

    /// Record a successful ingestion: file location, counts and schema.
    ///
    /// The stored record must currently be `processing`.
    pub fn mark_dataset_ready(&self, dataset: &Dataset) -> Result<Dataset> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let current = require_dataset(&tx, &dataset.id)?;
        check_dataset_transition(&current, DatasetStatus::Ready)?;

        let updated_at = record::now();
        tx.execute(
            "UPDATE datasets SET file_path = ?2, file_size = ?3, checksum = ?4, num_rows = ?5, \
             num_columns = ?6, target_column = ?7, status = ?8, error = NULL, schema_info = ?9, \
             updated_at = ?10 WHERE id = ?1",
            params![
                dataset.id,
                dataset.file_path,
                dataset.file_size as i64,
                dataset.checksum,
                dataset.num_rows as i64,
                dataset.num_columns as i64,
                dataset.target_column,
                DatasetStatus::Ready.as_str(),
                serde_json::to_string(&dataset.schema_info)?,
                updated_at,
            ],
        )?;
        let stored = require_dataset(&tx, &dataset.id)?;
        tx.commit()?;
        Ok(stored)
    }

    /// Move a dataset to `error` with a failure detail
    pub fn mark_dataset_error(&self, id: &str, detail: &str) -> Result<Dataset> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let current = require_dataset(&tx, id)?;
        check_dataset_transition(&current, DatasetStatus::Error)?;

        tx.execute(
            "UPDATE datasets SET status = ?2, error = ?3, file_path = NULL, updated_at = ?4 WHERE id = ?1",
            params![id, DatasetStatus::Error.as_str(), detail, record::now()],
        )?;
        let stored = require_dataset(&tx, id)?;
        tx.commit()?;
        Ok(stored)
    }

    /// Fail datasets whose ingestion was cut short by a restart
    pub fn fail_interrupted_datasets(&self) -> Result<usize> {
        let conn = self.conn();
        let n = conn.execute(
            "UPDATE datasets SET status = ?1, error = ?2, file_path = NULL, updated_at = ?3 \
             WHERE status IN ('uploading', 'processing')",
            params![DatasetStatus::Error.as_str(), "ingestion interrupted", record::now()],
        )?;
        Ok(n)
    }

    /// Delete a dataset. Experiments referencing it block the delete
    /// unless `cascade` is set, which removes the whole subtree.
    pub fn delete_dataset(&self, id: &str, cascade: bool) -> Result<DeletedTree> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let dataset = require_dataset(&tx, id)?;

        let experiments = child_ids(&tx, "experiments", "dataset_id", id)?;
        if !experiments.is_empty() && !cascade {
            return Err(Error::Conflict(format!(
                "Dataset {} is referenced by {} experiment(s); delete them first or pass cascade=true",
                id,
                experiments.len()
            )));
        }

        let mut tree = DeletedTree::default();
        for experiment_id in experiments {
            delete_experiment_tree(&tx, &experiment_id, &mut tree)?;
        }
        tx.execute("DELETE FROM datasets WHERE id = ?1", [id])?;
        tx.commit()?;

        if let Some(path) = dataset.file_path {
            tree.dataset_files.push(path);
        }
        Ok(tree)
    }

    // ========== Experiment Operations ==========

    /// Create an experiment against an existing dataset
    pub fn insert_experiment(&self, new: NewExperiment) -> Result<Experiment> {
        new.validate()?;
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let dataset = require_dataset(&tx, &new.dataset_id)?;
        let target_column = new.target_column.or_else(|| dataset.target_column.clone());
        if let Some(target) = &target_column {
            check_target_column(&dataset, target)?;
        }

        let now = record::now();
        let experiment = Experiment {
            id: record::new_id(),
            name: new.name.trim().to_string(),
            description: new.description,
            task_type: new.task_type,
            dataset_id: dataset.id,
            target_column,
            config: new.config.unwrap_or_else(record::empty_mapping),
            created_at: now,
            updated_at: now,
        };
        write_experiment(&tx, &experiment, false)?;
        tx.commit()?;
        Ok(experiment)
    }

    /// Get an experiment by id
    pub fn get_experiment(&self, id: &str) -> Result<Option<Experiment>> {
        fetch_experiment(&self.conn(), id)
    }

    /// List experiments, optionally only those for one dataset
    pub fn list_experiments(&self, page: Page, dataset_id: Option<&str>) -> Result<Vec<Experiment>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM experiments WHERE (?1 IS NULL OR dataset_id = ?1) \
             ORDER BY rowid LIMIT ?2 OFFSET ?3",
            EXPERIMENT_COLUMNS
        ))?;
        let experiments = stmt
            .query_map(
                params![dataset_id, page.sql_limit(), page.sql_offset()],
                row_to_experiment,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(experiments)
    }

    /// Apply a partial update to an experiment
    pub fn update_experiment(&self, id: &str, update: ExperimentUpdate) -> Result<Experiment> {
        update.validate()?;
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut experiment = fetch_experiment(&tx, id)?
            .ok_or_else(|| Error::NotFound(format!("Experiment {}", id)))?;

        if let Some(target) = &update.target_column {
            let dataset = require_dataset(&tx, &experiment.dataset_id)?;
            check_target_column(&dataset, target)?;
        }

        update.apply(&mut experiment);
        experiment.updated_at = record::now();
        write_experiment(&tx, &experiment, true)?;
        tx.commit()?;
        Ok(experiment)
    }

    /// Delete an experiment. Runs block the delete unless `cascade` is set.
    pub fn delete_experiment(&self, id: &str, cascade: bool) -> Result<DeletedTree> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        if fetch_experiment(&tx, id)?.is_none() {
            return Err(Error::NotFound(format!("Experiment {}", id)));
        }

        let runs = child_ids(&tx, "runs", "experiment_id", id)?;
        if !runs.is_empty() && !cascade {
            return Err(Error::Conflict(format!(
                "Experiment {} has {} run(s); delete them first or pass cascade=true",
                id,
                runs.len()
            )));
        }

        let mut tree = DeletedTree::default();
        delete_experiment_tree(&tx, id, &mut tree)?;
        tx.commit()?;
        Ok(tree)
    }

    // ========== Run Operations ==========

    /// Create a run under an existing experiment
    pub fn insert_run(&self, new: NewRun) -> Result<Run> {
        new.validate()?;
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        if fetch_experiment(&tx, &new.experiment_id)?.is_none() {
            return Err(Error::NotFound(format!("Experiment {}", new.experiment_id)));
        }

        let now = record::now();
        let mut run = Run {
            id: record::new_id(),
            name: new.name.trim().to_string(),
            description: new.description,
            status: RunStatus::Pending,
            experiment_id: new.experiment_id,
            pipeline_config: new.pipeline_config.unwrap_or_else(record::empty_mapping),
            metrics: new.metrics.unwrap_or_else(record::empty_mapping),
            parameters: new.parameters.unwrap_or_else(record::empty_mapping),
            tags: new.tags,
            start_time: None,
            end_time: None,
            error: None,
            git_commit: new.git_commit,
            created_at: now,
            updated_at: now,
        };
        if let Some(status) = new.status {
            run.transition(status, now)?;
        }

        write_run(&tx, &run, false)?;
        tx.commit()?;
        Ok(run)
    }

    /// Get a run by id
    pub fn get_run(&self, id: &str) -> Result<Option<Run>> {
        fetch_run(&self.conn(), id)
    }

    /// List runs matching a filter
    pub fn list_runs(&self, page: Page, filter: &RunFilter) -> Result<Vec<Run>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM runs WHERE (?1 IS NULL OR experiment_id = ?1) AND (?2 IS NULL OR status = ?2) \
             ORDER BY rowid LIMIT ?3 OFFSET ?4",
            RUN_COLUMNS
        ))?;
        let runs = stmt
            .query_map(
                params![
                    filter.experiment_id,
                    filter.status.map(|s| s.as_str()),
                    page.sql_limit(),
                    page.sql_offset()
                ],
                row_to_run,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    /// Apply a partial update, including status transitions
    pub fn update_run(&self, id: &str, update: RunUpdate) -> Result<Run> {
        update.validate()?;
        self.modify_run(id, |run, now| update.apply(run, now))
    }

    /// Merge keys into a run's metrics or parameters
    pub fn merge_run_mapping(&self, id: &str, mapping: RunMapping, patch: Value) -> Result<Run> {
        self.modify_run(id, |run, _| {
            let target = match mapping {
                RunMapping::Metrics => &mut run.metrics,
                RunMapping::Parameters => &mut run.parameters,
            };
            record::merge_mapping(mapping.column(), target, patch)
        })
    }

    fn modify_run<F>(&self, id: &str, change: F) -> Result<Run>
    where
        F: FnOnce(&mut Run, chrono::DateTime<chrono::Utc>) -> Result<()>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut run = fetch_run(&tx, id)?.ok_or_else(|| Error::NotFound(format!("Run {}", id)))?;

        let now = record::now();
        change(&mut run, now)?;
        run.updated_at = now;
        write_run(&tx, &run, true)?;
        tx.commit()?;
        Ok(run)
    }

    /// Delete a run. Artifacts block the delete unless `cascade` is set.
    pub fn delete_run(&self, id: &str, cascade: bool) -> Result<DeletedTree> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        if fetch_run(&tx, id)?.is_none() {
            return Err(Error::NotFound(format!("Run {}", id)));
        }

        let artifacts = child_ids(&tx, "artifacts", "run_id", id)?;
        if !artifacts.is_empty() && !cascade {
            return Err(Error::Conflict(format!(
                "Run {} has {} artifact(s); delete them first or pass cascade=true",
                id,
                artifacts.len()
            )));
        }

        let mut tree = DeletedTree::default();
        delete_run_tree(&tx, id, &mut tree)?;
        tx.commit()?;
        Ok(tree)
    }

    // ========== Artifact Operations ==========

    /// Insert an artifact for an existing run
    pub fn insert_artifact(&self, artifact: &Artifact) -> Result<()> {
        record::ensure_mapping("metadata", &artifact.metadata)?;
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        if fetch_run(&tx, &artifact.run_id)?.is_none() {
            return Err(Error::NotFound(format!("Run {}", artifact.run_id)));
        }

        tx.execute(
            &format!(
                "INSERT INTO artifacts ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                ARTIFACT_COLUMNS
            ),
            params![
                artifact.id,
                artifact.run_id,
                artifact.name,
                artifact.artifact_type.as_str(),
                artifact.uri,
                artifact.content_type,
                artifact.size.map(|s| s as i64),
                serde_json::to_string(&artifact.metadata)?,
                artifact.created_at,
                artifact.updated_at,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Get an artifact by id
    pub fn get_artifact(&self, id: &str) -> Result<Option<Artifact>> {
        fetch_artifact(&self.conn(), id)
    }

    /// List artifacts, optionally only those of one run
    pub fn list_artifacts(&self, page: Page, run_id: Option<&str>) -> Result<Vec<Artifact>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM artifacts WHERE (?1 IS NULL OR run_id = ?1) ORDER BY rowid LIMIT ?2 OFFSET ?3",
            ARTIFACT_COLUMNS
        ))?;
        let artifacts = stmt
            .query_map(
                params![run_id, page.sql_limit(), page.sql_offset()],
                row_to_artifact,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(artifacts)
    }

    /// Delete an artifact record; artifacts have no children
    pub fn delete_artifact(&self, id: &str) -> Result<DeletedTree> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let artifact = fetch_artifact(&tx, id)?
            .ok_or_else(|| Error::NotFound(format!("Artifact {}", id)))?;
        tx.execute("DELETE FROM artifacts WHERE id = ?1", [id])?;
        tx.commit()?;
        Ok(DeletedTree {
            artifact_ids: vec![artifact.id],
            artifact_uris: vec![artifact.uri],
            ..DeletedTree::default()
        })
    }
}

// ========== Row Helpers ==========

fn fetch_dataset(conn: &Connection, id: &str) -> Result<Option<Dataset>> {
    conn.query_row(
        &format!("SELECT {} FROM datasets WHERE id = ?1", DATASET_COLUMNS),
        [id],
        row_to_dataset,
    )
    .optional()
    .map_err(Into::into)
}

fn require_dataset(conn: &Connection, id: &str) -> Result<Dataset> {
    fetch_dataset(conn, id)?.ok_or_else(|| Error::NotFound(format!("Dataset {}", id)))
}

fn fetch_artifact(conn: &Connection, id: &str) -> Result<Option<Artifact>> {
    conn.query_row(
        &format!("SELECT {} FROM artifacts WHERE id = ?1", ARTIFACT_COLUMNS),
        [id],
        row_to_artifact,
    )
    .optional()
    .map_err(Into::into)
}

fn fetch_experiment(conn: &Connection, id: &str) -> Result<Option<Experiment>> {
    conn.query_row(
        &format!("SELECT {} FROM experiments WHERE id = ?1", EXPERIMENT_COLUMNS),
        [id],
        row_to_experiment,
    )
    .optional()
    .map_err(Into::into)
}

fn fetch_run(conn: &Connection, id: &str) -> Result<Option<Run>> {
    conn.query_row(
        &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
        [id],
        row_to_run,
    )
    .optional()
    .map_err(Into::into)
}

fn check_dataset_transition(current: &Dataset, next: DatasetStatus) -> Result<()> {
    if current.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(Error::Conflict(format!(
            "Dataset {} cannot move from {} to {}",
            current.id, current.status, next
        )))
    }
}

fn check_target_column(dataset: &Dataset, target: &str) -> Result<()> {
    if dataset.is_ready() && dataset.column(target).is_none() {
        return Err(Error::Validation(format!(
            "Target column '{}' is not a column of dataset {}",
            target, dataset.id
        )));
    }
    Ok(())
}

fn child_ids(tx: &Transaction, table: &str, parent_column: &str, parent_id: &str) -> Result<Vec<String>> {
    let mut stmt = tx.prepare(&format!(
        "SELECT id FROM {} WHERE {} = ?1 ORDER BY rowid",
        table, parent_column
    ))?;
    let ids = stmt
        .query_map([parent_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

fn delete_experiment_tree(tx: &Transaction, id: &str, tree: &mut DeletedTree) -> Result<()> {
    for run_id in child_ids(tx, "runs", "experiment_id", id)? {
        delete_run_tree(tx, &run_id, tree)?;
    }
    tx.execute("DELETE FROM experiments WHERE id = ?1", [id])?;
    tree.experiment_ids.push(id.to_string());
    Ok(())
}

fn delete_run_tree(tx: &Transaction, id: &str, tree: &mut DeletedTree) -> Result<()> {
    {
        let mut stmt = tx.prepare("SELECT id, uri FROM artifacts WHERE run_id = ?1")?;
        let rows = stmt
            .query_map([id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for (artifact_id, uri) in rows {
            tree.artifact_ids.push(artifact_id);
            tree.artifact_uris.push(uri);
        }
    }
    tx.execute("DELETE FROM artifacts WHERE run_id = ?1", [id])?;
    tx.execute("DELETE FROM runs WHERE id = ?1", [id])?;
    tree.run_ids.push(id.to_string());
    Ok(())
}

fn write_experiment(tx: &Transaction, experiment: &Experiment, update: bool) -> Result<()> {
    let config = serde_json::to_string(&experiment.config)?;
    let sql = if update {
        "UPDATE experiments SET name = ?2, description = ?3, task_type = ?4, dataset_id = ?5, \
         target_column = ?6, config = ?7, created_at = ?8, updated_at = ?9 WHERE id = ?1"
            .to_string()
    } else {
        format!(
            "INSERT INTO experiments ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            EXPERIMENT_COLUMNS
        )
    };
    tx.execute(
        &sql,
        params![
            experiment.id,
            experiment.name,
            experiment.description,
            experiment.task_type.as_str(),
            experiment.dataset_id,
            experiment.target_column,
            config,
            experiment.created_at,
            experiment.updated_at,
        ],
    )?;
    Ok(())
}

fn write_run(tx: &Transaction, run: &Run, update: bool) -> Result<()> {
    let pipeline_config = serde_json::to_string(&run.pipeline_config)?;
    let metrics = serde_json::to_string(&run.metrics)?;
    let parameters = serde_json::to_string(&run.parameters)?;
    let tags = serde_json::to_string(&run.tags)?;

    let sql = if update {
        "UPDATE runs SET name = ?2, description = ?3, status = ?4, experiment_id = ?5, \
         pipeline_config = ?6, metrics = ?7, parameters = ?8, tags = ?9, start_time = ?10, \
         end_time = ?11, error = ?12, git_commit = ?13, created_at = ?14, updated_at = ?15 \
         WHERE id = ?1"
            .to_string()
    } else {
        format!(
            "INSERT INTO runs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            RUN_COLUMNS
        )
    };
    tx.execute(
        &sql,
        params![
            run.id,
            run.name,
            run.description,
            run.status.as_str(),
            run.experiment_id,
            pipeline_config,
            metrics,
            parameters,
            tags,
            run.start_time,
            run.end_time,
            run.error,
            run.git_commit,
            run.created_at,
            run.updated_at,
        ],
    )?;
    Ok(())
}

fn conversion_error<E>(column: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_column<T>(row: &rusqlite::Row, column: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = Error>,
{
    let text: String = row.get(column)?;
    text.parse().map_err(|e: Error| conversion_error(column, e))
}

fn json_column<T>(row: &rusqlite::Row, column: usize) -> rusqlite::Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let text: String = row.get(column)?;
    serde_json::from_str(&text).map_err(|e| conversion_error(column, e))
}

fn row_to_dataset(row: &rusqlite::Row) -> rusqlite::Result<Dataset> {
    let file_type: FileType = parse_column(row, 4)?;
    let status: DatasetStatus = parse_column(row, 10)?;
    let schema_info: Vec<ColumnSchema> = json_column(row, 12)?;

    Ok(Dataset {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        file_path: row.get(3)?,
        file_type,
        file_size: row.get::<_, i64>(5)? as u64,
        checksum: row.get(6)?,
        num_rows: row.get::<_, i64>(7)? as u64,
        num_columns: row.get::<_, i64>(8)? as u64,
        target_column: row.get(9)?,
        status,
        error: row.get(11)?,
        schema_info,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

fn row_to_experiment(row: &rusqlite::Row) -> rusqlite::Result<Experiment> {
    let task_type: TaskType = parse_column(row, 3)?;

    Ok(Experiment {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        task_type,
        dataset_id: row.get(4)?,
        target_column: row.get(5)?,
        config: json_column(row, 6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn row_to_run(row: &rusqlite::Row) -> rusqlite::Result<Run> {
    let status: RunStatus = parse_column(row, 3)?;
    let tags: BTreeMap<String, String> = json_column(row, 8)?;

    Ok(Run {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        status,
        experiment_id: row.get(4)?,
        pipeline_config: json_column(row, 5)?,
        metrics: json_column(row, 6)?,
        parameters: json_column(row, 7)?,
        tags,
        start_time: row.get(9)?,
        end_time: row.get(10)?,
        error: row.get(11)?,
        git_commit: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

fn row_to_artifact(row: &rusqlite::Row) -> rusqlite::Result<Artifact> {
    let artifact_type: ArtifactType = parse_column(row, 3)?;

    Ok(Artifact {
        id: row.get(0)?,
        run_id: row.get(1)?,
        name: row.get(2)?,
        artifact_type,
        uri: row.get(4)?,
        content_type: row.get(5)?,
        size: row.get::<_, Option<i64>>(6)?.map(|s| s as u64),
        metadata: json_column(row, 7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactType;
    use serde_json::json;

    fn sample_dataset(name: &str, status: DatasetStatus) -> Dataset {
        let now = record::now();
        Dataset {
            id: record::new_id(),
            name: name.to_string(),
            description: None,
            file_path: None,
            file_type: FileType::Csv,
            file_size: 12,
            checksum: None,
            num_rows: 0,
            num_columns: 0,
            target_column: None,
            status,
            error: None,
            schema_info: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn new_experiment(dataset_id: &str) -> NewExperiment {
        serde_json::from_value(json!({
            "name": "baseline",
            "task_type": "classification",
            "dataset_id": dataset_id,
            "config": {"model": "logreg"}
        }))
        .unwrap()
    }

    fn new_run(experiment_id: &str) -> NewRun {
        serde_json::from_value(json!({
            "name": "run-1",
            "experiment_id": experiment_id,
            "parameters": {"lr": 0.01},
            "tags": {"owner": "ml"}
        }))
        .unwrap()
    }

    fn sample_artifact(run_id: &str, uri: &str) -> Artifact {
        let now = record::now();
        Artifact {
            id: record::new_id(),
            run_id: run_id.to_string(),
            name: "model".to_string(),
            artifact_type: ArtifactType::Model,
            uri: uri.to_string(),
            content_type: "application/octet-stream".to_string(),
            size: Some(4),
            metadata: json!({"framework": "sklearn"}),
            created_at: now,
            updated_at: now,
        }
    }

    /// dataset -> experiment -> run -> artifact
    fn seeded_store() -> (Store, Dataset, Experiment, Run, Artifact) {
        let store = Store::open_in_memory().unwrap();
        let dataset = sample_dataset("iris", DatasetStatus::Ready);
        store.insert_dataset(&dataset).unwrap();
        let experiment = store.insert_experiment(new_experiment(&dataset.id)).unwrap();
        let run = store.insert_run(new_run(&experiment.id)).unwrap();
        let artifact = sample_artifact(&run.id, "/tmp/artifacts/model.pkl");
        store.insert_artifact(&artifact).unwrap();
        (store, dataset, experiment, run, artifact)
    }

    #[test]
    fn test_dataset_crud() {
        let store = Store::open_in_memory().unwrap();
        let mut dataset = sample_dataset("t1", DatasetStatus::Processing);
        store.insert_dataset(&dataset).unwrap();

        let fetched = store.get_dataset(&dataset.id).unwrap().unwrap();
        assert_eq!(fetched.name, "t1");
        assert_eq!(fetched.status, DatasetStatus::Processing);

        dataset.file_path = Some("/data/datasets/x.csv".to_string());
        dataset.num_rows = 3;
        dataset.num_columns = 2;
        let ready = store.mark_dataset_ready(&dataset).unwrap();
        assert_eq!(ready.status, DatasetStatus::Ready);
        assert_eq!(ready.num_rows, 3);
        assert!(ready.updated_at >= fetched.updated_at);

        // ready is final
        assert!(store.mark_dataset_error(&dataset.id, "late failure").is_err());

        let tree = store.delete_dataset(&dataset.id, false).unwrap();
        assert_eq!(tree.dataset_files, vec!["/data/datasets/x.csv".to_string()]);
        assert!(store.get_dataset(&dataset.id).unwrap().is_none());
    }

    #[test]
    fn test_mark_dataset_error() {
        let store = Store::open_in_memory().unwrap();
        let dataset = sample_dataset("bad", DatasetStatus::Processing);
        store.insert_dataset(&dataset).unwrap();

        let failed = store.mark_dataset_error(&dataset.id, "bad header").unwrap();
        assert_eq!(failed.status, DatasetStatus::Error);
        assert_eq!(failed.error.as_deref(), Some("bad header"));
        assert!(failed.file_path.is_none());
    }

    #[test]
    fn test_fail_interrupted_datasets() {
        let store = Store::open_in_memory().unwrap();
        store.insert_dataset(&sample_dataset("a", DatasetStatus::Processing)).unwrap();
        store.insert_dataset(&sample_dataset("b", DatasetStatus::Ready)).unwrap();

        assert_eq!(store.fail_interrupted_datasets().unwrap(), 1);
        let statuses: Vec<DatasetStatus> = store
            .list_datasets(Page::default())
            .unwrap()
            .iter()
            .map(|d| d.status)
            .collect();
        assert_eq!(statuses, vec![DatasetStatus::Error, DatasetStatus::Ready]);
    }

    #[test]
    fn test_list_datasets_pagination_follows_insertion_order() {
        let store = Store::open_in_memory().unwrap();
        for name in ["first", "second", "third"] {
            store.insert_dataset(&sample_dataset(name, DatasetStatus::Ready)).unwrap();
        }

        let page = store.list_datasets(Page::new(1, 1)).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].name, "second");

        assert_eq!(store.list_datasets(Page::new(0, 10)).unwrap().len(), 3);
        assert!(store.list_datasets(Page::new(5, 10)).unwrap().is_empty());
        assert!(store.list_datasets(Page::new(usize::MAX, 10)).unwrap().is_empty());
    }

    #[test]
    fn test_experiment_requires_live_dataset() {
        let store = Store::open_in_memory().unwrap();
        let err = store.insert_experiment(new_experiment("missing")).unwrap_err();

        assert_eq!(err.kind(), "not_found");
        assert!(store.list_experiments(Page::default(), None).unwrap().is_empty());
    }

    #[test]
    fn test_experiment_update_and_filter() {
        let (store, dataset, experiment, _, _) = seeded_store();

        let update: ExperimentUpdate = serde_json::from_value(json!({
            "name": "tuned",
            "config": {"model": "xgboost"}
        }))
        .unwrap();
        let updated = store.update_experiment(&experiment.id, update).unwrap();
        assert_eq!(updated.name, "tuned");
        assert_eq!(updated.config, json!({"model": "xgboost"}));
        assert_eq!(updated.created_at, experiment.created_at);

        let listed = store.list_experiments(Page::default(), Some(&dataset.id)).unwrap();
        assert_eq!(listed.len(), 1);
        assert!(store.list_experiments(Page::default(), Some("other")).unwrap().is_empty());
    }

    #[test]
    fn test_experiment_target_must_be_a_column() {
        let store = Store::open_in_memory().unwrap();
        let mut dataset = sample_dataset("iris", DatasetStatus::Ready);
        dataset.file_path = Some("/data/iris.csv".to_string());
        dataset.schema_info = vec![ColumnSchema {
            name: "species".to_string(),
            dtype: "string".to_string(),
            is_numeric: false,
            is_categorical: false,
            is_datetime: false,
            n_unique: 3,
            missing: 0,
        }];
        store.insert_dataset(&dataset).unwrap();

        let mut new = new_experiment(&dataset.id);
        new.target_column = Some("petal".to_string());
        assert_eq!(store.insert_experiment(new).unwrap_err().kind(), "validation_error");

        let mut new = new_experiment(&dataset.id);
        new.target_column = Some("species".to_string());
        assert!(store.insert_experiment(new).is_ok());
    }

    #[test]
    fn test_run_lifecycle_persists() {
        let (store, _, experiment, run, _) = seeded_store();
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.tags.get("owner").map(String::as_str), Some("ml"));

        let start: RunUpdate = serde_json::from_value(json!({"status": "running"})).unwrap();
        let running = store.update_run(&run.id, start).unwrap();
        assert!(running.start_time.is_some());

        let done: RunUpdate = serde_json::from_value(json!({"status": "completed"})).unwrap();
        let completed = store.update_run(&run.id, done).unwrap();
        let stored = store.get_run(&run.id).unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Completed);
        assert!(stored.end_time.unwrap() >= stored.start_time.unwrap());
        assert_eq!(stored.end_time, completed.end_time);

        let again: RunUpdate = serde_json::from_value(json!({"status": "running"})).unwrap();
        assert_eq!(store.update_run(&run.id, again).unwrap_err().kind(), "conflict");

        let filter = RunFilter {
            experiment_id: Some(experiment.id.clone()),
            status: Some(RunStatus::Completed),
        };
        assert_eq!(store.list_runs(Page::default(), &filter).unwrap().len(), 1);
        let pending = RunFilter { status: Some(RunStatus::Pending), ..RunFilter::default() };
        assert!(store.list_runs(Page::default(), &pending).unwrap().is_empty());
    }

    #[test]
    fn test_run_requires_live_experiment() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.insert_run(new_run("nope")).unwrap_err().kind(), "not_found");
    }

    #[test]
    fn test_merge_metrics() {
        let (store, _, _, run, _) = seeded_store();
        store.merge_run_mapping(&run.id, RunMapping::Metrics, json!({"loss": 0.4})).unwrap();
        let merged = store
            .merge_run_mapping(&run.id, RunMapping::Metrics, json!({"acc": 0.8}))
            .unwrap();
        assert_eq!(merged.metrics, json!({"loss": 0.4, "acc": 0.8}));

        let params = store
            .merge_run_mapping(&run.id, RunMapping::Parameters, json!({"depth": 3}))
            .unwrap();
        assert_eq!(params.parameters, json!({"lr": 0.01, "depth": 3}));
    }

    #[test]
    fn test_artifact_requires_live_run() {
        let store = Store::open_in_memory().unwrap();
        let err = store.insert_artifact(&sample_artifact("ghost", "x")).unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_artifact_crud() {
        let (store, _, _, run, artifact) = seeded_store();
        let fetched = store.get_artifact(&artifact.id).unwrap().unwrap();
        assert_eq!(fetched.artifact_type, ArtifactType::Model);
        assert_eq!(fetched.metadata, json!({"framework": "sklearn"}));

        assert_eq!(store.list_artifacts(Page::default(), Some(&run.id)).unwrap().len(), 1);

        let tree = store.delete_artifact(&artifact.id).unwrap();
        assert_eq!(tree.artifact_uris, vec![artifact.uri.clone()]);
        assert!(store.get_artifact(&artifact.id).unwrap().is_none());
        assert_eq!(store.delete_artifact(&artifact.id).unwrap_err().kind(), "not_found");
    }

    #[test]
    fn test_delete_with_children_conflicts() {
        let (store, dataset, experiment, run, _) = seeded_store();

        assert_eq!(store.delete_dataset(&dataset.id, false).unwrap_err().kind(), "conflict");
        assert_eq!(store.delete_experiment(&experiment.id, false).unwrap_err().kind(), "conflict");
        assert_eq!(store.delete_run(&run.id, false).unwrap_err().kind(), "conflict");

        // nothing was removed
        let stats = store.stats().unwrap();
        assert_eq!(
            (stats.datasets, stats.experiments, stats.runs, stats.artifacts),
            (1, 1, 1, 1)
        );
    }

    #[test]
    fn test_cascade_delete_removes_subtree() {
        let (store, dataset, experiment, run, artifact) = seeded_store();

        let tree = store.delete_dataset(&dataset.id, true).unwrap();
        assert_eq!(tree.experiment_ids, vec![experiment.id]);
        assert_eq!(tree.run_ids, vec![run.id]);
        assert_eq!(tree.artifact_uris, vec![artifact.uri]);

        let stats = store.stats().unwrap();
        assert_eq!(
            (stats.datasets, stats.experiments, stats.runs, stats.artifacts),
            (0, 0, 0, 0)
        );
    }

    #[test]
    fn test_schema_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playground.db");
        {
            let store = Store::open(&path).unwrap();
            store.insert_dataset(&sample_dataset("kept", DatasetStatus::Ready)).unwrap();
        }
        let store = Store::open(&path).unwrap();
        store.ping().unwrap();
        assert_eq!(store.list_datasets(Page::default()).unwrap().len(), 1);
    }
}
