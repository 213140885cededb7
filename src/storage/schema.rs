//! Database schema definitions

/// SQL to create the datasets table
pub const CREATE_DATASETS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS datasets (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    file_path TEXT,
    file_type TEXT NOT NULL CHECK (file_type IN ('csv', 'json', 'jsonl', 'parquet')),
    file_size INTEGER NOT NULL DEFAULT 0,
    checksum TEXT,
    num_rows INTEGER NOT NULL DEFAULT 0,
    num_columns INTEGER NOT NULL DEFAULT 0,
    target_column TEXT,
    status TEXT NOT NULL CHECK (status IN ('uploading', 'processing', 'ready', 'error')),
    error TEXT,
    schema_info TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// SQL to create the experiments table
pub const CREATE_EXPERIMENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS experiments (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    task_type TEXT NOT NULL CHECK (task_type IN ('classification', 'regression', 'clustering', 'nlp')),
    dataset_id TEXT NOT NULL REFERENCES datasets(id),
    target_column TEXT,
    config TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// SQL to create the runs table
pub const CREATE_RUNS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    status TEXT NOT NULL CHECK (status IN ('pending', 'running', 'completed', 'failed', 'cancelled')),
    experiment_id TEXT NOT NULL REFERENCES experiments(id),
    pipeline_config TEXT NOT NULL DEFAULT '{}',
    metrics TEXT NOT NULL DEFAULT '{}',
    parameters TEXT NOT NULL DEFAULT '{}',
    tags TEXT NOT NULL DEFAULT '{}',
    start_time TEXT,
    end_time TEXT,
    error TEXT,
    git_commit TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK (start_time IS NULL OR end_time IS NULL OR end_time >= start_time)
)
"#;

/// SQL to create the artifacts table
pub const CREATE_ARTIFACTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS artifacts (
    id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(id),
    name TEXT NOT NULL,
    artifact_type TEXT NOT NULL CHECK (artifact_type IN ('model', 'plot', 'data', 'other')),
    uri TEXT NOT NULL,
    content_type TEXT NOT NULL,
    size INTEGER,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// SQL to create indexes
pub const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_datasets_name ON datasets(name)",
    "CREATE INDEX IF NOT EXISTS idx_experiments_name ON experiments(name)",
    "CREATE INDEX IF NOT EXISTS idx_experiments_dataset ON experiments(dataset_id)",
    "CREATE INDEX IF NOT EXISTS idx_runs_name ON runs(name)",
    "CREATE INDEX IF NOT EXISTS idx_runs_experiment ON runs(experiment_id)",
    "CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status)",
    "CREATE INDEX IF NOT EXISTS idx_artifacts_run ON artifacts(run_id)",
];

/// All schema creation statements, parents before children
pub fn all_schema_statements() -> Vec<&'static str> {
    let mut stmts = vec![
        CREATE_DATASETS_TABLE,
        CREATE_EXPERIMENTS_TABLE,
        CREATE_RUNS_TABLE,
        CREATE_ARTIFACTS_TABLE,
    ];
    stmts.extend(CREATE_INDEXES.iter().copied());
    stmts
}
