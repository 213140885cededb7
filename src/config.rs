use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:3000";
pub const DEFAULT_COMPRESSION_MIN_BYTES: u16 = 1024;
pub const DEFAULT_SAMPLE_LIMIT: usize = 10_000;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

/// Contents of `playground.toml`; every field is optional
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PlaygroundConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub data_dir: Option<String>,
    pub database: Option<String>,
    pub cors_origin: Option<String>,
    pub compression_min_bytes: Option<u16>,
    pub sample_limit: Option<usize>,
    pub preview_rows: Option<usize>,
    pub max_upload_bytes: Option<usize>,
}

/// Fully resolved settings the server runs with
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub database: PathBuf,
    pub cors_origin: String,
    pub compression_min_bytes: u16,
    pub sample_limit: usize,
    pub preview_rows: usize,
    pub max_upload_bytes: usize,
}

impl PlaygroundConfig {
    /// Config with every value filled in, as written by `playground init`
    pub fn with_defaults() -> Self {
        Self {
            host: Some(DEFAULT_HOST.to_string()),
            port: Some(DEFAULT_PORT),
            data_dir: Some(DEFAULT_DATA_DIR.to_string()),
            database: Some(default_database_path_in(Path::new(DEFAULT_DATA_DIR)).to_string_lossy().into_owned()),
            cors_origin: Some(DEFAULT_CORS_ORIGIN.to_string()),
            compression_min_bytes: Some(DEFAULT_COMPRESSION_MIN_BYTES),
            sample_limit: Some(DEFAULT_SAMPLE_LIMIT),
            preview_rows: Some(crate::ingest::DEFAULT_PREVIEW_ROWS),
            max_upload_bytes: Some(DEFAULT_MAX_UPLOAD_BYTES),
        }
    }

    /// Fill unset values with defaults
    pub fn resolve(&self) -> anyhow::Result<Settings> {
        let data_dir = PathBuf::from(self.data_dir.as_deref().unwrap_or(DEFAULT_DATA_DIR));
        let database = self
            .database
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| default_database_path_in(&data_dir));

        let sample_limit = self.sample_limit.unwrap_or(DEFAULT_SAMPLE_LIMIT);
        if sample_limit == 0 {
            anyhow::bail!("sample_limit must be at least 1");
        }
        let preview_rows = self.preview_rows.unwrap_or(crate::ingest::DEFAULT_PREVIEW_ROWS);
        if preview_rows == 0 || preview_rows > crate::ingest::MAX_PREVIEW_ROWS {
            anyhow::bail!(
                "preview_rows must be between 1 and {}",
                crate::ingest::MAX_PREVIEW_ROWS
            );
        }

        Ok(Settings {
            host: self.host.clone().unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: self.port.unwrap_or(DEFAULT_PORT),
            data_dir,
            database,
            cors_origin: self.cors_origin.clone().unwrap_or_else(|| DEFAULT_CORS_ORIGIN.to_string()),
            compression_min_bytes: self.compression_min_bytes.unwrap_or(DEFAULT_COMPRESSION_MIN_BYTES),
            sample_limit,
            preview_rows,
            max_upload_bytes: self.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
        })
    }
}

impl Settings {
    /// `host:port` to bind
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("playground.toml")
}

pub fn default_database_path_in(data_dir: &Path) -> PathBuf {
    data_dir.join("playground.db")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<PlaygroundConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: PlaygroundConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &PlaygroundConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
