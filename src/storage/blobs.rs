//! File blob storage under the data root
//!
//! Layout:
//! - `datasets/<id>.<ext>`: uploaded dataset files
//! - `runs/<id>.log`: run logs
//! - `artifacts/<id>[.<ext>]`: uploaded artifact files
//!
//! Uploads are written to `<final>.partial` first and renamed into place
//! only once the owning record is about to be committed. A partial file
//! that is dropped without being promoted is removed.

use super::sqlite::DeletedTree;
use crate::Result;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Suffix marking an incomplete upload
pub const PARTIAL_SUFFIX: &str = "partial";

/// Owns the data root and its blob directories
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Open the data root, creating the blob directories if needed and
    /// sweeping partial files left behind by an interrupted process.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let store = Self { root: root.into() };
        for dir in [store.datasets_dir(), store.runs_dir(), store.artifacts_dir()] {
            std::fs::create_dir_all(&dir)?;
        }
        let swept = store.sweep_partials()?;
        if swept > 0 {
            tracing::warn!("Removed {} incomplete uploads from {}", swept, store.root.display());
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn datasets_dir(&self) -> PathBuf {
        self.root.join("datasets")
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join("artifacts")
    }

    /// Final location of a dataset file
    pub fn dataset_path(&self, id: &str, extension: &str) -> PathBuf {
        self.datasets_dir().join(format!("{}.{}", id, extension))
    }

    /// Final location of an artifact file
    pub fn artifact_path(&self, id: &str, extension: Option<&str>) -> PathBuf {
        match extension {
            Some(ext) if !ext.is_empty() => self.artifacts_dir().join(format!("{}.{}", id, ext)),
            _ => self.artifacts_dir().join(id),
        }
    }

    pub fn run_log_path(&self, run_id: &str) -> PathBuf {
        self.runs_dir().join(format!("{}.log", run_id))
    }

    /// Whether `uri` names a file stored directly in the artifacts directory.
    ///
    /// Only paths produced by [`BlobStore::artifact_path`] qualify; any `..`
    /// component disqualifies the uri.
    pub fn owns_artifact(&self, uri: &str) -> bool {
        let path = Path::new(uri);
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return false;
        }
        matches!(path.components().next_back(), Some(Component::Normal(_)))
            && path.parent() == Some(self.artifacts_dir().as_path())
    }

    /// Whether `uri` resolves to somewhere inside the data root, either
    /// lexically or after following `..` and symlinks
    pub fn contains(&self, uri: &str) -> bool {
        let path = Path::new(uri);
        if path.starts_with(&self.root) {
            return true;
        }
        let Ok(root) = self.root.canonicalize() else {
            return false;
        };
        let resolved = path.canonicalize().ok().or_else(|| {
            let parent = path.parent()?.canonicalize().ok()?;
            Some(parent.join(path.file_name()?))
        });
        resolved.is_some_and(|p| p.starts_with(root))
    }

    /// Whether the data root is usable
    pub fn is_healthy(&self) -> bool {
        [self.datasets_dir(), self.runs_dir(), self.artifacts_dir()]
            .iter()
            .all(|dir| dir.is_dir())
    }

    /// Start writing an upload destined for `final_path`
    pub async fn create_partial(&self, final_path: PathBuf) -> Result<PartialFile> {
        PartialFile::create(final_path).await
    }

    /// Append text to a run's log
    pub async fn append_run_log(&self, run_id: &str, text: &str) -> Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.run_log_path(run_id))
            .await?;
        file.write_all(text.as_bytes()).await?;
        if !text.ends_with('\n') {
            file.write_all(b"\n").await?;
        }
        file.flush().await?;
        Ok(())
    }

    /// A run's log, empty when nothing was written yet
    pub async fn read_run_log(&self, run_id: &str) -> Result<String> {
        match tokio::fs::read_to_string(self.run_log_path(run_id)).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a file; a missing file is not an error
    pub fn remove_file(&self, path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every file belonging to a deleted record tree.
    ///
    /// Records are already gone, so failures are logged and skipped.
    pub fn remove_tree(&self, tree: &DeletedTree) {
        let artifact_files = tree
            .artifact_uris
            .iter()
            .filter(|uri| self.owns_artifact(uri))
            .map(PathBuf::from);
        let run_logs = tree.run_ids.iter().map(|id| self.run_log_path(id));
        let dataset_files = tree.dataset_files.iter().map(PathBuf::from);

        for path in artifact_files.chain(run_logs).chain(dataset_files) {
            if let Err(e) = self.remove_file(&path) {
                tracing::warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }

    fn sweep_partials(&self) -> Result<usize> {
        let mut swept = 0;
        for dir in [self.datasets_dir(), self.artifacts_dir()] {
            for entry in std::fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) == Some(PARTIAL_SUFFIX) {
                    self.remove_file(&path)?;
                    swept += 1;
                }
            }
        }
        Ok(swept)
    }
}

fn partial_path_for(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_owned();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// An upload being streamed to disk.
///
/// Tracks size and blake3 digest as chunks arrive.
pub struct PartialFile {
    path: PathBuf,
    final_path: PathBuf,
    file: Option<tokio::fs::File>,
    hasher: blake3::Hasher,
    size: u64,
}

impl PartialFile {
    async fn create(final_path: PathBuf) -> Result<Self> {
        let path = partial_path_for(&final_path);
        let file = tokio::fs::File::create(&path).await?;
        Ok(Self {
            path,
            final_path,
            file: Some(file),
            hasher: blake3::Hasher::new(),
            size: 0,
        })
    }

    pub async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.write_all(chunk).await?;
        }
        self.hasher.update(chunk);
        self.size += chunk.len() as u64;
        Ok(())
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Flush and close the file; it stays partial until promoted
    pub async fn finish(mut self) -> Result<StagedFile> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        Ok(StagedFile {
            path: std::mem::take(&mut self.path),
            final_path: std::mem::take(&mut self.final_path),
            size: self.size,
            checksum: self.hasher.finalize().to_hex().to_string(),
            promoted: false,
        })
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        // empty once finish() has handed the file over
        if !self.path.as_os_str().is_empty() {
            self.file.take();
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// A fully received upload waiting to be promoted to its final path
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    final_path: PathBuf,
    size: u64,
    checksum: String,
    promoted: bool,
}

impl StagedFile {
    /// Where the bytes currently are
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Rename into place and return the final path
    pub fn promote(mut self) -> Result<PathBuf> {
        std::fs::rename(&self.path, &self.final_path)?;
        self.promoted = true;
        Ok(self.final_path.clone())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.promoted {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
