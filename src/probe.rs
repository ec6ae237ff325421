//! Filesystem probe for the download directory.
//!
//! The probe is the authoritative definition of "downloaded": a non-empty file
//! named `{id}.{ext}` where `ext` is one of [`SUPPORTED_EXTENSIONS`]. In-progress
//! transfers live at `{id}.{ext}.part` and never count as downloaded. The record
//! store may disagree with the probe for a while; it is reconciled against the
//! probe, never the reverse.

use crate::error::Result;
use crate::types::TaskId;
use std::path::{Path, PathBuf};

/// Extensions a completed artifact may carry, in probe order
pub const SUPPORTED_EXTENSIONS: [&str; 7] = ["mp3", "flac", "ogg", "opus", "aac", "m4a", "wav"];

/// Suffix marking an incomplete transfer
pub const PART_SUFFIX: &str = "part";

/// File name of an in-progress transfer
pub fn part_file_name(id: &TaskId, ext: &str) -> String {
    format!("{}.{}.{}", id, ext, PART_SUFFIX)
}

/// File name of a completed artifact
pub fn final_file_name(id: &TaskId, ext: &str) -> String {
    format!("{}.{}", id, ext)
}

/// A file in the download directory that follows the naming convention
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactName {
    /// Track id
    pub id: TaskId,
    /// Recognized extension
    pub ext: String,
    /// Whether the file is a `.part` file
    pub partial: bool,
}

/// Parse a file name into its id and extension
///
/// Returns None for names that don't end in a recognized extension (optionally
/// followed by `.part`). Ids may themselves contain dots.
pub fn parse_artifact_name(name: &str) -> Option<ArtifactName> {
    let (stem, partial) = match name.strip_suffix(".part") {
        Some(stem) => (stem, true),
        None => (name, false),
    };

    let (id, ext) = stem.rsplit_once('.')?;
    if id.is_empty() || !SUPPORTED_EXTENSIONS.contains(&ext) {
        return None;
    }

    Some(ArtifactName {
        id: TaskId::from(id),
        ext: ext.to_string(),
        partial,
    })
}

/// A `.part` file found for an id
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartialFile {
    /// Full path of the `.part` file
    pub path: PathBuf,
    /// Target extension encoded in the name
    pub ext: String,
    /// Current length in bytes
    pub len: u64,
}

/// Scans and maintains the download directory
#[derive(Clone, Debug)]
pub struct FileProbe {
    dir: PathBuf,
    min_valid_size: u64,
}

impl FileProbe {
    /// Create a probe over `dir`; completed files below `min_valid_size` bytes are considered corrupt
    pub fn new(dir: impl Into<PathBuf>, min_valid_size: u64) -> Self {
        Self {
            dir: dir.into(),
            min_valid_size,
        }
    }

    /// The directory being probed
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the in-progress file for `id`
    pub fn part_path(&self, id: &TaskId, ext: &str) -> PathBuf {
        self.dir.join(part_file_name(id, ext))
    }

    /// Path of the completed artifact for `id`
    pub fn final_path(&self, id: &TaskId, ext: &str) -> PathBuf {
        self.dir.join(final_file_name(id, ext))
    }

    /// First non-empty completed artifact for `id`, trying every supported extension
    pub async fn downloaded_path(&self, id: &TaskId) -> Option<PathBuf> {
        for ext in SUPPORTED_EXTENSIONS {
            let path = self.final_path(id, ext);
            if let Ok(meta) = tokio::fs::metadata(&path).await
                && meta.is_file()
                && meta.len() > 0
            {
                return Some(path);
            }
        }
        None
    }

    /// Whether a complete, non-empty artifact exists for `id`
    pub async fn is_downloaded(&self, id: &TaskId) -> bool {
        self.downloaded_path(id).await.is_some()
    }

    /// Size of the completed artifact for `id` (0 if absent)
    pub async fn size_of(&self, id: &TaskId) -> u64 {
        match self.downloaded_path(id).await {
            Some(path) => tokio::fs::metadata(&path)
                .await
                .map(|m| m.len())
                .unwrap_or(0),
            None => 0,
        }
    }

    /// Ids of all completed artifacts, enumerating the directory once
    pub async fn list_downloaded_ids(&self) -> Result<Vec<TaskId>> {
        let mut ids: Vec<TaskId> = self
            .completed_files()
            .await?
            .into_iter()
            .filter(|(_, _, len)| *len > 0)
            .map(|(name, _, _)| name.id)
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    /// Total bytes of all completed artifacts
    pub async fn total_size(&self) -> Result<u64> {
        Ok(self
            .completed_files()
            .await?
            .iter()
            .map(|(_, _, len)| *len)
            .sum())
    }

    /// Delete completed artifacts smaller than the minimum plausible size
    ///
    /// Returns how many files were removed. Removed tracks must be submitted
    /// again as fresh downloads.
    pub async fn cleanup_corrupted(&self) -> Result<usize> {
        let mut removed = 0;

        for (name, path, len) in self.completed_files().await? {
            if len >= self.min_valid_size {
                continue;
            }

            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    tracing::warn!(
                        task_id = %name.id,
                        path = %path.display(),
                        size = len,
                        min_size = self.min_valid_size,
                        "Removed corrupt download"
                    );
                    removed += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        task_id = %name.id,
                        path = %path.display(),
                        error = %e,
                        "Failed to remove corrupt download"
                    );
                }
            }
        }

        if removed > 0 {
            tracing::info!(removed, "Corruption cleanup complete");
        }

        Ok(removed)
    }

    /// Largest `.part` file for `id`, if any
    pub async fn find_partial(&self, id: &TaskId) -> Option<PartialFile> {
        let mut found: Option<PartialFile> = None;

        for ext in SUPPORTED_EXTENSIONS {
            let path = self.part_path(id, ext);
            if let Ok(meta) = tokio::fs::metadata(&path).await
                && meta.is_file()
                && found.as_ref().is_none_or(|f| meta.len() > f.len)
            {
                found = Some(PartialFile {
                    path,
                    ext: ext.to_string(),
                    len: meta.len(),
                });
            }
        }

        found
    }

    /// Delete every `.part` file for `id`; returns how many were removed
    pub async fn remove_partials(&self, id: &TaskId) -> usize {
        let mut removed = 0;
        for ext in SUPPORTED_EXTENSIONS {
            let path = self.part_path(id, ext);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(
                        task_id = %id,
                        path = %path.display(),
                        error = %e,
                        "Failed to delete partial file"
                    );
                }
            }
        }
        removed
    }

    /// Synchronous [`remove_partials`](Self::remove_partials) for callers holding a lock
    pub fn remove_partials_blocking(&self, id: &TaskId) -> usize {
        SUPPORTED_EXTENSIONS
            .iter()
            .filter(|ext| self.remove_file_blocking(id, &self.part_path(id, ext)))
            .count()
    }

    /// Unlink `path`; returns whether it existed. Failures other than a missing file are logged
    pub fn remove_file_blocking(&self, id: &TaskId, path: &Path) -> bool {
        match std::fs::remove_file(path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                tracing::warn!(
                    task_id = %id,
                    path = %path.display(),
                    error = %e,
                    "Failed to delete file"
                );
                false
            }
        }
    }

    /// Delete the completed artifact for `id`; returns whether one existed
    pub async fn remove_downloaded(&self, id: &TaskId) -> Result<bool> {
        let mut removed = false;
        for ext in SUPPORTED_EXTENSIONS {
            let path = self.final_path(id, ext);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }

    /// Completed (non-`.part`) artifacts with their paths and sizes
    async fn completed_files(&self) -> Result<Vec<(ArtifactName, PathBuf, u64)>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str().and_then(parse_artifact_name) else {
                continue;
            };
            if name.partial {
                continue;
            }

            let meta = match entry.metadata().await {
                Ok(meta) if meta.is_file() => meta,
                _ => continue,
            };
            files.push((name, entry.path(), meta.len()));
        }

        Ok(files)
    }
}
