//! Remote device collaborator
//!
//! The sync core only needs a listing and a per-path byte fetch. The transport
//! behind it (SFTP, USB web interface, a copied backup) is not our concern.

use super::types::RemoteFileRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Failure reported by a `RemoteSource`
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// The device could not be reached at all
    #[error("unreachable: {0}")]
    Unreachable(String),
    /// Credentials were rejected
    #[error("authentication rejected: {0}")]
    Authentication(String),
    /// A single path could not be read
    #[error("cannot read {path}: {details}")]
    Read { path: String, details: String },
}

/// A device we can mirror from
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Human readable location, used in errors and logs
    fn describe(&self) -> String;

    /// Full recursive listing of the document store
    async fn list(&self) -> Result<Vec<RemoteFileRecord>, SourceError>;

    /// Bytes of one file, by relative path
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, SourceError>;
}

/// A mounted or copied document store on the local filesystem
pub struct LocalMirrorSource {
    root: PathBuf,
}

impl LocalMirrorSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, rel: &str) -> Result<PathBuf, SourceError> {
        // Reject anything that would escape the root
        if rel.split('/').any(|seg| seg == "..") || Path::new(rel).is_absolute() {
            return Err(SourceError::Read {
                path: rel.to_string(),
                details: "path escapes the document store".to_string(),
            });
        }
        Ok(self.root.join(rel))
    }

    fn list_blocking(root: &Path) -> Result<Vec<RemoteFileRecord>, SourceError> {
        if !root.is_dir() {
            return Err(SourceError::Unreachable(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let mut records = Vec::new();
        for entry in WalkDir::new(root).follow_links(false).min_depth(1) {
            let entry = entry.map_err(|e| SourceError::Unreachable(e.to_string()))?;
            let rel = match entry.path().strip_prefix(root) {
                Ok(rel) => rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/"),
                Err(_) => continue,
            };

            let metadata = entry.metadata().map_err(|e| SourceError::Read {
                path: rel.clone(),
                details: e.to_string(),
            })?;
            let modified: DateTime<Utc> = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| DateTime::<Utc>::UNIX_EPOCH);

            if entry.file_type().is_dir() {
                records.push(RemoteFileRecord::directory(rel, modified));
            } else if entry.file_type().is_file() {
                records.push(RemoteFileRecord::file(rel, metadata.len(), modified));
            }
        }

        Ok(records)
    }
}

#[async_trait]
impl RemoteSource for LocalMirrorSource {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    async fn list(&self) -> Result<Vec<RemoteFileRecord>, SourceError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || Self::list_blocking(&root))
            .await
            .map_err(|e| SourceError::Unreachable(format!("listing task failed: {}", e)))?
    }

    async fn fetch(&self, path: &str) -> Result<Vec<u8>, SourceError> {
        let full = self.resolve(path)?;
        tokio::fs::read(&full).await.map_err(|e| SourceError::Read {
            path: path.to_string(),
            details: e.to_string(),
        })
    }
}
