//! Persisted sync manifest
//!
//! Records every remote file we have mirrored. Entries are never dropped on
//! deletion; they are tombstoned so that a file re-created later is seen as
//! new. Only an explicit resync (`Manifest::clear`) empties the manifest.
//!
//! Stored as pretty JSON keyed by path (sorted), written atomically via a
//! temp file + rename. A lock file in the data directory keeps two syncs from
//! touching the manifest at once.

use super::types::{EntryKind, RemoteFileRecord};
use crate::error::SyncError;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Persisted counterpart of a `RemoteFileRecord`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncManifestEntry {
    pub path: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub kind: EntryKind,
    /// When we last downloaded this path
    pub synced_at: DateTime<Utc>,
    /// SHA-256 of the downloaded content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Set when the path disappeared from the remote listing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SyncManifestEntry {
    /// Entry for a freshly downloaded record
    pub fn from_record(
        record: &RemoteFileRecord,
        synced_at: DateTime<Utc>,
        fingerprint: Option<String>,
    ) -> Self {
        Self {
            path: record.path.clone(),
            size: record.size,
            modified: record.modified,
            kind: record.kind,
            synced_at,
            fingerprint,
            deleted_at: None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Mapping path -> entry, including tombstones
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub entries: BTreeMap<String, SyncManifestEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&SyncManifestEntry> {
        self.entries.get(path)
    }

    /// Insert or replace the entry for a downloaded file
    pub fn upsert(&mut self, entry: SyncManifestEntry) {
        self.entries.insert(entry.path.clone(), entry);
    }

    /// Tombstone a path. Unknown paths are ignored.
    pub fn mark_deleted(&mut self, path: &str, at: DateTime<Utc>) {
        if let Some(entry) = self.entries.get_mut(path) {
            if entry.deleted_at.is_none() {
                entry.deleted_at = Some(at);
            }
        }
    }

    /// Entries that are not tombstoned
    pub fn live_entries(&self) -> impl Iterator<Item = &SyncManifestEntry> {
        self.entries.values().filter(|e| !e.is_tombstone())
    }

    pub fn live_count(&self) -> usize {
        self.live_entries().count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Explicit resync: forget everything, tombstones included
    pub fn clear(&mut self) {
        self.entries.clear();
        self.last_sync = None;
    }
}

/// Loads and saves the manifest file
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the manifest; a missing file is an empty manifest
    pub fn load(&self) -> Result<Manifest, SyncError> {
        if !self.path.exists() {
            return Ok(Manifest::new());
        }
        let json = fs::read_to_string(&self.path)?;
        let manifest: Manifest = serde_json::from_str(&json)?;
        tracing::debug!(
            path = %self.path.display(),
            entries = manifest.len(),
            "Loaded manifest"
        );
        Ok(manifest)
    }

    /// Save atomically by writing a temp file and renaming over the target
    pub fn save(&self, manifest: &Manifest) -> Result<(), SyncError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(manifest)?;
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, json)?;
        fs::rename(&temp_path, &self.path)?;

        tracing::debug!(
            path = %self.path.display(),
            entries = manifest.len(),
            "Saved manifest"
        );
        Ok(())
    }
}

/// Exclusive lock on the data directory, held for the duration of a sync.
/// Released when dropped.
pub struct DataDirLock {
    file: File,
}

impl DataDirLock {
    /// Try to take the lock without blocking
    pub fn acquire(data_dir: &Path) -> Result<Self, SyncError> {
        fs::create_dir_all(data_dir)?;
        let lock_path = data_dir.join(".sync.lock");
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        file.try_lock_exclusive()
            .map_err(|e| SyncError::Lock(format!("{}: {}", lock_path.display(), e)))?;

        Ok(Self { file })
    }
}

impl Drop for DataDirLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
