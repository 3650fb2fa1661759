//! Incremental pull from the tablet into the local raw mirror

use super::changeset::{detect, ChangeSet};
use super::checksum::fingerprint_bytes;
use super::manifest::{DataDirLock, Manifest, ManifestStore, SyncManifestEntry};
use super::source::RemoteSource;
use super::types::{format_file_size, EntryKind, RemoteFileRecord};
use crate::error::SyncError;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Progress callback: (files processed, files to fetch)
pub type ProgressCallback = Box<dyn Fn(usize, usize) + Send + Sync>;

/// Outcome of one sync run
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Files written to the raw mirror
    pub downloaded: usize,
    /// Paths left alone because nothing changed
    pub skipped: usize,
    /// Paths newly tombstoned
    pub deleted: usize,
    /// One message per file that could not be fetched or written
    pub errors: Vec<String>,
    /// Bytes written
    pub bytes: u64,
    pub changes: ChangeSet,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} downloaded ({}), {} unchanged, {} deleted, {} errors",
            self.downloaded,
            format_file_size(self.bytes),
            self.skipped,
            self.deleted,
            self.errors.len()
        )
    }
}

/// One sync against one device into one data directory
pub struct SyncSession<'a> {
    source: &'a dyn RemoteSource,
    data_dir: PathBuf,
    raw_dir: PathBuf,
    store: ManifestStore,
    workers: usize,
    force: bool,
    progress: Option<ProgressCallback>,
}

impl<'a> SyncSession<'a> {
    pub fn new(
        source: &'a dyn RemoteSource,
        data_dir: impl Into<PathBuf>,
        raw_dir: impl Into<PathBuf>,
        manifest_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            data_dir: data_dir.into(),
            raw_dir: raw_dir.into(),
            store: ManifestStore::new(manifest_file),
            workers: 4,
            force: false,
            progress: None,
        }
    }

    /// Re-download every remote file and accept an empty listing
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Parallel fetches (at least one)
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Run the sync. Aborts without touching the manifest if the listing
    /// fails; per-file failures are collected into the report instead.
    pub async fn run(self) -> Result<SyncReport, SyncError> {
        let _lock = DataDirLock::acquire(&self.data_dir)?;
        let mut manifest = self.store.load()?;

        let mut changes = detect(self.source, &manifest, self.force).await?;
        if self.force {
            promote_unchanged(&mut changes, &manifest);
        }

        let mut report = SyncReport {
            skipped: changes.unchanged.len(),
            ..SyncReport::default()
        };
        let now = Utc::now();

        // Directories first so file writes have somewhere to land
        for record in changes
            .added
            .iter()
            .chain(changes.updated.iter())
            .filter(|r| r.kind == EntryKind::Directory)
        {
            let local = match local_path(&self.raw_dir, &record.path) {
                Ok(local) => local,
                Err(e) => {
                    warn!(path = %record.path, "Skipping directory outside the raw mirror");
                    report.errors.push(e.to_string());
                    continue;
                }
            };
            match tokio::fs::create_dir_all(&local).await {
                Ok(()) => manifest.upsert(SyncManifestEntry::from_record(record, now, None)),
                Err(e) => report
                    .errors
                    .push(format!("{}: {}", record.path, e)),
            }
        }

        let to_fetch: Vec<&RemoteFileRecord> = changes.to_fetch().collect();
        let total = to_fetch.len();
        let mut processed = 0usize;

        let source = self.source;
        let raw_dir = &self.raw_dir;
        let mut fetches = stream::iter(to_fetch)
            .map(|record| async move {
                let outcome = fetch_one(source, raw_dir, record).await;
                (record, outcome)
            })
            .buffer_unordered(self.workers);

        while let Some((record, outcome)) = fetches.next().await {
            processed += 1;
            match outcome {
                Ok((fingerprint, written)) => {
                    debug!(path = %record.path, bytes = written, "Fetched");
                    manifest.upsert(SyncManifestEntry::from_record(
                        record,
                        Utc::now(),
                        Some(fingerprint),
                    ));
                    report.downloaded += 1;
                    report.bytes += written;
                }
                Err(e) => {
                    // Entry stays as it was so the next sync retries
                    warn!(path = %record.path, error = %e, "Fetch failed");
                    report.errors.push(e.to_string());
                }
            }
            if let Some(ref callback) = self.progress {
                callback(processed, total);
            }
        }
        drop(fetches);

        for path in &changes.deleted {
            let local = match local_path(&self.raw_dir, path) {
                Ok(local) => local,
                Err(e) => {
                    report.errors.push(e.to_string());
                    continue;
                }
            };
            if let Err(e) = remove_local(&local).await {
                warn!(path = %path, error = %e, "Could not remove local copy");
                report.errors.push(format!("{}: {}", path, e));
            }
            manifest.mark_deleted(path, now);
            report.deleted += 1;
        }

        manifest.last_sync = Some(now);
        self.store.save(&manifest)?;

        info!("Sync complete: {}", report.summary());
        report.changes = changes;
        Ok(report)
    }
}

/// Explicit resync: forget every manifest entry, tombstones included
pub fn reset_manifest(manifest_file: &Path) -> Result<(), SyncError> {
    let store = ManifestStore::new(manifest_file);
    let mut manifest = store.load()?;
    manifest.clear();
    store.save(&manifest)
}

/// Under `force`, unchanged live files are treated as updated. Their manifest
/// entry matches the remote record exactly, so it can stand in for it.
fn promote_unchanged(changes: &mut ChangeSet, manifest: &Manifest) {
    let mut still_unchanged = Vec::new();
    for path in changes.unchanged.drain(..) {
        match manifest.get(&path) {
            Some(entry) if !entry.is_tombstone() && entry.kind == EntryKind::File => {
                changes.updated.push(RemoteFileRecord::file(
                    entry.path.clone(),
                    entry.size,
                    entry.modified,
                ));
            }
            _ => still_unchanged.push(path),
        }
    }
    changes.unchanged = still_unchanged;
    changes.updated.sort_by(|a, b| a.path.cmp(&b.path));
}

/// Where a listed path lands in the raw mirror. Listings come from the
/// device, so `..` segments are refused rather than followed.
fn local_path(raw_dir: &Path, rel: &str) -> Result<PathBuf, SyncError> {
    if rel.split('/').any(|seg| seg == "..") {
        return Err(SyncError::Fetch {
            path: rel.to_string(),
            details: "path escapes the raw mirror".to_string(),
        });
    }
    Ok(rel
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .fold(raw_dir.to_path_buf(), |acc, seg| acc.join(seg)))
}

async fn fetch_one(
    source: &dyn RemoteSource,
    raw_dir: &Path,
    record: &RemoteFileRecord,
) -> Result<(String, u64), SyncError> {
    let target = local_path(raw_dir, &record.path)?;
    let bytes = source.fetch(&record.path).await.map_err(|e| SyncError::Fetch {
        path: record.path.clone(),
        details: e.to_string(),
    })?;

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    // Temp file + rename so a crash never leaves a half-written file behind
    let mut temp_name = target.file_name().unwrap_or_default().to_os_string();
    temp_name.push(".part");
    let temp = target.with_file_name(temp_name);
    tokio::fs::write(&temp, &bytes).await?;
    tokio::fs::rename(&temp, &target).await?;

    Ok((fingerprint_bytes(&bytes), bytes.len() as u64))
}

async fn remove_local(path: &Path) -> std::io::Result<()> {
    let result = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) => Err(e),
    };
    match result {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
