//! Change detection between a remote listing and the local manifest
//!
//! Every path in `remote ∪ manifest` lands in exactly one bucket. Any
//! difference in size or modification time counts as an update: re-downloading
//! a file is cheaper than missing an edit.

use super::manifest::Manifest;
use super::source::{RemoteSource, SourceError};
use super::types::{EntryKind, RemoteFileRecord};
use crate::error::SyncError;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Result of comparing a listing against the manifest. Every list is sorted
/// by path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
    pub added: Vec<RemoteFileRecord>,
    pub updated: Vec<RemoteFileRecord>,
    pub deleted: Vec<String>,
    pub unchanged: Vec<String>,
}

impl ChangeSet {
    /// Nothing to download or delete
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Files (not directories) that need downloading
    pub fn to_fetch(&self) -> impl Iterator<Item = &RemoteFileRecord> {
        self.added
            .iter()
            .chain(self.updated.iter())
            .filter(|r| r.is_file())
    }

    /// Every path touched by this change set, in no particular order
    pub fn touched_paths(&self) -> impl Iterator<Item = &str> {
        self.added
            .iter()
            .chain(self.updated.iter())
            .map(|r| r.path.as_str())
            .chain(self.deleted.iter().map(String::as_str))
    }

    pub fn summary(&self) -> String {
        format!(
            "{} added, {} updated, {} deleted, {} unchanged",
            self.added.len(),
            self.updated.len(),
            self.deleted.len(),
            self.unchanged.len()
        )
    }
}

/// Pure comparison of a listing with the manifest
pub fn compute_change_set(remote: &[RemoteFileRecord], manifest: &Manifest) -> ChangeSet {
    // Later duplicates in the listing win
    let by_path: BTreeMap<&str, &RemoteFileRecord> =
        remote.iter().map(|r| (r.path.as_str(), r)).collect();

    let mut changes = ChangeSet::default();

    for (path, record) in &by_path {
        match manifest.get(path) {
            None => changes.added.push((*record).clone()),
            Some(entry) if entry.is_tombstone() => changes.added.push((*record).clone()),
            Some(entry) => {
                let differs = match record.kind {
                    EntryKind::Directory => entry.kind != EntryKind::Directory,
                    EntryKind::File => {
                        entry.kind != EntryKind::File
                            || entry.size != record.size
                            || entry.modified != record.modified
                    }
                };
                if differs {
                    changes.updated.push((*record).clone());
                } else {
                    changes.unchanged.push(path.to_string());
                }
            }
        }
    }

    for (path, entry) in &manifest.entries {
        if by_path.contains_key(path.as_str()) {
            continue;
        }
        if entry.is_tombstone() {
            changes.unchanged.push(path.clone());
        } else {
            changes.deleted.push(path.clone());
        }
    }

    changes.unchanged.sort();
    changes
}

/// Map a transport failure to the error that aborts the sync
pub(crate) fn listing_error(host: String, err: SourceError) -> SyncError {
    match err {
        SourceError::Authentication(details) => SyncError::Authentication { host, details },
        SourceError::Unreachable(details) => SyncError::ListingUnavailable { host, details },
        SourceError::Read { path, details } => SyncError::ListingUnavailable {
            host,
            details: format!("{}: {}", path, details),
        },
    }
}

/// List the remote store and compare it with the manifest.
///
/// Fails closed: if the listing cannot be obtained the caller gets an error
/// and must leave the manifest untouched. An empty listing while live files
/// are tracked is also refused unless `force` is set, since a wiped device
/// and a wrong remote path look identical from here.
pub async fn detect(
    source: &dyn RemoteSource,
    manifest: &Manifest,
    force: bool,
) -> Result<ChangeSet, SyncError> {
    let listing = source
        .list()
        .await
        .map_err(|e| listing_error(source.describe(), e))?;

    let tracked = manifest.live_count();
    if listing.is_empty() && tracked > 0 && !force {
        warn!(tracked, source = %source.describe(), "Remote listing is empty, refusing to sync");
        return Err(SyncError::SuspiciousEmptyListing { tracked });
    }

    let changes = compute_change_set(&listing, manifest);
    info!(remote = listing.len(), "Change detection: {}", changes.summary());
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::manifest::SyncManifestEntry;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::HashSet;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn manifest_with(records: &[RemoteFileRecord]) -> Manifest {
        let mut manifest = Manifest::new();
        for record in records {
            manifest.upsert(SyncManifestEntry::from_record(record, ts(1_000), None));
        }
        manifest
    }

    struct FixedSource(Result<Vec<RemoteFileRecord>, SourceError>);

    #[async_trait]
    impl RemoteSource for FixedSource {
        fn describe(&self) -> String {
            "test-device".to_string()
        }

        async fn list(&self) -> Result<Vec<RemoteFileRecord>, SourceError> {
            self.0.clone()
        }

        async fn fetch(&self, path: &str) -> Result<Vec<u8>, SourceError> {
            Err(SourceError::Read {
                path: path.to_string(),
                details: "not supported".to_string(),
            })
        }
    }

    #[test]
    fn test_partition_is_total_and_disjoint() {
        let manifest = {
            let mut m = manifest_with(&[
                RemoteFileRecord::file("keep", 10, ts(10)),
                RemoteFileRecord::file("grow", 10, ts(10)),
                RemoteFileRecord::file("gone", 10, ts(10)),
                RemoteFileRecord::file("old-tombstone", 10, ts(10)),
                RemoteFileRecord::file("revived", 10, ts(10)),
            ]);
            m.mark_deleted("old-tombstone", ts(20));
            m.mark_deleted("revived", ts(20));
            m
        };
        let remote = vec![
            RemoteFileRecord::file("keep", 10, ts(10)),
            RemoteFileRecord::file("grow", 11, ts(10)),
            RemoteFileRecord::file("new", 5, ts(30)),
            RemoteFileRecord::file("revived", 10, ts(10)),
        ];

        let changes = compute_change_set(&remote, &manifest);

        let added: Vec<_> = changes.added.iter().map(|r| r.path.as_str()).collect();
        let updated: Vec<_> = changes.updated.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(added, vec!["new", "revived"]);
        assert_eq!(updated, vec!["grow"]);
        assert_eq!(changes.deleted, vec!["gone"]);
        assert_eq!(changes.unchanged, vec!["keep", "old-tombstone"]);

        let mut seen = HashSet::new();
        for path in changes
            .added
            .iter()
            .chain(changes.updated.iter())
            .map(|r| r.path.clone())
            .chain(changes.deleted.iter().cloned())
            .chain(changes.unchanged.iter().cloned())
        {
            assert!(seen.insert(path), "path classified twice");
        }
        let universe: HashSet<String> = remote
            .iter()
            .map(|r| r.path.clone())
            .chain(manifest.entries.keys().cloned())
            .collect();
        assert_eq!(seen, universe);
    }

    #[test]
    fn test_any_timestamp_difference_is_an_update() {
        let manifest = manifest_with(&[RemoteFileRecord::file("a", 10, ts(100))]);
        let earlier = vec![RemoteFileRecord::file("a", 10, ts(99))];
        let changes = compute_change_set(&earlier, &manifest);
        assert_eq!(changes.updated.len(), 1);
        assert!(changes.unchanged.is_empty());
    }

    #[test]
    fn test_directories_compare_by_presence() {
        let manifest = manifest_with(&[RemoteFileRecord::directory("doc", ts(1))]);
        let remote = vec![RemoteFileRecord::directory("doc", ts(500))];
        let changes = compute_change_set(&remote, &manifest);
        assert_eq!(changes.unchanged, vec!["doc"]);
        assert_eq!(changes.to_fetch().count(), 0);
    }

    #[tokio::test]
    async fn test_detect_fails_closed_when_listing_unavailable() {
        let manifest = manifest_with(&[RemoteFileRecord::file("a", 1, ts(1))]);
        let source = FixedSource(Err(SourceError::Unreachable("timed out".to_string())));

        let err = detect(&source, &manifest, false).await.unwrap_err();
        assert!(matches!(err, SyncError::ListingUnavailable { ref host, .. } if host == "test-device"));
    }

    #[tokio::test]
    async fn test_detect_maps_authentication_failure() {
        let source = FixedSource(Err(SourceError::Authentication("bad key".to_string())));
        let err = detect(&source, &Manifest::new(), false).await.unwrap_err();
        assert!(matches!(err, SyncError::Authentication { .. }));
    }

    #[tokio::test]
    async fn test_detect_refuses_empty_listing_unless_forced() {
        let manifest = manifest_with(&[
            RemoteFileRecord::file("a", 1, ts(1)),
            RemoteFileRecord::file("b", 1, ts(1)),
        ]);
        let source = FixedSource(Ok(Vec::new()));

        let err = detect(&source, &manifest, false).await.unwrap_err();
        assert!(matches!(err, SyncError::SuspiciousEmptyListing { tracked: 2 }));

        let changes = detect(&source, &manifest, true).await.unwrap();
        assert_eq!(changes.deleted, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_detect_empty_listing_on_first_sync_is_fine() {
        let source = FixedSource(Ok(Vec::new()));
        let changes = detect(&source, &Manifest::new(), false).await.unwrap();
        assert!(changes.is_empty());
    }
}
