//! Record set loading and catalog persistence

use super::builder::{build_catalog, CatalogOptions};
use super::record::{load_record, DocumentRecord};
use super::tree::CatalogTree;
use crate::error::CatalogError;
use crate::sync::ChangeSet;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const METADATA_EXT: &str = "metadata";
const CONTENT_EXT: &str = "content";

/// All parsed document records of a raw mirror, keyed by id
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    records: BTreeMap<String, DocumentRecord>,
    /// Ids whose files could not be parsed, with the parse error
    malformed: BTreeMap<String, String>,
}

impl RecordSet {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&DocumentRecord> {
        self.records.get(id)
    }

    pub fn records(&self) -> Vec<DocumentRecord> {
        self.records.values().cloned().collect()
    }

    /// One message per file that currently fails to parse
    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.malformed.values().map(String::as_str)
    }

    /// Full load of every top-level `*.metadata` file.
    ///
    /// Malformed files become warnings. If there are metadata files and not a
    /// single one parses, the mirror is unusable and that is an error.
    pub fn load_dir(raw_dir: &Path) -> Result<Self, CatalogError> {
        let mut set = Self::default();
        if !raw_dir.exists() {
            return Ok(set);
        }

        let mut ids = BTreeSet::new();
        for entry in fs::read_dir(raw_dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(METADATA_EXT) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.insert(stem.to_string());
                }
            }
        }

        for id in &ids {
            set.reload(raw_dir, id);
        }

        if !ids.is_empty() && set.records.is_empty() {
            return Err(CatalogError::NoMetadata {
                dir: raw_dir.display().to_string(),
                attempted: ids.len(),
            });
        }

        info!(
            records = set.records.len(),
            warnings = set.malformed.len(),
            "Loaded document records"
        );
        Ok(set)
    }

    /// Re-read only the records a sync touched. Returns how many ids were
    /// refreshed or dropped. Afterwards the set is what `load_dir` would give.
    pub fn apply_changes(&mut self, changes: &ChangeSet, raw_dir: &Path) -> usize {
        let ids: BTreeSet<&str> = changes
            .touched_paths()
            .filter_map(record_id_for_path)
            .collect();

        for id in &ids {
            if raw_dir.join(format!("{}.{}", id, METADATA_EXT)).exists() {
                self.reload(raw_dir, id);
            } else {
                self.malformed.remove(*id);
                if self.records.remove(*id).is_some() {
                    debug!(id, "Dropped record");
                }
            }
        }
        ids.len()
    }

    fn reload(&mut self, raw_dir: &Path, id: &str) {
        match load_record(raw_dir, id) {
            Ok(record) => {
                self.malformed.remove(id);
                self.records.insert(id.to_string(), record);
            }
            Err(e) => {
                warn!(error = %e, "Skipping malformed record");
                if self.records.remove(id).is_some() {
                    debug!(id, "Dropped record that no longer parses");
                }
                self.malformed.insert(id.to_string(), e.to_string());
            }
        }
    }

    pub fn build(&self, options: CatalogOptions) -> CatalogTree {
        build_catalog(&self.records(), options)
    }
}

/// `<id>.metadata` or `<id>.content` at the top level of the mirror
fn record_id_for_path(path: &str) -> Option<&str> {
    if path.contains('/') {
        return None;
    }
    let (stem, ext) = path.rsplit_once('.')?;
    (ext == METADATA_EXT || ext == CONTENT_EXT).then_some(stem)
}

/// Saved catalog snapshot, pretty JSON with stable ordering
pub struct CatalogStore {
    path: PathBuf,
}

impl CatalogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn save(&self, tree: &CatalogTree) -> Result<(), CatalogError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(tree)?;
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, json)?;
        fs::rename(&temp_path, &self.path)?;
        debug!(path = %self.path.display(), nodes = tree.len(), "Saved catalog");
        Ok(())
    }

    /// Missing file is an empty catalog
    pub fn load(&self) -> Result<CatalogTree, CatalogError> {
        if !self.path.exists() {
            return Ok(CatalogTree::default());
        }
        let json = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&json)?)
    }
}
