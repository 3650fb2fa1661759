//! Read-only document tree
//!
//! Nodes live in a flat arena laid out depth-first; parents and children are
//! arena indices. A flat id index sits beside it for lookups.

use super::record::{DocumentKind, DocumentRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Index into `CatalogTree::nodes`
pub type NodeId = usize;

/// Id of the synthetic root holding records with no valid parent
pub const UNFILED_ID: &str = "::unfiled";
pub const UNFILED_NAME: &str = "Unfiled";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogNode {
    pub record: DocumentRecord,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub depth: usize,
    /// Deleted itself or under a deleted collection
    pub deleted: bool,
    /// The Unfiled root
    #[serde(default)]
    pub synthetic: bool,
}

/// Structural problem found while building. The build still completes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CatalogWarning {
    #[error("duplicate id {id}, keeping the most recently modified record")]
    DuplicateId { id: String },
    #[error("{id} points at missing parent {parent}, moved to Unfiled")]
    MissingParent { id: String, parent: String },
    #[error("{id} points at {parent} which is not a collection, moved to Unfiled")]
    ParentNotCollection { id: String, parent: String },
    #[error("{id} is part of a parent cycle through {parent}, moved to Unfiled")]
    Cycle { id: String, parent: String },
}

/// Counts over the documents in the tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogStats {
    pub documents: usize,
    pub collections: usize,
    pub notebooks: usize,
    pub pdfs: usize,
    pub epubs: usize,
    pub trashed: usize,
    pub total_pages: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogTree {
    pub nodes: Vec<CatalogNode>,
    /// Top-level nodes, sorted; Unfiled last when present
    pub roots: Vec<NodeId>,
    pub index: BTreeMap<String, NodeId>,
    pub unfiled: Option<NodeId>,
    pub warnings: Vec<CatalogWarning>,
}

impl CatalogTree {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&CatalogNode> {
        self.nodes.get(id)
    }

    pub fn find(&self, id: &str) -> Option<&CatalogNode> {
        self.index.get(id).and_then(|&idx| self.nodes.get(idx))
    }

    pub fn children_of(&self, id: &str) -> Vec<&CatalogNode> {
        self.find(id)
            .map(|node| node.children.iter().map(|&c| &self.nodes[c]).collect())
            .unwrap_or_default()
    }

    /// Names from the root down to `id`, joined with `/`
    pub fn path_of(&self, id: &str) -> Option<String> {
        let mut idx = *self.index.get(id)?;
        let mut segments = vec![self.nodes[idx].record.name.as_str()];
        while let Some(parent) = self.nodes[idx].parent {
            segments.push(self.nodes[parent].record.name.as_str());
            idx = parent;
        }
        segments.reverse();
        Some(segments.join("/"))
    }

    fn real_nodes(&self) -> impl Iterator<Item = &CatalogNode> {
        self.nodes.iter().filter(|n| !n.synthetic)
    }

    /// Documents, optionally restricted to one file type, in tree order
    pub fn documents(&self, file_type: Option<&str>) -> Vec<&DocumentRecord> {
        self.real_nodes()
            .map(|n| &n.record)
            .filter(|r| r.kind == DocumentKind::Document)
            .filter(|r| match file_type {
                Some(wanted) => r.file_type.as_deref() == Some(wanted),
                None => true,
            })
            .collect()
    }

    /// Case-insensitive title search over documents, newest first
    pub fn search(&self, query: &str) -> Vec<&DocumentRecord> {
        let needle = query.to_lowercase();
        let mut hits: Vec<&DocumentRecord> = self
            .documents(None)
            .into_iter()
            .filter(|r| r.name.to_lowercase().contains(&needle))
            .collect();
        hits.sort_by(|a, b| {
            b.last_modified
                .cmp(&a.last_modified)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.id.cmp(&b.id))
        });
        hits
    }

    pub fn stats(&self) -> CatalogStats {
        let mut stats = CatalogStats::default();
        for node in self.real_nodes() {
            let record = &node.record;
            if record.is_collection() {
                stats.collections += 1;
                continue;
            }
            stats.documents += 1;
            stats.total_pages += u64::from(record.page_count);
            if node.deleted {
                stats.trashed += 1;
            }
            match record.file_type.as_deref() {
                Some("notebook") => stats.notebooks += 1,
                Some("pdf") => stats.pdfs += 1,
                Some("epub") => stats.epubs += 1,
                _ => {}
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::builder::{build_catalog, CatalogOptions};
    use chrono::{TimeZone, Utc};

    fn doc(id: &str, name: &str, file_type: &str, pages: u32, modified: i64) -> DocumentRecord {
        let mut record = DocumentRecord::document(id, name, Some("f"));
        record.file_type = Some(file_type.to_string());
        record.page_count = pages;
        record.last_modified = Utc.timestamp_opt(modified, 0).unwrap();
        record
    }

    fn sample() -> CatalogTree {
        let records = vec![
            DocumentRecord::collection("f", "Meeting notes", None),
            doc("n1", "Meeting Monday", "notebook", 4, 300),
            doc("n2", "meeting tuesday", "notebook", 2, 100),
            doc("p1", "Meeting agenda", "pdf", 10, 300),
            doc("p0", "Meeting agenda", "pdf", 1, 300),
            doc("e1", "Novel", "epub", 250, 500),
        ];
        build_catalog(&records, CatalogOptions::default())
    }

    fn ids(records: &[&DocumentRecord]) -> Vec<String> {
        records.iter().map(|r| r.id.clone()).collect()
    }

    #[test]
    fn test_search_is_case_insensitive_and_newest_first() {
        let tree = sample();
        // Same timestamp sorts by name in byte order, then id; the collection never matches
        assert_eq!(ids(&tree.search("MEETING")), vec!["n1", "p0", "p1", "n2"]);
        assert_eq!(ids(&tree.search("novel")), vec!["e1"]);
        assert!(tree.search("missing").is_empty());
    }

    #[test]
    fn test_documents_filter_by_type() {
        let tree = sample();
        assert_eq!(tree.documents(None).len(), 5);
        assert_eq!(tree.documents(Some("pdf")).len(), 2);
        assert!(tree.documents(Some("docx")).is_empty());
    }

    #[test]
    fn test_stats_counts_kinds_and_pages() {
        let stats = sample().stats();
        assert_eq!(
            stats,
            CatalogStats {
                documents: 5,
                collections: 1,
                notebooks: 2,
                pdfs: 2,
                epubs: 1,
                trashed: 0,
                total_pages: 267,
            }
        );
    }

    #[test]
    fn test_stats_skip_the_unfiled_root() {
        let records = vec![DocumentRecord::document("x", "Orphan", Some("gone"))];
        let tree = build_catalog(&records, CatalogOptions::default());
        assert!(tree.unfiled.is_some());
        assert_eq!(tree.stats().collections, 0);
        assert_eq!(tree.stats().documents, 1);
        assert_eq!(tree.children_of("x").len(), 0);
    }
}
