//! Builds the document tree from flat parent-pointer records
//!
//! Metadata on the device is only loosely validated: parents can be missing,
//! can be documents, or can form cycles. None of these stop the build. The
//! affected record moves under a synthetic Unfiled root and a warning is kept.

use super::record::{DocumentKind, DocumentRecord};
use super::tree::{CatalogNode, CatalogTree, CatalogWarning, NodeId, UNFILED_ID, UNFILED_NAME};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogOptions {
    /// Keep deleted records and the collections that only hold them
    pub include_deleted: bool,
}

/// Where a record hangs after link validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attachment<'a> {
    Root,
    Parent(&'a str),
    Unfiled,
}

fn by_name_then_id(a: &DocumentRecord, b: &DocumentRecord) -> std::cmp::Ordering {
    a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id))
}

/// Build the tree. Always completes; structural problems land in
/// `CatalogTree::warnings`.
pub fn build_catalog(records: &[DocumentRecord], options: CatalogOptions) -> CatalogTree {
    let mut warnings = Vec::new();

    // Pass 1: id -> record, newest wins on duplicates
    let mut arena: BTreeMap<&str, &DocumentRecord> = BTreeMap::new();
    for record in records {
        match arena.get(record.id.as_str()) {
            None => {
                arena.insert(record.id.as_str(), record);
            }
            Some(existing) => {
                warnings.push(CatalogWarning::DuplicateId {
                    id: record.id.clone(),
                });
                let newer = record
                    .last_modified
                    .cmp(&existing.last_modified)
                    .then_with(|| existing.name.cmp(&record.name))
                    .is_gt();
                if newer {
                    arena.insert(record.id.as_str(), record);
                }
            }
        }
    }

    // Pass 2: validate each parent link
    let on_cycle = records_on_cycles(&arena);
    let mut attachment: HashMap<&str, Attachment> = HashMap::with_capacity(arena.len());
    for (&id, &record) in &arena {
        let attach = match record.parent.as_deref() {
            None => Attachment::Root,
            Some(parent) => match arena.get(parent) {
                None => {
                    warnings.push(CatalogWarning::MissingParent {
                        id: id.to_string(),
                        parent: parent.to_string(),
                    });
                    Attachment::Unfiled
                }
                Some(p) if p.kind != DocumentKind::Collection => {
                    warnings.push(CatalogWarning::ParentNotCollection {
                        id: id.to_string(),
                        parent: parent.to_string(),
                    });
                    Attachment::Unfiled
                }
                Some(_) if on_cycle.contains(id) => {
                    warnings.push(CatalogWarning::Cycle {
                        id: id.to_string(),
                        parent: parent.to_string(),
                    });
                    Attachment::Unfiled
                }
                Some(_) => Attachment::Parent(parent),
            },
        };
        attachment.insert(id, attach);
    }

    let mut children: HashMap<&str, Vec<&DocumentRecord>> = HashMap::new();
    let mut top: Vec<&DocumentRecord> = Vec::new();
    let mut unfiled: Vec<&DocumentRecord> = Vec::new();
    for (&id, &record) in &arena {
        match attachment[id] {
            Attachment::Root => top.push(record),
            Attachment::Parent(parent) => children.entry(parent).or_default().push(record),
            Attachment::Unfiled => unfiled.push(record),
        }
    }
    for list in children.values_mut() {
        list.sort_by(|a, b| by_name_then_id(a, b));
    }
    top.sort_by(|a, b| by_name_then_id(a, b));
    unfiled.sort_by(|a, b| by_name_then_id(a, b));

    // Attachments are acyclic now, so plain recursion terminates
    let mut layout = Layout {
        children: &children,
        include_deleted: options.include_deleted,
        keep: HashMap::new(),
        nodes: Vec::with_capacity(arena.len()),
        index: BTreeMap::new(),
    };
    for &record in top.iter().chain(unfiled.iter()) {
        layout.decide(record, false);
    }

    let mut roots = Vec::new();
    for &record in &top {
        if let Some(idx) = layout.place(record, None, 0) {
            roots.push(idx);
        }
    }

    let mut unfiled_root = None;
    if unfiled.iter().any(|r| layout.keep[r.id.as_str()]) {
        let idx = layout.push(unfiled_record(), None, 0, false, true);
        for &record in &unfiled {
            if let Some(child) = layout.place(record, Some(idx), 1) {
                layout.nodes[idx].children.push(child);
            }
        }
        roots.push(idx);
        unfiled_root = Some(idx);
    }

    warnings.sort();
    for warning in &warnings {
        warn!("Catalog: {}", warning);
    }
    debug!(
        records = records.len(),
        nodes = layout.nodes.len(),
        warnings = warnings.len(),
        "Built catalog"
    );

    CatalogTree {
        nodes: layout.nodes,
        roots,
        index: layout.index,
        unfiled: unfiled_root,
        warnings,
    }
}

/// Ids whose raw parent chain comes back to themselves. A record that only
/// leads into a cycle elsewhere is not on it and keeps its link.
///
/// Every record is walked at most once: a walk stops at the first record an
/// earlier walk already settled.
fn records_on_cycles<'a>(arena: &BTreeMap<&'a str, &'a DocumentRecord>) -> HashSet<&'a str> {
    let mut on_cycle = HashSet::new();
    let mut settled: HashSet<&'a str> = HashSet::with_capacity(arena.len());

    for &start in arena.keys() {
        let mut path: Vec<&'a str> = Vec::new();
        let mut position: HashMap<&'a str, usize> = HashMap::new();
        let mut current = Some(start);
        while let Some(id) = current {
            if settled.contains(id) {
                break;
            }
            if let Some(&at) = position.get(id) {
                on_cycle.extend(path[at..].iter().copied());
                break;
            }
            position.insert(id, path.len());
            path.push(id);
            current = arena
                .get(id)
                .and_then(|&r| r.parent.as_deref())
                .filter(|parent| arena.contains_key(parent));
        }
        settled.extend(path);
    }
    on_cycle
}

fn unfiled_record() -> DocumentRecord {
    DocumentRecord::collection(UNFILED_ID, UNFILED_NAME, None)
}

struct Layout<'a> {
    children: &'a HashMap<&'a str, Vec<&'a DocumentRecord>>,
    include_deleted: bool,
    /// id -> survives pruning
    keep: HashMap<&'a str, bool>,
    nodes: Vec<CatalogNode>,
    index: BTreeMap<String, NodeId>,
}

impl<'a> Layout<'a> {
    /// Post-order pass deciding which records survive pruning. Deletion is
    /// inherited from the parent. A collection whose descendants were all
    /// dropped goes too; a collection that never had children stays.
    fn decide(&mut self, record: &'a DocumentRecord, parent_deleted: bool) -> bool {
        let deleted = parent_deleted || record.deleted;
        let children = self.children;
        let kids = children.get(record.id.as_str());

        let mut any_child_kept = false;
        if let Some(kids) = kids {
            for &child in kids {
                any_child_kept |= self.decide(child, deleted);
            }
        }

        let kept = self.include_deleted
            || (!deleted
                && (record.kind == DocumentKind::Document
                    || kids.map_or(true, |k| k.is_empty())
                    || any_child_kept));
        self.keep.insert(record.id.as_str(), kept);
        kept
    }

    fn push(
        &mut self,
        record: DocumentRecord,
        parent: Option<NodeId>,
        depth: usize,
        deleted: bool,
        synthetic: bool,
    ) -> NodeId {
        let idx = self.nodes.len();
        // The Unfiled root is reached through `CatalogTree::unfiled`, so a real
        // record can never be shadowed by it
        if !synthetic {
            self.index.insert(record.id.clone(), idx);
        }
        self.nodes.push(CatalogNode {
            record,
            parent,
            children: Vec::new(),
            depth,
            deleted,
            synthetic,
        });
        idx
    }

    /// Depth-first placement of a kept record and its kept descendants
    fn place(&mut self, record: &'a DocumentRecord, parent: Option<NodeId>, depth: usize) -> Option<NodeId> {
        if !self.keep.get(record.id.as_str()).copied().unwrap_or(false) {
            return None;
        }
        let parent_deleted = parent.map_or(false, |p| self.nodes[p].deleted);
        let deleted = record.deleted || parent_deleted;
        let idx = self.push(record.clone(), parent, depth, deleted, false);

        let children = self.children;
        if let Some(kids) = children.get(record.id.as_str()) {
            for &child in kids {
                if let Some(child_idx) = self.place(child, Some(idx), depth + 1) {
                    self.nodes[idx].children.push(child_idx);
                }
            }
        }
        Some(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn doc(id: &str, name: &str, parent: Option<&str>) -> DocumentRecord {
        DocumentRecord::document(id, name, parent)
    }

    fn folder(id: &str, name: &str, parent: Option<&str>) -> DocumentRecord {
        DocumentRecord::collection(id, name, parent)
    }

    fn names(tree: &CatalogTree, ids: &[NodeId]) -> Vec<String> {
        ids.iter().map(|&i| tree.nodes[i].record.name.clone()).collect()
    }

    #[test]
    fn test_builds_sorted_hierarchy() {
        let records = vec![
            doc("d2", "Zebra", Some("f1")),
            folder("f1", "Work", None),
            doc("d1", "Alpha", Some("f1")),
            doc("d3", "Loose", None),
        ];
        let tree = build_catalog(&records, CatalogOptions::default());

        assert_eq!(names(&tree, &tree.roots), vec!["Loose", "Work"]);
        let work = tree.find("f1").unwrap();
        assert_eq!(names(&tree, &work.children), vec!["Alpha", "Zebra"]);
        assert_eq!(tree.find("d2").unwrap().depth, 1);
        assert!(tree.unfiled.is_none());
        assert!(tree.warnings.is_empty());
    }

    #[test]
    fn test_same_name_siblings_order_by_id() {
        let records = vec![doc("b", "Same", None), doc("a", "Same", None)];
        let tree = build_catalog(&records, CatalogOptions::default());
        let ids: Vec<_> = tree.roots.iter().map(|&i| tree.nodes[i].record.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_two_node_cycle_lands_under_unfiled() {
        let records = vec![
            folder("a", "A", Some("b")),
            folder("b", "B", Some("a")),
            doc("c", "Inside A", Some("a")),
        ];
        let tree = build_catalog(&records, CatalogOptions::default());

        let unfiled = tree.unfiled.expect("unfiled root");
        assert_eq!(*tree.roots.last().unwrap(), unfiled);
        assert_eq!(names(&tree, &tree.nodes[unfiled].children), vec!["A", "B"]);
        // Descendants stay with their quarantined parent
        assert_eq!(tree.path_of("c").unwrap(), "Unfiled/A/Inside A");
        assert_eq!(
            tree.warnings,
            vec![
                CatalogWarning::Cycle { id: "a".into(), parent: "b".into() },
                CatalogWarning::Cycle { id: "b".into(), parent: "a".into() },
            ]
        );
    }

    #[test]
    fn test_self_parent_is_a_cycle() {
        let tree = build_catalog(&[folder("a", "A", Some("a"))], CatalogOptions::default());
        assert_eq!(tree.path_of("a").unwrap(), "Unfiled/A");
    }

    #[test]
    fn test_record_above_a_foreign_cycle_stays_attached() {
        let records = vec![
            folder("a", "A", Some("b")),
            folder("b", "B", Some("a")),
            folder("c", "C", Some("a")),
        ];
        let tree = build_catalog(&records, CatalogOptions::default());
        assert_eq!(tree.path_of("c").unwrap(), "Unfiled/A/C");
        assert_eq!(tree.warnings.len(), 2);
    }

    #[test]
    fn test_orphans_and_document_parents_are_unfiled() {
        let records = vec![
            doc("x", "Orphan", Some("missing")),
            doc("host", "Host doc", None),
            doc("y", "Child of doc", Some("host")),
        ];
        let tree = build_catalog(&records, CatalogOptions::default());
        assert_eq!(tree.path_of("x").unwrap(), "Unfiled/Orphan");
        assert_eq!(tree.path_of("y").unwrap(), "Unfiled/Child of doc");
        assert!(matches!(tree.warnings[0], CatalogWarning::MissingParent { .. }));
        assert!(matches!(tree.warnings[1], CatalogWarning::ParentNotCollection { .. }));
    }

    #[test]
    fn test_deleted_records_are_pruned() {
        let mut trashed = doc("t", "Trashed", Some("f"));
        trashed.deleted = true;
        let mut dead_folder = folder("g", "Dead", None);
        dead_folder.deleted = true;
        let records = vec![
            folder("f", "Only trash inside", None),
            trashed,
            dead_folder,
            doc("under-dead", "Inherits", Some("g")),
            folder("e", "Empty", None),
        ];

        let tree = build_catalog(&records, CatalogOptions::default());
        assert_eq!(names(&tree, &tree.roots), vec!["Empty"]);
        assert!(tree.find("under-dead").is_none());

        let full = build_catalog(&records, CatalogOptions { include_deleted: true });
        assert_eq!(full.len(), 5);
        assert!(full.find("under-dead").unwrap().deleted);
        assert_eq!(full.stats().trashed, 2);
    }

    #[test]
    fn test_duplicate_ids_keep_newest() {
        let mut old = doc("d", "Old name", None);
        old.last_modified = Utc.timestamp_opt(100, 0).unwrap();
        let mut new = doc("d", "New name", None);
        new.last_modified = Utc.timestamp_opt(200, 0).unwrap();

        let forward = build_catalog(&[old.clone(), new.clone()], CatalogOptions::default());
        let backward = build_catalog(&[new, old], CatalogOptions::default());
        assert_eq!(forward.find("d").unwrap().record.name, "New name");
        assert_eq!(forward, backward);
        assert_eq!(forward.warnings.len(), 1);
    }

    #[test]
    fn test_build_is_independent_of_input_order() {
        let mut records = vec![
            folder("root", "Root", None),
            folder("sub", "Sub", Some("root")),
            doc("d1", "One", Some("sub")),
            doc("d2", "Two", Some("root")),
            doc("d3", "Three", Some("nowhere")),
            folder("cy1", "Cy1", Some("cy2")),
            folder("cy2", "Cy2", Some("cy1")),
            doc("d4", "Four", None),
        ];
        let expected = build_catalog(&records, CatalogOptions::default());

        // Deterministic rotations and a reversal cover enough permutations
        for shift in 1..records.len() {
            records.rotate_left(1);
            assert_eq!(build_catalog(&records, CatalogOptions::default()), expected, "shift {}", shift);
        }
        records.reverse();
        assert_eq!(build_catalog(&records, CatalogOptions::default()), expected);
    }

    #[test]
    fn test_record_named_like_unfiled_root_stays_findable() {
        let records = vec![
            doc(UNFILED_ID, "Real record", None),
            doc("x", "Orphan", Some("missing")),
        ];
        let tree = build_catalog(&records, CatalogOptions::default());

        let found = tree.find(UNFILED_ID).unwrap();
        assert_eq!(found.record.name, "Real record");
        assert!(!found.synthetic);
        let unfiled = tree.unfiled.unwrap();
        assert!(tree.nodes[unfiled].synthetic);
        assert_eq!(tree.path_of("x").unwrap(), "Unfiled/Orphan");
    }

    #[test]
    fn test_deep_chain_builds_in_linear_time() {
        const DEPTH: usize = 20_000;
        // Placement recurses once per level
        let handle = std::thread::Builder::new()
            .stack_size(256 * 1024 * 1024)
            .spawn(|| {
                let mut records = vec![folder("n0", "n0", None)];
                for i in 1..DEPTH {
                    let parent = format!("n{}", i - 1);
                    records.push(folder(&format!("n{}", i), &format!("n{}", i), Some(&parent)));
                }
                let tree = build_catalog(&records, CatalogOptions::default());
                assert_eq!(tree.len(), DEPTH);
                assert!(tree.unfiled.is_none());
                assert!(tree.warnings.is_empty());
                assert_eq!(tree.find(&format!("n{}", DEPTH - 1)).unwrap().depth, DEPTH - 1);
            })
            .unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_long_cycle_with_tail_flags_only_cycle_members() {
        // tail -> c0 -> c1 -> ... -> c9 -> c0
        let mut records: Vec<_> = (0..10)
            .map(|i| {
                let parent = format!("c{}", (i + 1) % 10);
                folder(&format!("c{}", i), &format!("C{}", i), Some(&parent))
            })
            .collect();
        records.push(folder("tail", "Tail", Some("c0")));
        let tree = build_catalog(&records, CatalogOptions::default());

        let cycles = tree
            .warnings
            .iter()
            .filter(|w| matches!(w, CatalogWarning::Cycle { .. }))
            .count();
        assert_eq!(cycles, 10);
        assert_eq!(tree.path_of("tail").unwrap(), "Unfiled/C0/Tail");
    }

    #[test]
    fn test_arena_is_depth_first() {
        let records = vec![
            folder("a", "A", None),
            doc("a1", "A1", Some("a")),
            folder("b", "B", None),
            doc("b1", "B1", Some("b")),
        ];
        let tree = build_catalog(&records, CatalogOptions::default());
        let order: Vec<_> = tree.nodes.iter().map(|n| n.record.id.as_str()).collect();
        assert_eq!(order, vec!["a", "a1", "b", "b1"]);
    }
}
