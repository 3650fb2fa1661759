//! Document catalog
//!
//! Flat `.metadata` records from the raw mirror are turned into a sorted tree
//! with a searchable index. The tree is always rebuilt in full; only record
//! loading is incremental.

pub mod builder;
pub mod record;
pub mod store;
pub mod tree;

pub use builder::{build_catalog, CatalogOptions};
pub use record::{parse_record, DocumentKind, DocumentRecord};
pub use store::{CatalogStore, RecordSet};
pub use tree::{CatalogNode, CatalogStats, CatalogTree, CatalogWarning, NodeId, UNFILED_ID};
