//! Incremental sync of the tablet's document store
//!
//! A listing of the device is compared against the persisted manifest; only
//! added and updated files are fetched, deletions are tombstoned. A failed
//! listing aborts the whole sync with the manifest untouched.

pub mod changeset;
pub mod checksum;
pub mod manifest;
pub mod pull;
pub mod source;
pub mod types;

pub use changeset::{compute_change_set, detect, ChangeSet};
pub use manifest::{DataDirLock, Manifest, ManifestStore, SyncManifestEntry};
pub use pull::{reset_manifest, SyncReport, SyncSession};
pub use source::{LocalMirrorSource, RemoteSource, SourceError};
pub use types::{format_file_size, EntryKind, RemoteFileRecord};
