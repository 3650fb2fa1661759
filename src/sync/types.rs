//! Shared types for the sync pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Leaf file or directory on the remote device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    #[default]
    File,
    Directory,
}

/// One entry of a remote listing. Regenerated on every sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFileRecord {
    /// Path relative to the remote document store root, `/`-separated
    pub path: String,
    /// Size in bytes (0 for directories)
    pub size: u64,
    /// Modification time as reported by the device
    pub modified: DateTime<Utc>,
    pub kind: EntryKind,
}

impl RemoteFileRecord {
    pub fn file(path: impl Into<String>, size: u64, modified: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            size,
            modified,
            kind: EntryKind::File,
        }
    }

    pub fn directory(path: impl Into<String>, modified: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            size: 0,
            modified,
            kind: EntryKind::Directory,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// Human readable file size
pub fn format_file_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{:.1}{}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1}TB", size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(512), "512.0B");
        assert_eq!(format_file_size(2048), "2.0KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5.0MB");
    }
}
