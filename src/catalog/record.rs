//! Per-document metadata as stored on the tablet
//!
//! Each document or folder is a `<uuid>.metadata` JSON file, with an optional
//! `<uuid>.content` sibling carrying the file type and page count. Records
//! are parsed leniently: unknown fields are ignored and missing ones take
//! defaults, but a file that is not JSON at all is rejected.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Parent value the tablet uses for trashed items
pub const TRASH_PARENT: &str = "trash";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Document,
    Collection,
}

/// One document or collection, flat, parent by id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub id: String,
    pub name: String,
    pub kind: DocumentKind,
    pub parent: Option<String>,
    pub page_count: u32,
    pub deleted: bool,
    /// notebook, pdf, epub
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub pinned: bool,
}

impl DocumentRecord {
    pub fn document(id: impl Into<String>, name: impl Into<String>, parent: Option<&str>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: DocumentKind::Document,
            parent: parent.map(str::to_string),
            page_count: 0,
            deleted: false,
            file_type: None,
            last_modified: DateTime::<Utc>::UNIX_EPOCH,
            pinned: false,
        }
    }

    pub fn collection(id: impl Into<String>, name: impl Into<String>, parent: Option<&str>) -> Self {
        Self {
            kind: DocumentKind::Collection,
            ..Self::document(id, name, parent)
        }
    }

    pub fn is_collection(&self) -> bool {
        self.kind == DocumentKind::Collection
    }
}

#[derive(Debug, Error)]
pub enum RecordParseError {
    #[error("{id}.metadata: {source}")]
    Metadata {
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{id}.metadata: {source}")]
    Io {
        id: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMetadata {
    visible_name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    parent: Option<String>,
    last_modified: Option<Value>,
    pinned: Option<bool>,
    deleted: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawContent {
    file_type: Option<String>,
    page_count: Option<u32>,
}

/// The tablet writes `lastModified` as a string of epoch milliseconds; older
/// firmware wrote a number.
fn parse_timestamp(value: Option<&Value>) -> DateTime<Utc> {
    let millis = match value {
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        Some(Value::Number(n)) => n.as_i64(),
        _ => None,
    };
    millis
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Build a record from the metadata JSON and optional content JSON.
///
/// An unreadable content file only loses the page count and file type.
pub fn parse_record(
    id: &str,
    metadata_json: &str,
    content_json: Option<&str>,
) -> Result<DocumentRecord, RecordParseError> {
    let meta: RawMetadata =
        serde_json::from_str(metadata_json).map_err(|source| RecordParseError::Metadata {
            id: id.to_string(),
            source,
        })?;
    let content: RawContent = content_json
        .and_then(|json| serde_json::from_str(json).ok())
        .unwrap_or_default();

    let kind = match meta.kind.as_deref() {
        Some("CollectionType") => DocumentKind::Collection,
        _ => DocumentKind::Document,
    };

    let raw_parent = meta.parent.filter(|p| !p.is_empty());
    let in_trash = raw_parent.as_deref() == Some(TRASH_PARENT);
    let parent = if in_trash { None } else { raw_parent };

    let default_name = match kind {
        DocumentKind::Collection => "Untitled Collection",
        DocumentKind::Document => "Untitled Document",
    };

    Ok(DocumentRecord {
        id: id.to_string(),
        name: meta
            .visible_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| default_name.to_string()),
        kind,
        parent,
        page_count: content.page_count.unwrap_or(0),
        deleted: in_trash || meta.deleted.unwrap_or(false),
        file_type: match kind {
            DocumentKind::Document => content.file_type.filter(|t| !t.is_empty()),
            DocumentKind::Collection => None,
        },
        last_modified: parse_timestamp(meta.last_modified.as_ref()),
        pinned: meta.pinned.unwrap_or(false),
    })
}

/// Load `<id>.metadata` (and `<id>.content` if present) from a raw mirror
pub fn load_record(raw_dir: &Path, id: &str) -> Result<DocumentRecord, RecordParseError> {
    let metadata = fs::read_to_string(raw_dir.join(format!("{}.metadata", id))).map_err(
        |source| RecordParseError::Io {
            id: id.to_string(),
            source,
        },
    )?;
    let content = fs::read_to_string(raw_dir.join(format!("{}.content", id))).ok();
    parse_record(id, &metadata, content.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_document_with_content() {
        let meta = r#"{
            "visibleName": "Lab notes",
            "type": "DocumentType",
            "parent": "f00",
            "lastModified": "1700000000000",
            "pinned": true
        }"#;
        let content = r#"{"fileType": "notebook", "pageCount": 12}"#;

        let record = parse_record("abc", meta, Some(content)).unwrap();
        assert_eq!(record.name, "Lab notes");
        assert_eq!(record.kind, DocumentKind::Document);
        assert_eq!(record.parent.as_deref(), Some("f00"));
        assert_eq!(record.page_count, 12);
        assert_eq!(record.file_type.as_deref(), Some("notebook"));
        assert_eq!(record.last_modified.timestamp(), 1_700_000_000);
        assert!(record.pinned);
        assert!(!record.deleted);
    }

    #[test]
    fn test_trash_parent_marks_deleted() {
        let meta = r#"{"visibleName": "Old", "type": "CollectionType", "parent": "trash"}"#;
        let record = parse_record("x", meta, None).unwrap();
        assert!(record.deleted);
        assert!(record.parent.is_none());
        assert!(record.is_collection());
    }

    #[test]
    fn test_defaults_for_sparse_metadata() {
        let record = parse_record("x", r#"{"parent": "", "lastModified": 5000}"#, Some("garbage")).unwrap();
        assert_eq!(record.name, "Untitled Document");
        assert!(record.parent.is_none());
        assert_eq!(record.page_count, 0);
        assert_eq!(record.last_modified.timestamp_millis(), 5000);
    }

    #[test]
    fn test_invalid_metadata_is_an_error() {
        assert!(matches!(
            parse_record("x", "not json", None),
            Err(RecordParseError::Metadata { .. })
        ));
    }
}
