//! Error types
//!
//! Only errors that make an entire operation impossible live here. Everything
//! that can degrade (one file failing to fetch, one malformed metadata record,
//! one model call failing) is reported as a warning or per-item outcome instead.

use thiserror::Error;

/// Errors that abort a sync attempt. The manifest is never written when one of
/// these is returned.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote listing could not be obtained at all
    #[error("Remote listing unavailable from {host}: {details}")]
    ListingUnavailable { host: String, details: String },

    /// The device refused our credentials
    #[error("Authentication failed for {host}: {details}")]
    Authentication { host: String, details: String },

    /// The listing came back empty while the manifest still tracks live files
    #[error("Remote listing is empty but {tracked} files are tracked locally; refusing to mark them deleted")]
    SuspiciousEmptyListing { tracked: usize },

    /// A single file could not be fetched
    #[error("Failed to fetch {path}: {details}")]
    Fetch { path: String, details: String },

    /// Another sync holds the data directory lock
    #[error("Failed to lock data directory: {0}")]
    Lock(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Manifest serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Suggested remedy shown to the user next to the error
    pub fn remedy(&self) -> &'static str {
        match self {
            SyncError::ListingUnavailable { .. } => {
                "Check that the tablet is awake, connected, and reachable at the configured host"
            }
            SyncError::Authentication { .. } => "Check the configured user and password or SSH key",
            SyncError::SuspiciousEmptyListing { .. } => {
                "Verify the remote path; re-run with force if the device was really wiped"
            }
            SyncError::Fetch { .. } => "Re-run the sync; the file will be retried",
            SyncError::Lock(_) => "Wait for the other sync to finish",
            SyncError::Io(_) => "Check permissions and free space in the data directory",
            SyncError::Serialization(_) => {
                "The manifest is corrupt; run a full resync to rebuild it"
            }
        }
    }

    /// Whether this error came from the transport rather than local state
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SyncError::ListingUnavailable { .. }
                | SyncError::Authentication { .. }
                | SyncError::Fetch { .. }
        )
    }
}

/// Errors that abort a catalog build. Malformed individual records are
/// warnings, not errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Metadata files exist but none of them could be parsed
    #[error("None of the {attempted} metadata files in {dir} could be parsed")]
    NoMetadata { dir: String, attempted: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Catalog serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors that abort a transcription batch before it starts
#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("Concurrency must be a positive integer, got {0}")]
    InvalidConcurrency(usize),

    #[error("Cracked mode needs at least one transcription model")]
    NoModels,

    #[error("Failed to render {document_id} page {page}: {details}")]
    Render {
        document_id: String,
        page: u32,
        details: String,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Could not determine a base directory; set RM_BASE_DIR")]
    NoBaseDir,

    #[error("{0} is not set")]
    MissingApiKey(&'static str),
}

impl ConfigError {
    pub fn remedy(&self) -> &'static str {
        match self {
            ConfigError::Invalid { .. } => "Fix the value in your environment or .env file",
            ConfigError::NoBaseDir => "Set RM_BASE_DIR in your environment or .env file",
            ConfigError::MissingApiKey(_) => {
                "Add the API key to your .env file or export it before running"
            }
        }
    }
}
