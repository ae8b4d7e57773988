use thiserror::Error;

/// Errors surfaced by the catview core.
///
/// Per-directory enumeration failures are not in here: they travel inside a
/// listing as [`EnumerationError`] so one bad directory never fails a page.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("A category named '{name}' already exists")]
    DuplicateName { name: String },

    #[error("Category '{id}' not found")]
    NotFound { id: String },

    #[error("Invalid category: {reason}")]
    InvalidCategory { reason: String },

    #[error("Invalid manifest: {}", .violations.join("; "))]
    InvalidManifest { violations: Vec<String> },

    #[error("Unknown schema version: {0}")]
    UnknownSchemaVersion(String),

    #[error("Remote store unavailable: {reason}")]
    RemoteUnavailable { reason: String },

    #[error("Serialized directories of {category_ids:?} exceed the {budget} character budget")]
    PayloadTooLarge {
        category_ids: Vec<String>,
        budget: usize,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub fn remote(reason: impl ToString) -> Self {
        CoreError::RemoteUnavailable {
            reason: reason.to_string(),
        }
    }

    pub fn storage(reason: impl ToString) -> Self {
        CoreError::Storage(reason.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// A directory that could not be listed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot enumerate {resource_uri}: {message}")]
pub struct EnumerationError {
    pub resource_uri: String,
    pub message: String,
}
