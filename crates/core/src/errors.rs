//! Error types for the floorvc core library.
//!
//! Each layer has its own error type derived with `thiserror`. Every public
//! engine operation returns [`VcsError`], which carries enough structure
//! (entity, id, expected vs. actual head) for a caller to decide between
//! retrying and surfacing the failure to a user.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

/// Unified error type returned by every version-control operation.
#[derive(Debug, Error)]
pub enum VcsError {
    /// A branch, version, merge request, conflict or annotation is absent.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A branch name collides with an existing branch of the same document.
    #[error("{entity} already exists: {id}")]
    Duplicate { entity: &'static str, id: String },

    /// A required field is missing or malformed.
    #[error("invalid value for '{field}': {detail}")]
    Validation { field: String, detail: String },

    /// A merge was attempted while some of its conflicts are unresolved.
    #[error("merge request {merge_id} has {unresolved} unresolved conflict(s)")]
    Conflict { merge_id: String, unresolved: u64 },

    /// The branch head moved since the caller last read it.
    #[error(
        "branch '{branch}' head changed: expected {expected}, found {actual}; reload and retry"
    )]
    ConcurrentModification {
        branch: String,
        expected: String,
        actual: String,
    },

    /// The record is in a state that does not allow the requested transition.
    #[error("{entity} {id} cannot be changed: {detail}")]
    InvalidState {
        entity: &'static str,
        id: String,
        detail: String,
    },

    /// Persistence failure (database, blob area, serialization).
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl VcsError {
    pub(crate) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub(crate) fn validation(field: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            detail: detail.into(),
        }
    }

    /// Whether the caller may retry the same operation after re-reading state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }
}

impl From<DatabaseError> for VcsError {
    fn from(err: DatabaseError) -> Self {
        Self::Storage(StorageError::Database(err))
    }
}

impl From<rusqlite::Error> for VcsError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(StorageError::Database(DatabaseError::SqliteError(err)))
    }
}

// ---------------------------------------------------------------------------
// Storage errors
// ---------------------------------------------------------------------------

/// Failures of the persistent store: relational rows or document blobs.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Relational store failure.
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// Reading or writing a document blob failed.
    #[error("blob I/O error at '{path}': {source}")]
    Blob {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A stored document or value column could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = VcsError::not_found("branch", "feat@b1/f1");
        assert_eq!(err.to_string(), "branch not found: feat@b1/f1");

        let err = VcsError::Conflict {
            merge_id: "m1".into(),
            unresolved: 3,
        };
        assert_eq!(
            err.to_string(),
            "merge request m1 has 3 unresolved conflict(s)"
        );

        let err = VcsError::ConcurrentModification {
            branch: "main".into(),
            expected: "v1".into(),
            actual: "v2".into(),
        };
        assert!(err.to_string().contains("expected v1, found v2"));
        assert!(err.is_retryable());

        let err = ConfigError::InvalidValue {
            field: "logging.level".into(),
            detail: "unknown level".into(),
        };
        assert!(err.to_string().contains("logging.level"));
    }

    #[test]
    fn test_storage_errors_convert_into_engine_error() {
        let db_err = DatabaseError::MigrationFailed {
            version: 1,
            detail: "boom".into(),
        };
        let err: VcsError = db_err.into();
        assert!(matches!(
            err,
            VcsError::Storage(StorageError::Database(DatabaseError::MigrationFailed { .. }))
        ));
        assert!(!err.is_retryable());

        let err: VcsError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, VcsError::Storage(_)));
    }
}
