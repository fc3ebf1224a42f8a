use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
///
/// `Duplicate` and `Precondition` are distinguishable on purpose: services
/// swallow duplicate inserts (exactly-once submission, idempotent joins) and
/// retry version conflicts, while `Unavailable` always surfaces.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    #[error("{what} not found")]
    NotFound { what: String },
    #[error("{what} already exists")]
    Duplicate { what: String },
    #[error("precondition failed: {what}")]
    Precondition { what: String },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a not-found error for a single-row lookup.
    pub fn not_found(what: impl Into<String>) -> Self {
        StorageError::NotFound { what: what.into() }
    }

    /// Construct a duplicate error for a unique-key violation.
    pub fn duplicate(what: impl Into<String>) -> Self {
        StorageError::Duplicate { what: what.into() }
    }

    /// Construct a precondition error for a failed compare-and-set.
    pub fn precondition(what: impl Into<String>) -> Self {
        StorageError::Precondition { what: what.into() }
    }

    /// Whether this error is a unique-key violation.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StorageError::Duplicate { .. })
    }

    /// Whether this error is a failed compare-and-set.
    pub fn is_precondition(&self) -> bool {
        matches!(self, StorageError::Precondition { .. })
    }
}
