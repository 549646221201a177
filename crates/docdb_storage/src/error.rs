//! Error types for DocDB storage.

use crate::types::Etag;
use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An expected-etag precondition did not match the stored state.
    #[error("concurrency conflict on '{key}': expected etag {expected}, actual {}", display_actual(.actual))]
    ConcurrencyConflict {
        /// Key of the document (or `doc/attachment`) that conflicted.
        key: String,
        /// Etag the caller expected.
        expected: Etag,
        /// Etag actually stored, `None` if nothing is stored.
        actual: Option<Etag>,
    },

    /// A document required by the operation does not exist.
    #[error("document not found: {key}")]
    DocumentNotFound {
        /// Key of the missing document.
        key: String,
    },

    /// I/O error (attachment content could not be read).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

fn display_actual(actual: &Option<Etag>) -> String {
    match actual {
        Some(etag) => etag.to_string(),
        None => "<none>".to_string(),
    }
}

impl StorageError {
    /// Creates a concurrency conflict error.
    pub fn conflict(key: impl Into<String>, expected: Etag, actual: Option<Etag>) -> Self {
        Self::ConcurrencyConflict {
            key: key.into(),
            expected,
            actual,
        }
    }

    /// Creates a document not found error.
    pub fn document_not_found(key: impl Into<String>) -> Self {
        Self::DocumentNotFound { key: key.into() }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if this is an optimistic-concurrency failure.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::ConcurrencyConflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_display() {
        let err = StorageError::conflict("users/1", Etag::new(999), None);
        let msg = err.to_string();
        assert!(msg.contains("users/1"));
        assert!(msg.contains("999"));
        assert!(msg.contains("<none>"));
        assert!(err.is_conflict());
    }

    #[test]
    fn not_found_is_not_conflict() {
        assert!(!StorageError::document_not_found("x").is_conflict());
    }
}
