//! Error types for batch execution.

use docdb_storage::{Etag, StorageError};
use std::time::Duration;
use thiserror::Error;

/// Result type for batch operations.
pub type BatchResult<T> = Result<T, BatchError>;

/// Errors that can occur while executing a batch.
#[derive(Error, Debug)]
pub enum BatchError {
    /// Optimistic concurrency check failed. The whole batch was rolled back.
    #[error("concurrency conflict on '{key}': expected etag {expected}, actual {}", display_actual(.actual))]
    ConcurrencyConflict {
        /// Document key (or `doc/attachment` for attachments).
        key: String,
        /// Etag the command expected.
        expected: Etag,
        /// Etag currently stored, if any.
        actual: Option<Etag>,
    },

    /// Indexes did not catch up before the deadline.
    #[error(
        "waited {elapsed:?} for {index_count} index(es) to process etag {etag}, but they are still stale"
    )]
    IndexWaitTimeout {
        /// Time spent waiting.
        elapsed: Duration,
        /// Number of indexes waited on.
        index_count: usize,
        /// The etag the indexes had to reach.
        etag: Etag,
    },

    /// Replicas did not acknowledge before the deadline.
    #[error(
        "waited {elapsed:?} for etag {etag} to reach {requested} replica(s), but only {achieved} acknowledged"
    )]
    ReplicationWaitTimeout {
        /// The etag that had to be replicated.
        etag: Etag,
        /// Requested replica count.
        requested: usize,
        /// Replicas that acknowledged.
        achieved: usize,
        /// Time spent waiting.
        elapsed: Duration,
    },

    /// I/O error while staging an attachment.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Request body or query string could not be understood.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// The operation was cancelled by shutdown.
    #[error("operation cancelled")]
    Cancelled,

    /// An attachment command had no staged stream left to consume.
    #[error("no attachment stream left for attachment '{name}' of '{key}'")]
    MissingAttachmentStream {
        /// Owning document key.
        key: String,
        /// Attachment name.
        name: String,
    },

    /// A required document does not exist.
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    /// Storage engine error.
    #[error("storage error: {0}")]
    Storage(StorageError),

    /// Invalid use of the API.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The transaction merger is no longer running.
    #[error("transaction merger has shut down")]
    WriterClosed,
}

fn display_actual(actual: &Option<Etag>) -> String {
    match actual {
        Some(etag) => etag.to_string(),
        None => "none (missing)".to_string(),
    }
}

impl From<StorageError> for BatchError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ConcurrencyConflict {
                key,
                expected,
                actual,
            } => BatchError::ConcurrencyConflict {
                key,
                expected,
                actual,
            },
            StorageError::DocumentNotFound { key } => BatchError::DocumentNotFound(key),
            StorageError::Io(e) => BatchError::Io(e),
            other => BatchError::Storage(other),
        }
    }
}

impl BatchError {
    /// Creates a malformed input error.
    pub fn malformed(message: impl Into<String>) -> Self {
        BatchError::MalformedInput(message.into())
    }

    /// Returns true for an optimistic concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, BatchError::ConcurrencyConflict { .. })
    }

    /// Returns true for a wait deadline that elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            BatchError::IndexWaitTimeout { .. } | BatchError::ReplicationWaitTimeout { .. }
        )
    }

    /// Returns true if resubmitting the same batch may succeed.
    ///
    /// Conflicts are retryable after the caller refreshes its etags. Timeouts
    /// happen after commit, so the writes are already durable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BatchError::ConcurrencyConflict { .. } | BatchError::Cancelled | BatchError::WriterClosed
        )
    }

    /// Maps the error to a response status.
    pub fn status(&self) -> ResponseStatus {
        match self {
            BatchError::ConcurrencyConflict { .. } => ResponseStatus::Conflict,
            BatchError::MalformedInput(_) | BatchError::MissingAttachmentStream { .. } => {
                ResponseStatus::BadRequest
            }
            BatchError::DocumentNotFound(_) => ResponseStatus::NotFound,
            BatchError::Cancelled | BatchError::WriterClosed => ResponseStatus::ServiceUnavailable,
            BatchError::IndexWaitTimeout { .. }
            | BatchError::ReplicationWaitTimeout { .. }
            | BatchError::Io(_)
            | BatchError::Storage(_)
            | BatchError::InvalidOperation(_) => ResponseStatus::ServerError,
        }
    }
}

/// Outcome class of a batch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseStatus {
    /// The batch was committed.
    Created,
    /// The request could not be parsed.
    BadRequest,
    /// A required document was missing.
    NotFound,
    /// An etag precondition failed.
    Conflict,
    /// The batch failed or a post-commit wait timed out.
    ServerError,
    /// The node is shutting down.
    ServiceUnavailable,
}

impl ResponseStatus {
    /// Returns the HTTP status code.
    pub fn code(self) -> u16 {
        match self {
            ResponseStatus::Created => 201,
            ResponseStatus::BadRequest => 400,
            ResponseStatus::NotFound => 404,
            ResponseStatus::Conflict => 409,
            ResponseStatus::ServerError => 500,
            ResponseStatus::ServiceUnavailable => 503,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_from_storage() {
        let err: BatchError = StorageError::conflict("users/1", Etag::new(999), None).into();
        assert!(err.is_conflict());
        assert!(err.is_retryable());
        assert_eq!(err.status(), ResponseStatus::Conflict);

        let msg = err.to_string();
        assert!(msg.contains("users/1"));
        assert!(msg.contains("999"));
        assert!(msg.contains("missing"));
    }

    #[test]
    fn not_found_from_storage() {
        let err: BatchError = StorageError::document_not_found("users/1").into();
        assert!(matches!(err, BatchError::DocumentNotFound(ref k) if k == "users/1"));
        assert_eq!(err.status().code(), 404);
    }

    #[test]
    fn timeouts_are_server_errors() {
        let err = BatchError::IndexWaitTimeout {
            elapsed: Duration::from_millis(50),
            index_count: 2,
            etag: Etag::new(7),
        };
        assert!(err.is_timeout());
        assert!(!err.is_retryable());
        assert_eq!(err.status(), ResponseStatus::ServerError);

        let err = BatchError::ReplicationWaitTimeout {
            etag: Etag::new(7),
            requested: 2,
            achieved: 1,
            elapsed: Duration::from_millis(50),
        };
        let msg = err.to_string();
        assert!(msg.contains("2 replica"));
        assert!(msg.contains("only 1"));
    }

    #[test]
    fn status_codes() {
        assert_eq!(ResponseStatus::Created.code(), 201);
        assert_eq!(BatchError::malformed("x").status().code(), 400);
        assert_eq!(BatchError::Cancelled.status().code(), 503);
    }
}
