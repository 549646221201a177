//! CLI command implementations.

pub mod check;
pub mod options;
pub mod run;

use docdb_batch::BatchError;
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Error, Debug)]
pub enum CliError {
    /// The batch failed; carries the status a server would reply with.
    #[error("batch failed with status {}: {source}", .source.status().code())]
    Batch {
        /// Underlying error.
        #[from]
        source: BatchError,
    },

    /// File access failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Output could not be serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Bad command-line arguments.
    #[error("{0}")]
    Usage(String),
}

/// Parses a `name=value` query pair.
pub fn parse_query_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.trim().to_string(), value.to_string()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))
}
