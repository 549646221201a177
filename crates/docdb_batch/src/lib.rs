//! # DocDB Batch
//!
//! The write path of a DocDB node.
//!
//! This crate provides:
//! - Parsing of batch commands (put, patch, delete, prefix delete, attachment put)
//! - Staging of attachment streams into hashed temporary files
//! - The batch command aggregate, executed inside one write transaction
//! - A single-writer transaction merger
//! - Post-commit waits for index freshness and replica acknowledgment
//! - The bulk documents request handler tying it all together
//!
//! ## Example
//!
//! ```
//! use docdb_batch::{BatchCommand, Command};
//! use docdb_storage::DocumentStore;
//! use serde_json::json;
//!
//! let store = DocumentStore::in_memory();
//! let mut batch = BatchCommand::new(vec![
//!     Command::put("users/1", json!({"name": "A"})),
//!     Command::delete("users/2"),
//! ]);
//!
//! let mut tx = store.begin_write();
//! assert_eq!(batch.execute(&mut tx).unwrap(), 2);
//! tx.commit().unwrap();
//! assert!(store.get("users/1").is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod batch;
mod command;
mod config;
mod error;
mod handler;
mod index;
mod index_wait;
mod merger;
mod options;
mod replication;
mod result;
mod shutdown;
mod stager;

pub use batch::BatchCommand;
pub use command::{parse_command_value, parse_commands, Command, CommandType};
pub use config::{
    BatchConfig, DEFAULT_MAX_COALESCED, DEFAULT_MERGER_QUEUE_SIZE, DEFAULT_STAGE_CHUNK_SIZE,
};
pub use error::{BatchError, BatchResult, ResponseStatus};
pub use handler::{BatchBody, BatchResponse, BulkDocsHandler};
pub use index::{IndexRegistry, IndexStore, TrackedIndex, WatchedIndex};
pub use index_wait::{
    IndexWaitOptions, IndexWaitOutcome, IndexWaitState, IndexWaiter, DEFAULT_INDEX_WAIT_TIMEOUT,
};
pub use merger::{MergerStats, TransactionMerger};
pub use options::{parse_time_span, BatchOptions, ReplicationWaitOptions};
pub use replication::{ReplicaCount, ReplicaSet, ReplicationTopology, ReplicationWaiter};
pub use result::{
    AttachmentPutReply, CommandResult, DeletePrefixReply, DeleteReply, PatchReply, PutReply,
    RemovedDocument,
};
pub use shutdown::{ShutdownSignal, ShutdownTrigger};
pub use stager::{AttachmentReader, AttachmentStager, StagedAttachment};
