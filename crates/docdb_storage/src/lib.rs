//! # DocDB Storage
//!
//! Document storage engine for DocDB.
//!
//! This crate provides:
//! - An in-memory document store with single-writer transactions
//! - The [`DocumentsWriter`] contract used by batch execution
//! - Etags, change vectors and document flags
//! - JSON merge patches
//! - Tracking of huge documents

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod config;
mod document;
mod error;
mod huge;
mod patch;
mod store;
mod transaction;
mod types;
mod writer;

pub use config::StoreConfig;
pub use document::{
    collection_of, declared_flags, key_identity, AttachmentDetails, Document, EMPTY_COLLECTION,
    METADATA, METADATA_COLLECTION, METADATA_FLAGS,
};
pub use error::{StorageError, StorageResult};
pub use huge::HugeDocuments;
pub use patch::{PatchRequest, PatchStatus};
pub use store::DocumentStore;
pub use transaction::{PendingChanges, PendingWrite, TransactionState, WriteTransaction};
pub use types::{ChangeVector, ChangeVectorEntry, DocumentFlags, Etag};
pub use writer::{AttachmentPutResult, DeletedDocument, DocumentsWriter, PatchOutcome, PutResult};
