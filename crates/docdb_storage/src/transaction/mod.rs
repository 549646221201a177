//! Write transactions.
//!
//! A write transaction provides:
//! - **Atomicity**: all writes are published together on commit, or not at all
//! - **Isolation**: readers never see uncommitted changes
//! - **Read-your-writes**: later operations observe earlier ones in the same transaction

mod state;
mod write;

pub use state::{PendingChanges, PendingWrite, TransactionState};
pub use write::WriteTransaction;
