//! # DocDB Testkit
//!
//! Test utilities for DocDB.
//!
//! This crate provides:
//! - A local test node wiring store, merger, indexes and replicas
//! - Property-based command generators using proptest
//! - Stress testing utilities for the transaction merger
//!
//! ## Usage
//!
//! ```rust,ignore
//! use docdb_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn test_with_node() {
//!     let node = TestNode::new();
//!     let response = node.submit(commands, &BatchOptions::new()).await.unwrap();
//!     // ... assertions
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
