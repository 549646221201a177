//! Benchmark utilities for DocDB.

pub mod utils;
