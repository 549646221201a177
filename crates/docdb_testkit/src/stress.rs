//! Stress tests for the DocDB write path.
//!
//! These drive many concurrent submitters through one transaction merger.

use crate::fixtures::TestNode;
use docdb_batch::{BatchCommand, Command};
use serde_json::json;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total batches submitted.
    pub total_batches: usize,
    /// Batches that committed.
    pub committed: usize,
    /// Batches that failed.
    pub failed: usize,
    /// Total duration.
    pub duration: Duration,
    /// Committed batches per second.
    pub batches_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(committed: usize, failed: usize, duration: Duration) -> Self {
        let batches_per_second = if duration.as_secs_f64() > 0.0 {
            committed as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_batches: committed + failed,
            committed,
            failed,
            duration,
            batches_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total batches: {}", self.total_batches);
        println!("Committed: {}", self.committed);
        println!("Failed: {}", self.failed);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} batches/sec", self.batches_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Batches per submitter.
    pub batches: usize,
    /// Number of concurrent submitters.
    pub submitters: usize,
    /// Put commands per batch.
    pub commands_per_batch: usize,
    /// Size of the string payload in each document.
    pub payload_size: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            batches: 200,
            submitters: 8,
            commands_per_batch: 10,
            payload_size: 256,
        }
    }
}

fn batch_for(submitter: usize, round: usize, config: &StressConfig) -> BatchCommand {
    let payload = "x".repeat(config.payload_size);
    let commands = (0..config.commands_per_batch)
        .map(|i| {
            Command::put(
                format!("stress/{submitter}/{round}/{i}"),
                json!({"payload": payload}),
            )
        })
        .collect();
    BatchCommand::new(commands)
}

/// Runs concurrent submitters against a fresh node. Each submitter sends
/// its batches one after another.
pub fn concurrent_batches(config: &StressConfig) -> StressTestResult {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime");
    let node = TestNode::new();

    let start = Instant::now();
    let (committed, failed) = runtime.block_on(async {
        let mut tasks = Vec::with_capacity(config.submitters);
        for submitter in 0..config.submitters {
            let merger = node.merger().clone();
            let config = config.clone();
            tasks.push(tokio::spawn(async move {
                let mut committed = 0;
                let mut failed = 0;
                for round in 0..config.batches {
                    match merger.enqueue(batch_for(submitter, round, &config)).await {
                        Ok(_) => committed += 1,
                        Err(_) => failed += 1,
                    }
                }
                (committed, failed)
            }));
        }

        let mut totals = (0, 0);
        for task in tasks {
            let (committed, failed) = task.await.expect("Submitter panicked");
            totals.0 += committed;
            totals.1 += failed;
        }
        totals
    });

    StressTestResult::new(committed, failed, start.elapsed())
}

/// Runs every batch from a single submitter.
pub fn sequential_batches(config: &StressConfig) -> StressTestResult {
    concurrent_batches(&StressConfig {
        submitters: 1,
        ..config.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> StressConfig {
        StressConfig {
            batches: 20,
            submitters: 4,
            commands_per_batch: 5,
            payload_size: 16,
        }
    }

    #[test]
    fn concurrent_batches_all_commit() {
        let result = concurrent_batches(&small());
        assert_eq!(result.total_batches, 80);
        assert_eq!(result.committed, 80);
        assert_eq!(result.failed, 0);
    }

    #[test]
    fn sequential_batches_all_commit() {
        let result = sequential_batches(&small());
        assert_eq!(result.committed, 20);
    }
}
