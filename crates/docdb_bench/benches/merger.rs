//! Transaction merger and attachment staging benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use docdb_batch::{
    AttachmentStager, BatchCommand, BatchConfig, ShutdownSignal, TransactionMerger,
};
use docdb_bench::utils::{put_commands, random_bytes};
use docdb_storage::DocumentStore;
use std::sync::Arc;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Benchmark concurrent submitters funnelled through one merger.
fn bench_concurrent_submitters(c: &mut Criterion) {
    let mut group = c.benchmark_group("merger_submitters");
    let rt = runtime();

    for submitters in [1, 4, 16].iter() {
        group.throughput(Throughput::Elements(*submitters as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(submitters),
            submitters,
            |b, &submitters| {
                let store = Arc::new(DocumentStore::in_memory());
                let merger = TransactionMerger::spawn(store, &BatchConfig::default()).unwrap();
                let batches: Vec<_> = (0..submitters)
                    .map(|i| put_commands(&format!("bench/{i}"), 10, 128))
                    .collect();

                b.iter(|| {
                    rt.block_on(async {
                        let mut tasks = Vec::with_capacity(submitters);
                        for commands in &batches {
                            let merger = merger.clone();
                            let batch = BatchCommand::new(commands.clone());
                            tasks.push(tokio::spawn(async move { merger.enqueue(batch).await }));
                        }
                        for task in tasks {
                            black_box(task.await.unwrap().unwrap());
                        }
                    });
                });
            },
        );
    }
    group.finish();
}

/// Benchmark staging attachment streams to disk.
fn bench_stage(c: &mut Criterion) {
    let mut group = c.benchmark_group("stage_attachment");
    let rt = runtime();
    let dir = tempfile::tempdir().unwrap();
    let stager = AttachmentStager::new(&BatchConfig::new().with_temp_dir(dir.path()));
    let shutdown = ShutdownSignal::never();

    for size in [1024, 64 * 1024, 1024 * 1024].iter() {
        let content = random_bytes(*size);
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &content, |b, content| {
            b.iter(|| {
                rt.block_on(async {
                    let mut reader = &content[..];
                    let staged = stager.stage(&mut reader, &shutdown).await.unwrap();
                    black_box(staged.hash().len());
                });
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_concurrent_submitters, bench_stage);
criterion_main!(benches);
