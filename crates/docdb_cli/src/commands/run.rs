//! Run command implementation.
//!
//! Starts a local node (in-memory store, merger, indexes and replicas),
//! submits one batch through the bulk documents handler and prints the
//! reply. Unless stalled, a follower task keeps the local indexes and
//! replicas caught up with the store so waits can complete.

use super::CliError;
use docdb_batch::{
    AttachmentReader, AttachmentStager, BatchBody, BatchConfig, BatchOptions, BatchResponse,
    BulkDocsHandler, IndexStore, ReplicaSet, ShutdownSignal, ShutdownTrigger, TrackedIndex,
    TransactionMerger,
};
use docdb_storage::DocumentStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const FOLLOW_INTERVAL: Duration = Duration::from_millis(5);

/// Shape of the local node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSpec {
    /// Index names with the collections they cover.
    pub indexes: Vec<(String, Vec<String>)>,
    /// Replica names.
    pub replicas: Vec<String>,
    /// Whether the follower task is disabled.
    pub stalled: bool,
    /// Staging directory override.
    pub temp_dir: Option<PathBuf>,
}

impl NodeSpec {
    /// Builds a node shape from `Name=Collection1,Collection2` index arguments.
    pub fn parse(
        indexes: &[String],
        replicas: &[String],
        stalled: bool,
        temp_dir: Option<PathBuf>,
    ) -> Result<Self, CliError> {
        let indexes = indexes
            .iter()
            .map(|raw| {
                let (name, collections) = raw.split_once('=').unwrap_or((raw.as_str(), ""));
                let name = name.trim();
                if name.is_empty() {
                    return Err(CliError::Usage(format!("index without a name: '{raw}'")));
                }
                let collections = collections
                    .split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect();
                Ok((name.to_string(), collections))
            })
            .collect::<Result<_, _>>()?;

        Ok(Self {
            indexes,
            replicas: replicas.to_vec(),
            stalled,
            temp_dir,
        })
    }
}

/// A running local node.
struct LocalNode {
    handler: BulkDocsHandler,
    trigger: ShutdownTrigger,
    follower: Option<tokio::task::JoinHandle<()>>,
}

impl LocalNode {
    fn start(spec: &NodeSpec) -> Result<Self, CliError> {
        let mut config = BatchConfig::new();
        if let Some(dir) = &spec.temp_dir {
            config = config.with_temp_dir(dir);
        }

        let store = Arc::new(DocumentStore::in_memory());
        let indexes = Arc::new(IndexStore::new());
        for (name, collections) in &spec.indexes {
            indexes.add(TrackedIndex::new(name.as_str(), collections.iter().cloned()));
        }
        let replicas = Arc::new(ReplicaSet::new(spec.replicas.iter().cloned()));

        let (trigger, signal) = ShutdownTrigger::new();
        let merger = TransactionMerger::spawn(Arc::clone(&store), &config)?;
        let handler = BulkDocsHandler::new(
            Arc::clone(&store),
            merger,
            AttachmentStager::new(&config),
            indexes.clone(),
            replicas.clone(),
            signal.clone(),
        );

        let follower = (!spec.stalled).then(|| {
            let names = spec.replicas.clone();
            tokio::spawn(follow(store, indexes, replicas, names, signal))
        });

        Ok(Self {
            handler,
            trigger,
            follower,
        })
    }

    async fn stop(self) {
        self.trigger.trigger();
        if let Some(follower) = self.follower {
            if let Err(e) = follower.await {
                tracing::warn!(error = %e, "follower task failed");
            }
        }
    }
}

async fn follow(
    store: Arc<DocumentStore>,
    indexes: Arc<IndexStore>,
    replicas: Arc<ReplicaSet>,
    names: Vec<String>,
    shutdown: ShutdownSignal,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(FOLLOW_INTERVAL) => {
                let etag = store.last_etag();
                indexes.catch_up(etag);
                for name in &names {
                    replicas.acknowledge(name, etag);
                }
            }
        }
    }
}

/// Runs the run command.
pub fn run(
    path: &Path,
    attachments: Vec<PathBuf>,
    query: &[(String, String)],
    spec: NodeSpec,
    format: &str,
) -> Result<(), CliError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let response = runtime.block_on(execute(path, attachments, query, &spec))?;

    match format {
        "text" => print_text_output(&response),
        _ => println!("{}", serde_json::to_string_pretty(&response)?),
    }
    Ok(())
}

async fn execute(
    path: &Path,
    attachments: Vec<PathBuf>,
    query: &[(String, String)],
    spec: &NodeSpec,
) -> Result<BatchResponse, CliError> {
    let options = BatchOptions::from_query(query.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;
    let commands = tokio::fs::read(path).await?;

    let mut readers: Vec<AttachmentReader> = Vec::with_capacity(attachments.len());
    for attachment in &attachments {
        readers.push(Box::new(tokio::fs::File::open(attachment).await?));
    }
    let body = if readers.is_empty() {
        BatchBody::Json(commands)
    } else {
        BatchBody::Multipart {
            commands,
            attachments: readers,
        }
    };

    let node = LocalNode::start(spec)?;
    let result = node.handler.handle(body, &options).await;
    node.stop().await;

    let response = result?;
    tracing::debug!(
        last_etag = %response.last_etag,
        results = response.results.len(),
        "batch replied"
    );
    Ok(response)
}

fn print_text_output(response: &BatchResponse) {
    println!("Status: {}", response.status.code());
    println!("Last etag: {}", response.last_etag);
    if let Some(replicated) = response.replicated {
        println!("Replicated to: {replicated}");
    }
    if let Some(outcome) = &response.index_wait {
        println!(
            "Indexes: {} fresh, {} timed out ({:?})",
            outcome.fresh.len(),
            outcome.timed_out.len(),
            outcome.elapsed
        );
    }
    println!();
    for result in &response.results {
        let etag = result
            .etag()
            .map(|etag| etag.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{}\t{}\t{}", result.command_type(), result.key(), etag);
    }
}
