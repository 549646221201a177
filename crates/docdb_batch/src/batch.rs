//! The batch command aggregate.

use crate::command::Command;
use crate::error::{BatchError, BatchResult};
use crate::result::{
    CommandResult, DeletePrefixReply, DeleteReply, PatchReply, RemovedDocument,
};
use crate::stager::StagedAttachment;
use docdb_storage::{DocumentsWriter, Etag, HugeDocuments, PatchStatus};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

/// One batch of commands executed inside a single write transaction.
///
/// Commands run strictly in input order and every command observes the
/// effects of the ones before it. Staged attachments are consumed in FIFO
/// order by `AttachmentPut` commands and released right after use.
///
/// A batch executes at most once. On any error the caller aborts the
/// transaction, so nothing the batch did becomes visible.
pub struct BatchCommand {
    commands: Vec<Command>,
    attachments: VecDeque<StagedAttachment>,
    reply: Vec<CommandResult>,
    last_etag: Etag,
    modified_collections: Option<HashSet<String>>,
    huge_documents: Option<Arc<HugeDocuments>>,
    executed: bool,
}

impl BatchCommand {
    /// Creates a batch from parsed commands.
    pub fn new(commands: Vec<Command>) -> Self {
        Self {
            commands,
            attachments: VecDeque::new(),
            reply: Vec::new(),
            last_etag: Etag::ZERO,
            modified_collections: None,
            huge_documents: None,
            executed: false,
        }
    }

    /// Attaches staged attachment streams, in `AttachmentPut` order.
    #[must_use]
    pub fn with_attachments(mut self, attachments: VecDeque<StagedAttachment>) -> Self {
        self.attachments = attachments;
        self
    }

    /// Records the collections the batch touches, for index waiting.
    #[must_use]
    pub fn track_collections(mut self) -> Self {
        self.modified_collections = Some(HashSet::new());
        self
    }

    /// Reports large documents written by the batch to `tracker`.
    ///
    /// Documents are recorded as they are written, so a batch that later
    /// rolls back still leaves its entries behind.
    #[must_use]
    pub fn with_huge_documents(mut self, tracker: Arc<HugeDocuments>) -> Self {
        self.huge_documents = Some(tracker);
        self
    }

    /// Returns the commands.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Returns the number of commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns true if the batch has no commands.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Returns the per-command results produced so far.
    pub fn reply(&self) -> &[CommandResult] {
        &self.reply
    }

    /// Takes the per-command results.
    pub fn take_reply(&mut self) -> Vec<CommandResult> {
        std::mem::take(&mut self.reply)
    }

    /// Etag of the last command that produced one, `Etag::ZERO` if none did.
    pub fn last_etag(&self) -> Etag {
        self.last_etag
    }

    /// Collections touched, when tracking was requested.
    pub fn modified_collections(&self) -> Option<&HashSet<String>> {
        self.modified_collections.as_ref()
    }

    /// Returns the number of staged attachments not yet consumed.
    pub fn pending_attachments(&self) -> usize {
        self.attachments.len()
    }

    /// Returns true once [`execute`](Self::execute) was called.
    pub fn is_executed(&self) -> bool {
        self.executed
    }

    /// Executes every command against `tx`.
    ///
    /// Returns the number of processed commands, which equals the reply
    /// length. The caller commits `tx` on success and aborts it on error.
    pub fn execute<W>(&mut self, tx: &mut W) -> BatchResult<usize>
    where
        W: DocumentsWriter + ?Sized,
    {
        if self.executed {
            return Err(BatchError::InvalidOperation(
                "batch was already executed".to_string(),
            ));
        }
        self.executed = true;

        let span = tracing::debug_span!("batch", commands = self.commands.len());
        let _enter = span.enter();

        match self.execute_commands(tx) {
            Ok(count) => {
                if !self.attachments.is_empty() {
                    tracing::debug!(
                        unused = self.attachments.len(),
                        "releasing attachment streams without a matching command"
                    );
                    self.attachments.clear();
                }
                tracing::debug!(count, last_etag = %self.last_etag, "batch executed");
                Ok(count)
            }
            Err(e) => {
                // Streams still queued behind the failed command
                self.attachments.clear();
                if e.is_conflict() {
                    tracing::warn!(error = %e, "batch aborted on concurrency conflict");
                } else {
                    tracing::debug!(error = %e, "batch failed");
                }
                Err(e)
            }
        }
    }

    fn execute_commands<W>(&mut self, tx: &mut W) -> BatchResult<usize>
    where
        W: DocumentsWriter + ?Sized,
    {
        let Self {
            commands,
            attachments,
            reply,
            last_etag,
            modified_collections,
            huge_documents,
            ..
        } = self;

        reply.reserve(commands.len());
        for command in commands.iter() {
            match command {
                Command::Put {
                    key,
                    etag,
                    document,
                } => {
                    let result = tx.put(key, *etag, document.clone())?;
                    if let Some(huge) = huge_documents {
                        huge.add_if_huge(&result.key, result.size);
                    }
                    *last_etag = result.etag;
                    track(modified_collections, &result.collection);

                    tracing::debug!(key = %result.key, etag = %result.etag, "put");
                    reply.push(CommandResult::Put(result.into()));
                }
                Command::Patch {
                    key,
                    etag,
                    patch,
                    patch_if_missing,
                    require_document,
                } => {
                    let outcome = tx.patch(key, *etag, patch, patch_if_missing.as_ref())?;
                    if *require_document && outcome.status == PatchStatus::DocumentMissing {
                        return Err(BatchError::DocumentNotFound(key.clone()));
                    }
                    if let (Some(huge), Some(size)) = (huge_documents.as_ref(), outcome.modified_size)
                    {
                        huge.add_if_huge(key, size);
                    }
                    if let Some(etag) = outcome.etag {
                        *last_etag = etag;
                    }
                    if let Some(collection) = &outcome.collection {
                        track(modified_collections, collection);
                    }

                    tracing::debug!(key = %key, status = %outcome.status, "patch");
                    reply.push(CommandResult::Patch(PatchReply {
                        key: key.clone(),
                        etag: outcome.etag,
                        patch_status: outcome.status,
                        collection: outcome.collection,
                    }));
                }
                Command::Delete { key, etag } => {
                    let deleted = tx.delete(key, *etag)?;
                    if let Some(doc) = &deleted {
                        *last_etag = doc.etag;
                        track(modified_collections, &doc.collection);
                    }

                    tracing::debug!(key = %key, deleted = deleted.is_some(), "delete");
                    reply.push(CommandResult::Delete(DeleteReply {
                        key: key.clone(),
                        deleted: deleted.is_some(),
                    }));
                }
                Command::DeletePrefix { prefix } => {
                    let removed = tx.delete_prefix(prefix)?;
                    for doc in &removed {
                        *last_etag = doc.etag;
                        track(modified_collections, &doc.collection);
                    }

                    tracing::debug!(prefix = %prefix, count = removed.len(), "delete by prefix");
                    reply.push(CommandResult::DeletePrefix(DeletePrefixReply {
                        key: prefix.clone(),
                        deleted: !removed.is_empty(),
                        count: removed.len(),
                        removed: removed.into_iter().map(RemovedDocument::from).collect(),
                    }));
                }
                Command::AttachmentPut {
                    key,
                    name,
                    content_type,
                    etag,
                } => {
                    let Some(mut staged) = attachments.pop_front() else {
                        return Err(BatchError::MissingAttachmentStream {
                            key: key.clone(),
                            name: name.clone(),
                        });
                    };

                    let result = staged.open().and_then(|mut content| {
                        tx.put_attachment(key, name, content_type, staged.hash(), *etag, &mut content)
                            .map_err(BatchError::from)
                    });
                    staged.release();
                    let result = result?;
                    *last_etag = result.etag;

                    tracing::debug!(key = %key, name = %name, etag = %result.etag, "attachment put");
                    reply.push(CommandResult::AttachmentPut(result.into()));
                }
            }
        }

        Ok(reply.len())
    }
}

fn track(collections: &mut Option<HashSet<String>>, name: &str) {
    if let Some(set) = collections {
        if !set.contains(name) {
            set.insert(name.to_string());
        }
    }
}

impl fmt::Display for BatchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} commands", self.commands.len())?;
        if !self.attachments.is_empty() {
            writeln!(f, "{} attachment streams.", self.attachments.len())?;
        }
        for command in &self.commands {
            writeln!(f, "\t{} {}", command.command_type(), command.key())?;
        }
        Ok(())
    }
}

impl fmt::Debug for BatchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchCommand")
            .field("commands", &self.commands.len())
            .field("attachments", &self.attachments.len())
            .field("last_etag", &self.last_etag)
            .field("executed", &self.executed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BatchConfig;
    use crate::shutdown::ShutdownSignal;
    use crate::stager::AttachmentStager;
    use docdb_storage::{DocumentFlags, DocumentStore, PatchRequest, StoreConfig};
    use serde_json::json;

    fn run(store: &DocumentStore, batch: &mut BatchCommand) -> BatchResult<usize> {
        let mut tx = store.begin_write();
        let count = batch.execute(&mut tx)?;
        tx.commit()?;
        Ok(count)
    }

    fn seed(store: &DocumentStore, keys: &[&str]) {
        let commands = keys
            .iter()
            .map(|k| Command::put(*k, json!({"@metadata": {"@collection": "Users"}})))
            .collect();
        run(store, &mut BatchCommand::new(commands)).unwrap();
    }

    async fn stage(stager: &AttachmentStager, content: &[u8]) -> StagedAttachment {
        let mut reader = content;
        stager
            .stage(&mut reader, &ShutdownSignal::never())
            .await
            .unwrap()
    }

    #[test]
    fn reply_matches_commands_in_order() {
        let store = DocumentStore::in_memory();
        let mut batch = BatchCommand::new(vec![
            Command::put("users/1", json!({"name": "A"})),
            Command::patch("users/1", PatchRequest::new(json!({"age": 3}))),
            Command::delete("users/2"),
            Command::delete_prefix("orders/"),
        ]);

        let count = run(&store, &mut batch).unwrap();
        assert_eq!(count, 4);
        let types: Vec<_> = batch
            .reply()
            .iter()
            .map(|r| r.command_type().to_string())
            .collect();
        assert_eq!(types, vec!["PUT", "PATCH", "DELETE", "DELETE"]);
        assert_eq!(batch.last_etag(), Etag::new(2));
    }

    #[test]
    fn put_then_put_with_first_etag() {
        let store = DocumentStore::in_memory();
        let mut batch = BatchCommand::new(vec![
            Command::put("users/1", json!({"v": 1})),
            Command::put("users/1", json!({"v": 2})).with_etag(Etag::new(1)),
        ]);

        run(&store, &mut batch).unwrap();
        assert_eq!(batch.last_etag(), Etag::new(2));
        assert_eq!(store.get("users/1").unwrap().data, json!({"v": 2}));
    }

    #[test]
    fn conflict_leaves_store_untouched() {
        let store = DocumentStore::in_memory();
        let mut batch = BatchCommand::new(vec![
            Command::put("users/0", json!({})),
            Command::put("users/1", json!({})).with_etag(Etag::new(999)),
        ]);

        let err = run(&store, &mut batch).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.document_count(), 0);
        assert_eq!(store.last_etag(), Etag::ZERO);
    }

    #[test]
    fn delete_missing_changes_nothing() {
        let store = DocumentStore::in_memory();
        let mut batch = BatchCommand::new(vec![Command::delete("nope")]).track_collections();

        run(&store, &mut batch).unwrap();
        assert_eq!(
            batch.reply()[0],
            CommandResult::Delete(DeleteReply {
                key: "nope".into(),
                deleted: false
            })
        );
        assert_eq!(batch.last_etag(), Etag::ZERO);
        assert!(batch.modified_collections().unwrap().is_empty());
    }

    #[test]
    fn prefix_delete_of_nothing() {
        let store = DocumentStore::in_memory();
        let mut batch = BatchCommand::new(vec![Command::delete_prefix("users/")]);

        run(&store, &mut batch).unwrap();
        match &batch.reply()[0] {
            CommandResult::DeletePrefix(reply) => {
                assert_eq!(reply.count, 0);
                assert!(!reply.deleted);
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(batch.last_etag(), Etag::ZERO);
    }

    #[test]
    fn prefix_delete_tracks_every_removal() {
        let store = DocumentStore::in_memory();
        seed(&store, &["users/1", "users/2", "orders/1"]);

        let mut batch = BatchCommand::new(vec![Command::delete_prefix("users/")]).track_collections();
        run(&store, &mut batch).unwrap();

        match &batch.reply()[0] {
            CommandResult::DeletePrefix(reply) => {
                assert_eq!(reply.count, 2);
                assert!(reply.deleted);
                assert_eq!(reply.removed[1].etag, Etag::new(5));
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert_eq!(batch.last_etag(), Etag::new(5));
        assert!(batch.modified_collections().unwrap().contains("Users"));
        assert_eq!(store.document_count(), 1);
    }

    #[test]
    fn collections_not_tracked_by_default() {
        let store = DocumentStore::in_memory();
        let mut batch = BatchCommand::new(vec![Command::put("a", json!({}))]);
        run(&store, &mut batch).unwrap();
        assert!(batch.modified_collections().is_none());
    }

    #[test]
    fn patch_statuses() {
        let store = DocumentStore::in_memory();
        seed(&store, &["users/1"]);

        let mut batch = BatchCommand::new(vec![
            Command::patch("users/1", PatchRequest::new(json!({"a": 1}))),
            Command::patch("users/1", PatchRequest::new(json!({"a": 1}))),
            Command::patch("users/9", PatchRequest::new(json!({"a": 1}))),
        ])
        .track_collections();
        run(&store, &mut batch).unwrap();

        let statuses: Vec<_> = batch
            .reply()
            .iter()
            .map(|r| match r {
                CommandResult::Patch(p) => (p.patch_status, p.etag),
                other => panic!("unexpected result {other:?}"),
            })
            .collect();
        assert_eq!(
            statuses,
            vec![
                (PatchStatus::Patched, Some(Etag::new(2))),
                (PatchStatus::NotModified, None),
                (PatchStatus::DocumentMissing, None),
            ]
        );
        assert_eq!(batch.last_etag(), Etag::new(2));
        assert_eq!(batch.modified_collections().unwrap().len(), 1);
    }

    #[test]
    fn require_document_fails_batch() {
        let store = DocumentStore::in_memory();
        let mut batch = BatchCommand::new(vec![
            Command::put("users/1", json!({})),
            Command::Patch {
                key: "users/9".into(),
                etag: None,
                patch: PatchRequest::new(json!({"a": 1})),
                patch_if_missing: None,
                require_document: true,
            },
        ]);

        let err = run(&store, &mut batch).unwrap_err();
        assert!(matches!(err, BatchError::DocumentNotFound(ref k) if k == "users/9"));
        assert_eq!(store.document_count(), 0);
    }

    #[test]
    fn execute_twice_rejected() {
        let store = DocumentStore::in_memory();
        let mut batch = BatchCommand::new(vec![Command::put("a", json!({}))]);
        run(&store, &mut batch).unwrap();

        let mut tx = store.begin_write();
        let err = batch.execute(&mut tx).unwrap_err();
        assert!(matches!(err, BatchError::InvalidOperation(_)));
    }

    #[test]
    fn huge_documents_recorded() {
        let store = DocumentStore::new(StoreConfig::new().huge_document_threshold(16));
        let mut batch = BatchCommand::new(vec![
            Command::put("small", json!({})),
            Command::put("big", json!({"payload": "x".repeat(64)})),
        ])
        .with_huge_documents(store.huge_documents());

        run(&store, &mut batch).unwrap();
        assert!(store.huge_documents().contains("big"));
        assert!(!store.huge_documents().contains("small"));
    }

    #[tokio::test]
    async fn attachment_put_consumes_stream() {
        let dir = tempfile::tempdir().unwrap();
        let stager = AttachmentStager::new(&BatchConfig::new().with_temp_dir(dir.path()));
        let store = DocumentStore::in_memory();

        let staged = stage(&stager, b"hello").await;
        let hash = staged.hash().to_string();
        let mut batch = BatchCommand::new(vec![
            Command::put("users/1", json!({})),
            Command::attachment_put("users/1", "greeting.txt", "text/plain"),
        ])
        .with_attachments(VecDeque::from([staged]));

        run(&store, &mut batch).unwrap();
        assert_eq!(stager.outstanding(), 0);
        assert_eq!(batch.pending_attachments(), 0);
        assert_eq!(batch.last_etag(), Etag::new(3));

        match &batch.reply()[1] {
            CommandResult::AttachmentPut(reply) => {
                assert_eq!(reply.hash, hash);
                assert_eq!(reply.size, 5);
                assert_eq!(reply.content_type, "text/plain");
            }
            other => panic!("unexpected result {other:?}"),
        }
        let doc = store.get("users/1").unwrap();
        assert!(doc.flags.contains(DocumentFlags::HAS_ATTACHMENTS));
        assert_eq!(store.attachment_content(&hash).unwrap().as_ref(), b"hello");
    }

    #[tokio::test]
    async fn attachment_released_when_storage_fails() {
        let dir = tempfile::tempdir().unwrap();
        let stager = AttachmentStager::new(&BatchConfig::new().with_temp_dir(dir.path()));
        let store = DocumentStore::in_memory();

        let mut batch = BatchCommand::new(vec![Command::attachment_put(
            "missing/1",
            "a.txt",
            "text/plain",
        )])
        .with_attachments(VecDeque::from([stage(&stager, b"x").await]));

        let err = run(&store, &mut batch).unwrap_err();
        assert!(matches!(err, BatchError::DocumentNotFound(_)));
        assert_eq!(stager.outstanding(), 0);
    }

    #[tokio::test]
    async fn queued_streams_released_when_later_command_fails() {
        let dir = tempfile::tempdir().unwrap();
        let stager = AttachmentStager::new(&BatchConfig::new().with_temp_dir(dir.path()));
        let store = DocumentStore::in_memory();

        let mut batch = BatchCommand::new(vec![
            Command::put("users/1", json!({})),
            Command::attachment_put("users/1", "a.txt", "text/plain"),
            Command::put("users/2", json!({})).with_etag(Etag::new(999)),
            Command::attachment_put("users/1", "b.txt", "text/plain"),
        ])
        .with_attachments(VecDeque::from([
            stage(&stager, b"a").await,
            stage(&stager, b"b").await,
        ]));
        assert_eq!(stager.outstanding(), 2);

        let err = run(&store, &mut batch).unwrap_err();
        assert!(matches!(err, BatchError::ConcurrencyConflict { .. }));
        assert_eq!(batch.pending_attachments(), 0);
        assert_eq!(stager.outstanding(), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(store.document_count(), 0);
    }

    #[test]
    fn attachment_without_stream_fails_fast() {
        let store = DocumentStore::in_memory();
        let mut batch = BatchCommand::new(vec![
            Command::put("users/1", json!({})),
            Command::attachment_put("users/1", "a.txt", "text/plain"),
            Command::put("users/2", json!({})),
        ]);

        let err = run(&store, &mut batch).unwrap_err();
        assert!(matches!(err, BatchError::MissingAttachmentStream { .. }));
        assert_eq!(batch.reply().len(), 1);
        assert_eq!(store.document_count(), 0);
    }

    #[tokio::test]
    async fn unused_streams_released_after_execute() {
        let dir = tempfile::tempdir().unwrap();
        let stager = AttachmentStager::new(&BatchConfig::new().with_temp_dir(dir.path()));
        let store = DocumentStore::in_memory();

        let mut batch = BatchCommand::new(vec![Command::put("a", json!({}))])
            .with_attachments(VecDeque::from([stage(&stager, b"x").await]));
        assert_eq!(stager.outstanding(), 1);

        run(&store, &mut batch).unwrap();
        assert_eq!(stager.outstanding(), 0);
    }

    #[test]
    fn display_summary() {
        let batch = BatchCommand::new(vec![
            Command::put("users/1", json!({})),
            Command::delete("users/2"),
        ]);
        assert_eq!(
            batch.to_string(),
            "2 commands\n\tPUT users/1\n\tDELETE users/2\n"
        );
    }
}
