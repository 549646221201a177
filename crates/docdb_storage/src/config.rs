//! Document store configuration.

use uuid::Uuid;

/// Configuration for opening a document store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Identity of this database node, stamped into change vectors.
    pub database_id: Uuid,

    /// Documents whose serialized size exceeds this are tracked as huge.
    pub huge_document_threshold: usize,

    /// Maximum number of huge documents remembered.
    pub max_huge_documents: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_id: Uuid::new_v4(),
            huge_document_threshold: 5 * 1024 * 1024, // 5 MB
            max_huge_documents: 100,
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the database identity.
    #[must_use]
    pub const fn database_id(mut self, id: Uuid) -> Self {
        self.database_id = id;
        self
    }

    /// Sets the huge document threshold in bytes.
    #[must_use]
    pub const fn huge_document_threshold(mut self, bytes: usize) -> Self {
        self.huge_document_threshold = bytes;
        self
    }

    /// Sets how many huge documents are remembered.
    #[must_use]
    pub const fn max_huge_documents(mut self, count: usize) -> Self {
        self.max_huge_documents = count;
        self
    }
}
