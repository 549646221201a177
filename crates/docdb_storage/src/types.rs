//! Core type definitions for DocDB storage.

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

/// Version stamp assigned by the storage engine to every committed mutation.
///
/// Etags are strictly increasing across the whole database and never reused.
/// Within a single write transaction, later mutations always receive higher
/// etags than earlier ones. The default is [`Etag::ZERO`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Etag(pub u64);

impl Etag {
    /// The etag of an empty database.
    pub const ZERO: Etag = Etag(0);

    /// Creates a new etag.
    #[must_use]
    pub const fn new(etag: u64) -> Self {
        Self(etag)
    }

    /// Returns the raw etag value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next etag.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Etag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One per-node version stamp of a change vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeVectorEntry {
    /// Database (node) that produced the version.
    #[serde(rename = "DbId")]
    pub db_id: Uuid,
    /// Etag on that node.
    #[serde(rename = "Etag")]
    pub etag: Etag,
}

/// Ordered sequence of per-node version stamps for a document.
///
/// Used to detect causal relationships between document states across
/// nodes. Entries keep their first-seen order; updating a node that is
/// already present replaces its etag in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeVector(Vec<ChangeVectorEntry>);

impl ChangeVector {
    /// Creates an empty change vector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of this vector with `db_id` advanced to `etag`.
    #[must_use]
    pub fn advanced(&self, db_id: Uuid, etag: Etag) -> Self {
        let mut entries = self.0.clone();
        match entries.iter_mut().find(|e| e.db_id == db_id) {
            Some(entry) => entry.etag = entry.etag.max(etag),
            None => entries.push(ChangeVectorEntry { db_id, etag }),
        }
        Self(entries)
    }

    /// Returns the etag recorded for `db_id`, if any.
    #[must_use]
    pub fn etag_for(&self, db_id: Uuid) -> Option<Etag> {
        self.0.iter().find(|e| e.db_id == db_id).map(|e| e.etag)
    }

    /// Returns the entries in order.
    #[must_use]
    pub fn entries(&self) -> &[ChangeVectorEntry] {
        &self.0
    }

    /// Returns true if the vector has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Flags describing non-default document properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DocumentFlags(u32);

impl DocumentFlags {
    /// No flags set.
    pub const NONE: DocumentFlags = DocumentFlags(0);
    /// The document has revisions.
    pub const HAS_REVISIONS: DocumentFlags = DocumentFlags(1 << 0);
    /// The document has one or more attachments.
    pub const HAS_ATTACHMENTS: DocumentFlags = DocumentFlags(1 << 1);
    /// The document arrived through replication.
    pub const FROM_REPLICATION: DocumentFlags = DocumentFlags(1 << 2);
    /// The document was written by an import.
    pub const IMPORTED: DocumentFlags = DocumentFlags(1 << 3);

    const NAMES: [(DocumentFlags, &'static str); 4] = [
        (Self::HAS_REVISIONS, "HasRevisions"),
        (Self::HAS_ATTACHMENTS, "HasAttachments"),
        (Self::FROM_REPLICATION, "FromReplication"),
        (Self::IMPORTED, "Imported"),
    ];

    /// Returns true if no flag is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns true if every flag in `other` is set.
    #[must_use]
    pub const fn contains(self, other: DocumentFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns these flags with `other` added.
    #[must_use]
    pub const fn with(self, other: DocumentFlags) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns these flags with `other` removed.
    #[must_use]
    pub const fn without(self, other: DocumentFlags) -> Self {
        Self(self.0 & !other.0)
    }

    /// Parses a single flag name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::NAMES
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(flag, _)| *flag)
    }
}

impl fmt::Display for DocumentFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("None");
        }
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(", ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

impl Serialize for DocumentFlags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
