//! Documents in flight and per-batch write outcomes.

use mongodb::bson::{Bson, Document};

/// A document read from the source: its `_id` plus opaque content.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentDetails {
    pub id: Bson,
    pub content: Document,
}

impl DocumentDetails {
    pub fn new(id: Bson, content: Document) -> Self {
        Self { id, content }
    }

    /// Build from a raw document, taking `_id` (or `Null` when absent).
    pub fn from_document(content: Document) -> Self {
        let id = content.get("_id").cloned().unwrap_or(Bson::Null);
        Self { id, content }
    }
}

/// Classification of a single failed write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteErrorKind {
    /// Target already holds a document with the same primary key.
    DuplicateKey,
    /// Any other per-document rejection (validation, size limits, ...).
    Other,
    /// Failure not tied to a document; the whole write call went wrong.
    Unclassified,
}

/// One document that failed to write, or a call-level failure when `document_id` is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentWriteError {
    pub document_id: Option<Bson>,
    pub error: String,
    pub kind: WriteErrorKind,
}

impl DocumentWriteError {
    pub fn for_document(document_id: Bson, error: impl Into<String>, kind: WriteErrorKind) -> Self {
        Self { document_id: Some(document_id), error: error.into(), kind }
    }

    pub fn unclassified(error: impl Into<String>) -> Self {
        Self { document_id: None, error: error.into(), kind: WriteErrorKind::Unclassified }
    }
}

/// Outcome of writing one batch.
///
/// `errors == None` means the writer does not report per-document detail; callers
/// then treat the batch as all-or-nothing given `inserted_count`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkWriteResult {
    pub inserted_count: u64,
    pub errors: Option<Vec<DocumentWriteError>>,
}

impl BulkWriteResult {
    pub fn empty() -> Self {
        Self { inserted_count: 0, errors: Some(Vec::new()) }
    }

    pub fn error_count(&self) -> u64 {
        self.errors.as_ref().map_or(0, |errors| errors.len() as u64)
    }

    /// A failure not attributable to a single document (e.g. lost connectivity).
    pub fn has_unclassified_error(&self) -> bool {
        self.errors.iter().flatten().any(|e| e.document_id.is_none())
    }
}
