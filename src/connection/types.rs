//! Shared types for the client capability surface.

use mongodb::bson::Bson;
use serde::{Deserialize, Serialize};

use crate::models::WriteErrorKind;

/// Server error code for a unique index violation.
pub const DUPLICATE_KEY_CODE: i32 = 11000;

/// How a reader derives the source total.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountMode {
    /// Metadata-based count; fast, may be slightly off.
    #[default]
    Estimated,
    /// Full count of matching documents.
    Exact,
}

/// A rejected document inside a bulk insert, addressed by its position in the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedWriteError {
    pub index: usize,
    pub code: i32,
    pub message: String,
    pub kind: WriteErrorKind,
}

impl IndexedWriteError {
    pub fn new(index: usize, code: i32, message: impl Into<String>) -> Self {
        let kind =
            if code == DUPLICATE_KEY_CODE { WriteErrorKind::DuplicateKey } else { WriteErrorKind::Other };
        Self { index, code, message: message.into(), kind }
    }

    pub fn duplicate_key(index: usize, id: &Bson) -> Self {
        Self::new(index, DUPLICATE_KEY_CODE, format!("E11000 duplicate key error dup key: {{ _id: {id} }}"))
    }
}

/// Result of a bulk insert that reached the server.
///
/// Per-document rejections land in `write_errors`. A failure of the call that still
/// left documents committed (a write concern error) is kept in `call_error`; any other
/// call failure is returned as `Err` by the client instead.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertOutcome {
    pub inserted_count: u64,
    pub write_errors: Vec<IndexedWriteError>,
    pub call_error: Option<String>,
}

impl InsertOutcome {
    pub fn all_inserted(count: usize) -> Self {
        Self { inserted_count: count as u64, ..Self::default() }
    }

    /// Outcome of a bulk insert of `attempted` documents that the server partly rejected.
    ///
    /// An unordered insert commits every document without a write error; an ordered one
    /// commits everything before the first rejected position.
    pub fn partial(
        attempted: usize,
        ordered: bool,
        write_errors: Vec<IndexedWriteError>,
        call_error: Option<String>,
    ) -> Self {
        let inserted = if ordered {
            write_errors.iter().map(|e| e.index).min().unwrap_or(attempted).min(attempted)
        } else {
            attempted.saturating_sub(write_errors.len())
        };
        Self { inserted_count: inserted as u64, write_errors, call_error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(indexes: &[usize]) -> Vec<IndexedWriteError> {
        indexes.iter().map(|&index| IndexedWriteError::duplicate_key(index, &Bson::Int32(index as i32))).collect()
    }

    #[test]
    fn unordered_counts_everything_not_rejected() {
        let outcome = InsertOutcome::partial(10, false, rejected(&[2, 5, 9]), None);
        assert_eq!(outcome.inserted_count, 7);
        assert_eq!(outcome.write_errors.len(), 3);
        assert_eq!(outcome.call_error, None);
    }

    #[test]
    fn ordered_counts_up_to_first_rejection() {
        assert_eq!(InsertOutcome::partial(10, true, rejected(&[4]), None).inserted_count, 4);
        assert_eq!(InsertOutcome::partial(10, true, rejected(&[0]), None).inserted_count, 0);
    }

    #[test]
    fn write_concern_failure_keeps_committed_count() {
        let outcome =
            InsertOutcome::partial(6, true, Vec::new(), Some("waiting for replication timed out".into()));
        assert_eq!(outcome.inserted_count, 6);
        assert!(outcome.write_errors.is_empty());
        assert_eq!(outcome.call_error.as_deref(), Some("waiting for replication timed out"));
    }

    #[test]
    fn duplicate_key_code_is_classified() {
        assert_eq!(IndexedWriteError::new(0, DUPLICATE_KEY_CODE, "dup").kind, WriteErrorKind::DuplicateKey);
        assert_eq!(IndexedWriteError::new(0, 121, "validation").kind, WriteErrorKind::Other);
    }
}
