//! Copy/paste configuration supplied by the invoking layer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Fully qualified collection address on a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionRef {
    pub connection_id: String,
    pub database_name: String,
    pub collection_name: String,
}

impl CollectionRef {
    pub fn new(
        connection_id: impl Into<String>,
        database_name: impl Into<String>,
        collection_name: impl Into<String>,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            database_name: database_name.into(),
            collection_name: collection_name.into(),
        }
    }

    /// `database.collection` namespace, as used in log lines.
    pub fn namespace(&self) -> String {
        format!("{}.{}", self.database_name, self.collection_name)
    }
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.connection_id, self.database_name, self.collection_name)
    }
}

/// Parses `connection/database/collection`. The collection part may itself contain `/`.
impl FromStr for CollectionRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(conn), Some(db), Some(coll))
                if !conn.is_empty() && !db.is_empty() && !coll.is_empty() =>
            {
                Ok(Self::new(conn, db, coll))
            }
            _ => Err(Error::Parse(format!("expected <connection>/<database>/<collection>, got '{s}'"))),
        }
    }
}

/// How the writer reacts when a target document with the same `_id` already exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictResolutionStrategy {
    #[default]
    Abort,
    Skip,
    Overwrite,
    GenerateNewIds,
}

impl ConflictResolutionStrategy {
    pub fn label(self) -> &'static str {
        match self {
            ConflictResolutionStrategy::Abort => "Abort",
            ConflictResolutionStrategy::Skip => "Skip",
            ConflictResolutionStrategy::Overwrite => "Overwrite",
            ConflictResolutionStrategy::GenerateNewIds => "Generate new ids",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ConflictResolutionStrategy::Abort => "Stop the whole operation on the first write error",
            ConflictResolutionStrategy::Skip => "Log conflicting documents and continue",
            ConflictResolutionStrategy::Overwrite => {
                "Replace existing target documents that share an _id"
            }
            ConflictResolutionStrategy::GenerateNewIds => {
                "Insert every document under a fresh _id, keeping the original in _original_id"
            }
        }
    }

    pub fn all() -> &'static [ConflictResolutionStrategy] {
        &[
            ConflictResolutionStrategy::Abort,
            ConflictResolutionStrategy::Skip,
            ConflictResolutionStrategy::Overwrite,
            ConflictResolutionStrategy::GenerateNewIds,
        ]
    }

    /// Whether the underlying bulk insert must stop at the first failure.
    pub fn ordered(self) -> bool {
        matches!(self, ConflictResolutionStrategy::Abort)
    }
}

impl fmt::Display for ConflictResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ConflictResolutionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['_', ' '], "-").as_str() {
            "abort" => Ok(ConflictResolutionStrategy::Abort),
            "skip" => Ok(ConflictResolutionStrategy::Skip),
            "overwrite" => Ok(ConflictResolutionStrategy::Overwrite),
            "generate-new-ids" | "generatenewids" => Ok(ConflictResolutionStrategy::GenerateNewIds),
            other => {
                let known: Vec<&str> =
                    ConflictResolutionStrategy::all().iter().map(|strategy| strategy.label()).collect();
                Err(Error::Parse(format!(
                    "unknown conflict strategy '{other}', expected one of: {}",
                    known.join(", ")
                )))
            }
        }
    }
}

/// Immutable description of one copy/paste operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyPasteConfig {
    pub source: CollectionRef,
    pub target: CollectionRef,
    pub on_conflict: ConflictResolutionStrategy,
}

impl CopyPasteConfig {
    pub fn new(
        source: CollectionRef,
        target: CollectionRef,
        on_conflict: ConflictResolutionStrategy,
    ) -> Self {
        Self { source, target, on_conflict }
    }
}
