//! Resources a running task holds on to.

use serde::{Deserialize, Serialize};

use crate::models::CollectionRef;

/// A connection, database, or collection referenced by a task.
///
/// `None` components widen the reference: a ref with only `connection_id` set stands
/// for every database on that connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub connection_id: String,
    pub database_name: Option<String>,
    pub collection_name: Option<String>,
}

impl ResourceRef {
    pub fn connection(connection_id: impl Into<String>) -> Self {
        Self { connection_id: connection_id.into(), database_name: None, collection_name: None }
    }

    pub fn database(connection_id: impl Into<String>, database_name: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            database_name: Some(database_name.into()),
            collection_name: None,
        }
    }

    /// Whether disrupting `self` would disrupt `other` or vice versa.
    pub fn overlaps(&self, other: &ResourceRef) -> bool {
        if self.connection_id != other.connection_id {
            return false;
        }
        match (&self.database_name, &other.database_name) {
            (Some(a), Some(b)) if a != b => return false,
            (Some(_), Some(_)) => {}
            _ => return true,
        }
        match (&self.collection_name, &other.collection_name) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

impl From<&CollectionRef> for ResourceRef {
    fn from(value: &CollectionRef) -> Self {
        Self {
            connection_id: value.connection_id.clone(),
            database_name: Some(value.database_name.clone()),
            collection_name: Some(value.collection_name.clone()),
        }
    }
}
