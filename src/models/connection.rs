// Connection configuration models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A saved connection configuration (persisted to disk)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SavedConnection {
    /// Stable cluster identifier used as the `connection_id` of copy configs.
    pub id: String,
    pub name: String,
    pub uri: String,
    pub last_connected: Option<DateTime<Utc>>,
}

impl SavedConnection {
    pub fn new(name: String, uri: String) -> Self {
        Self { id: Uuid::new_v4().to_string(), name, uri, last_connected: None }
    }

    /// Whether `key` names this connection, by id or by display name.
    pub fn matches(&self, key: &str) -> bool {
        self.id == key || self.name == key
    }
}
