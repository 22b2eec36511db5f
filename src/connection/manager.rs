//! Core ConnectionManager struct: resolves connection ids to live cluster clients.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;

use crate::connection::client::ClusterClient;
use crate::connection::mongo::MongoClusterClient;
use crate::error::{Error, Result};
use crate::helpers::redact_uri_password;
use crate::models::SavedConnection;

/// Session-owned cache of connected clients keyed by connection id.
///
/// Clients are shared across tasks; a connection is a capability handle, not an
/// exclusively owned resource.
#[derive(Default)]
pub struct ConnectionManager {
    clients: DashMap<String, Arc<dyn ClusterClient>>,
}

impl ConnectionManager {
    /// Create a new connection manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to MongoDB using the saved connection config and cache the client.
    ///
    /// Returns the updated connection record with `last_connected` stamped.
    pub async fn connect(&self, config: &SavedConnection) -> Result<SavedConnection> {
        log::info!("Connecting to {} ({})", config.name, redact_uri_password(&config.uri));
        let client = MongoClusterClient::connect(&config.uri).await?;
        self.register(config.id.clone(), Arc::new(client));

        let mut updated = config.clone();
        updated.last_connected = Some(Utc::now());
        Ok(updated)
    }

    /// Make an already constructed client resolvable under `connection_id`.
    pub fn register(&self, connection_id: impl Into<String>, client: Arc<dyn ClusterClient>) {
        let connection_id = connection_id.into();
        log::debug!("Registered client for connection {connection_id}");
        self.clients.insert(connection_id, client);
    }

    /// Resolve a live client for `connection_id`.
    pub fn client(&self, connection_id: &str) -> Result<Arc<dyn ClusterClient>> {
        self.clients
            .get(connection_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::ConnectionNotFound(connection_id.to_string()))
    }

    pub fn is_connected(&self, connection_id: &str) -> bool {
        self.clients.contains_key(connection_id)
    }

    /// Drop the cached client. Tasks already holding it keep their handle.
    pub fn disconnect(&self, connection_id: &str) -> bool {
        self.clients.remove(connection_id).is_some()
    }
}
