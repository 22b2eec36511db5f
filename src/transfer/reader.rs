//! Source side of a copy: stream and count documents.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;

use crate::connection::{ConnectionManager, CountMode};
use crate::error::Result;
use crate::models::DocumentDetails;

/// Lazy, non-restartable sequence of source documents.
pub type DocumentDetailsStream = BoxStream<'static, Result<DocumentDetails>>;

#[async_trait]
pub trait DocumentReader: Send + Sync {
    /// Stream every document of the collection in the store's natural cursor order.
    async fn stream_documents(
        &self,
        connection_id: &str,
        database_name: &str,
        collection_name: &str,
        cancel: CancellationToken,
    ) -> Result<DocumentDetailsStream>;

    /// Document total for progress display. May be an estimate; never use it to decide
    /// when the stream is finished.
    async fn count_documents(
        &self,
        connection_id: &str,
        database_name: &str,
        collection_name: &str,
    ) -> Result<u64>;
}

/// Reader over clients resolved through a `ConnectionManager`.
pub struct ClusterDocumentReader {
    connections: Arc<ConnectionManager>,
    count_mode: CountMode,
}

impl ClusterDocumentReader {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self { connections, count_mode: CountMode::default() }
    }

    pub fn with_count_mode(mut self, count_mode: CountMode) -> Self {
        self.count_mode = count_mode;
        self
    }

    pub fn count_mode(&self) -> CountMode {
        self.count_mode
    }
}

#[async_trait]
impl DocumentReader for ClusterDocumentReader {
    async fn stream_documents(
        &self,
        connection_id: &str,
        database_name: &str,
        collection_name: &str,
        cancel: CancellationToken,
    ) -> Result<DocumentDetailsStream> {
        let client = self.connections.client(connection_id)?;
        let cursor = client.find_all(database_name, collection_name, cancel).await?;
        Ok(cursor.map_ok(DocumentDetails::from_document).boxed())
    }

    async fn count_documents(
        &self,
        connection_id: &str,
        database_name: &str,
        collection_name: &str,
    ) -> Result<u64> {
        let client = self.connections.client(connection_id)?;
        client.count_documents(database_name, collection_name, self.count_mode).await
    }
}
