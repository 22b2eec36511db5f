//! Capability surface the copy engine needs from a cluster connection.

use async_trait::async_trait;
use futures::stream::BoxStream;
use mongodb::bson::{Bson, Document};
use tokio_util::sync::CancellationToken;

use crate::connection::types::{CountMode, InsertOutcome};
use crate::error::Result;

/// Stream of raw documents from a cursor.
pub type DocumentStream = BoxStream<'static, Result<Document>>;

/// A live client handle for one cluster.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn list_collection_names(&self, database: &str) -> Result<Vec<String>>;

    async fn create_collection(&self, database: &str, collection: &str) -> Result<()>;

    /// Open a cursor over every document. The stream ends once `cancel` fires.
    async fn find_all(
        &self,
        database: &str,
        collection: &str,
        cancel: CancellationToken,
    ) -> Result<DocumentStream>;

    async fn count_documents(&self, database: &str, collection: &str, mode: CountMode)
    -> Result<u64>;

    /// Bulk insert. Per-document rejections are reported in the outcome; an `ordered`
    /// insert stops at the first one.
    async fn insert_documents(
        &self,
        database: &str,
        collection: &str,
        documents: Vec<Document>,
        ordered: bool,
    ) -> Result<InsertOutcome>;

    async fn start_transaction(&self) -> Result<Box<dyn ClusterTransaction>>;
}

/// A multi-statement transaction. Dropping it without `commit` leaves nothing applied.
#[async_trait]
pub trait ClusterTransaction: Send {
    async fn delete_by_ids(&mut self, database: &str, collection: &str, ids: Vec<Bson>)
    -> Result<u64>;

    async fn insert_documents(
        &mut self,
        database: &str,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<u64>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn abort(self: Box<Self>) -> Result<()>;
}
