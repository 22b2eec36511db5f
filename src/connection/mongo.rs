//! `ClusterClient` backed by the official MongoDB driver.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use mongodb::bson::{Bson, Document, doc};
use mongodb::error::ErrorKind;
use mongodb::options::InsertManyOptions;
use mongodb::{Client, ClientSession};
use tokio_util::sync::CancellationToken;

use crate::connection::client::{ClusterClient, ClusterTransaction, DocumentStream};
use crate::connection::types::{CountMode, IndexedWriteError, InsertOutcome};
use crate::error::{Error, Result};

/// Cluster client over a pooled `mongodb::Client`. Cloning shares the pool.
#[derive(Clone)]
pub struct MongoClusterClient {
    client: Client,
}

impl MongoClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect to `uri` and ping `admin` before handing the client out.
    pub async fn connect(uri: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri).await?;
        client.database("admin").run_command(doc! { "ping": 1 }).await?;
        Ok(Self { client })
    }

    fn collection(&self, database: &str, collection: &str) -> mongodb::Collection<Document> {
        self.client.database(database).collection::<Document>(collection)
    }
}

#[async_trait]
impl ClusterClient for MongoClusterClient {
    async fn list_collection_names(&self, database: &str) -> Result<Vec<String>> {
        Ok(self.client.database(database).list_collection_names().await?)
    }

    async fn create_collection(&self, database: &str, collection: &str) -> Result<()> {
        self.client.database(database).create_collection(collection).await?;
        Ok(())
    }

    async fn find_all(
        &self,
        database: &str,
        collection: &str,
        cancel: CancellationToken,
    ) -> Result<DocumentStream> {
        let cursor = self.collection(database, collection).find(doc! {}).await?;
        Ok(cursor.map_err(Error::from).take_until(cancel.cancelled_owned()).boxed())
    }

    async fn count_documents(
        &self,
        database: &str,
        collection: &str,
        mode: CountMode,
    ) -> Result<u64> {
        let coll = self.collection(database, collection);
        let count = match mode {
            CountMode::Estimated => coll.estimated_document_count().await?,
            CountMode::Exact => coll.count_documents(doc! {}).await?,
        };
        Ok(count)
    }

    async fn insert_documents(
        &self,
        database: &str,
        collection: &str,
        documents: Vec<Document>,
        ordered: bool,
    ) -> Result<InsertOutcome> {
        if documents.is_empty() {
            return Ok(InsertOutcome::default());
        }

        let attempted = documents.len();
        let options = InsertManyOptions::builder().ordered(ordered).build();
        match self.collection(database, collection).insert_many(documents).with_options(options).await
        {
            Ok(result) => Ok(InsertOutcome::all_inserted(result.inserted_ids.len())),
            Err(err) => classify_insert_error(err, attempted, ordered),
        }
    }

    async fn start_transaction(&self) -> Result<Box<dyn ClusterTransaction>> {
        let mut session = self.client.start_session().await?;
        session.start_transaction().await?;
        Ok(Box::new(MongoTransaction { client: self.client.clone(), session }))
    }
}

/// Split a bulk insert failure into per-document write errors and a write concern
/// error, or pass it through when the server never applied the batch.
fn classify_insert_error(
    err: mongodb::error::Error,
    attempted: usize,
    ordered: bool,
) -> Result<InsertOutcome> {
    let ErrorKind::InsertMany(failure) = err.kind.as_ref() else {
        return Err(err.into());
    };
    if failure.write_errors.is_none() && failure.write_concern_error.is_none() {
        return Err(err.into());
    }

    let write_errors = failure
        .write_errors
        .iter()
        .flatten()
        .map(|e| IndexedWriteError::new(e.index, e.code, e.message.clone()))
        .collect();
    let call_error =
        failure.write_concern_error.as_ref().map(|wc| format!("Write concern error: {}", wc.message));
    Ok(InsertOutcome::partial(attempted, ordered, write_errors, call_error))
}

struct MongoTransaction {
    client: Client,
    session: ClientSession,
}

#[async_trait]
impl ClusterTransaction for MongoTransaction {
    async fn delete_by_ids(
        &mut self,
        database: &str,
        collection: &str,
        ids: Vec<Bson>,
    ) -> Result<u64> {
        let coll = self.client.database(database).collection::<Document>(collection);
        let result =
            coll.delete_many(doc! { "_id": { "$in": ids } }).session(&mut self.session).await?;
        Ok(result.deleted_count)
    }

    async fn insert_documents(
        &mut self,
        database: &str,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<u64> {
        if documents.is_empty() {
            return Ok(0);
        }
        let coll = self.client.database(database).collection::<Document>(collection);
        let result = coll.insert_many(documents).session(&mut self.session).await?;
        Ok(result.inserted_ids.len() as u64)
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.session.commit_transaction().await?;
        Ok(())
    }

    async fn abort(mut self: Box<Self>) -> Result<()> {
        self.session.abort_transaction().await?;
        Ok(())
    }
}
