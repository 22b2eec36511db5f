//! In-process `ClusterClient` holding collections in memory.
//!
//! Behaves like a small standalone server: `_id` is unique per collection, inserts
//! create the collection on demand, and transactions are applied atomically on commit.
//! Fault injection hooks let callers simulate connectivity loss.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{Bson, Document};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::connection::client::{ClusterClient, ClusterTransaction, DocumentStream};
use crate::connection::types::{CountMode, IndexedWriteError, InsertOutcome};
use crate::error::{Error, Result};

type Collections = BTreeMap<String, BTreeMap<String, Vec<Document>>>;

#[derive(Default)]
struct MemoryState {
    databases: Collections,
    fail_next_insert: Option<String>,
    fail_transactions: Option<String>,
    insert_calls: Vec<usize>,
}

/// Cloning shares the underlying store.
#[derive(Clone, Default)]
pub struct MemoryClusterClient {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryClusterClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents of a collection, creating it if needed.
    pub fn seed(&self, database: &str, collection: &str, documents: Vec<Document>) {
        let mut state = self.state.lock();
        state
            .databases
            .entry(database.to_string())
            .or_default()
            .insert(collection.to_string(), documents);
    }

    /// Snapshot of a collection in insertion order. Empty when it does not exist.
    pub fn documents(&self, database: &str, collection: &str) -> Vec<Document> {
        let state = self.state.lock();
        state
            .databases
            .get(database)
            .and_then(|db| db.get(collection))
            .cloned()
            .unwrap_or_default()
    }

    pub fn collection_exists(&self, database: &str, collection: &str) -> bool {
        self.state.lock().databases.get(database).is_some_and(|db| db.contains_key(collection))
    }

    /// The next bulk insert fails as if the connection dropped.
    pub fn fail_next_insert(&self, message: impl Into<String>) {
        self.state.lock().fail_next_insert = Some(message.into());
    }

    /// Every transaction commit fails with `message` until cleared.
    pub fn fail_transactions(&self, message: Option<String>) {
        self.state.lock().fail_transactions = message;
    }

    /// Batch sizes of every bulk insert call that reached the store.
    pub fn insert_calls(&self) -> Vec<usize> {
        self.state.lock().insert_calls.clone()
    }
}

fn connection_lost(message: String) -> Error {
    Error::Io(std::io::Error::new(std::io::ErrorKind::ConnectionReset, message))
}

fn contains_id(documents: &[Document], id: &Bson) -> bool {
    documents.iter().any(|doc| doc.get("_id") == Some(id))
}

/// Insert into `target`, reporting duplicates by batch position.
fn insert_into(target: &mut Vec<Document>, documents: Vec<Document>, ordered: bool) -> InsertOutcome {
    let mut outcome = InsertOutcome::default();
    for (index, mut doc) in documents.into_iter().enumerate() {
        let id = match doc.get("_id") {
            Some(id) => id.clone(),
            None => {
                let id = Bson::ObjectId(ObjectId::new());
                doc.insert("_id", id.clone());
                id
            }
        };

        if contains_id(target, &id) {
            outcome.write_errors.push(IndexedWriteError::duplicate_key(index, &id));
            if ordered {
                break;
            }
            continue;
        }

        target.push(doc);
        outcome.inserted_count += 1;
    }
    outcome
}

#[async_trait]
impl ClusterClient for MemoryClusterClient {
    async fn list_collection_names(&self, database: &str) -> Result<Vec<String>> {
        let state = self.state.lock();
        Ok(state.databases.get(database).map(|db| db.keys().cloned().collect()).unwrap_or_default())
    }

    async fn create_collection(&self, database: &str, collection: &str) -> Result<()> {
        let mut state = self.state.lock();
        let db = state.databases.entry(database.to_string()).or_default();
        if db.contains_key(collection) {
            return Err(Error::Parse(format!(
                "Collection already exists. NS: {database}.{collection}"
            )));
        }
        db.insert(collection.to_string(), Vec::new());
        Ok(())
    }

    async fn find_all(
        &self,
        database: &str,
        collection: &str,
        cancel: CancellationToken,
    ) -> Result<DocumentStream> {
        let documents = self.documents(database, collection);
        Ok(futures::stream::iter(documents.into_iter().map(Ok))
            .take_until(cancel.cancelled_owned())
            .boxed())
    }

    async fn count_documents(
        &self,
        database: &str,
        collection: &str,
        _mode: CountMode,
    ) -> Result<u64> {
        Ok(self.documents(database, collection).len() as u64)
    }

    async fn insert_documents(
        &self,
        database: &str,
        collection: &str,
        documents: Vec<Document>,
        ordered: bool,
    ) -> Result<InsertOutcome> {
        let mut state = self.state.lock();
        if let Some(message) = state.fail_next_insert.take() {
            return Err(connection_lost(message));
        }
        state.insert_calls.push(documents.len());

        let target = state
            .databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default();
        Ok(insert_into(target, documents, ordered))
    }

    async fn start_transaction(&self) -> Result<Box<dyn ClusterTransaction>> {
        Ok(Box::new(MemoryTransaction { state: Arc::clone(&self.state), ops: Vec::new() }))
    }
}

enum PendingOp {
    Delete { database: String, collection: String, ids: Vec<Bson> },
    Insert { database: String, collection: String, documents: Vec<Document> },
}

struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    ops: Vec<PendingOp>,
}

#[async_trait]
impl ClusterTransaction for MemoryTransaction {
    async fn delete_by_ids(
        &mut self,
        database: &str,
        collection: &str,
        ids: Vec<Bson>,
    ) -> Result<u64> {
        let matched = {
            let state = self.state.lock();
            state
                .databases
                .get(database)
                .and_then(|db| db.get(collection))
                .map_or(0, |docs| ids.iter().filter(|id| contains_id(docs, id)).count())
        };
        self.ops.push(PendingOp::Delete {
            database: database.to_string(),
            collection: collection.to_string(),
            ids,
        });
        Ok(matched as u64)
    }

    async fn insert_documents(
        &mut self,
        database: &str,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<u64> {
        let count = documents.len() as u64;
        self.ops.push(PendingOp::Insert {
            database: database.to_string(),
            collection: collection.to_string(),
            documents,
        });
        Ok(count)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(message) = state.fail_transactions.clone() {
            return Err(connection_lost(message));
        }

        // Work on a copy so a failed statement leaves the store untouched.
        let mut databases = state.databases.clone();
        for op in self.ops {
            match op {
                PendingOp::Delete { database, collection, ids } => {
                    if let Some(docs) = databases.get_mut(&database).and_then(|db| db.get_mut(&collection))
                    {
                        docs.retain(|doc| !doc.get("_id").is_some_and(|id| ids.contains(id)));
                    }
                }
                PendingOp::Insert { database, collection, documents } => {
                    let target =
                        databases.entry(database).or_default().entry(collection).or_default();
                    let outcome = insert_into(target, documents, true);
                    if let Some(failure) = outcome.write_errors.into_iter().next() {
                        return Err(Error::Parse(failure.message));
                    }
                }
            }
        }
        state.databases = databases;
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
