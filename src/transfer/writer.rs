//! Target side of a copy: create the collection and write batches under a conflict policy.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{Bson, Document};

use crate::connection::{ClusterClient, ConnectionManager, InsertOutcome};
use crate::error::{Error, Result};
use crate::models::{
    BulkWriteResult, ConflictResolutionStrategy, DocumentDetails, DocumentWriteError,
    WriteErrorKind,
};
use crate::perf::log_copy_duration;

/// Side field holding a document's original `_id` under `GenerateNewIds`.
pub const ORIGINAL_ID_FIELD: &str = "_original_id";

/// Per-call knobs for `write_documents`.
#[derive(Clone, Debug, Default)]
pub struct WriteOptions {
    /// Shown in log lines, e.g. `batch 3`.
    pub batch_label: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnsureCollectionResult {
    pub created: bool,
}

#[async_trait]
pub trait DocumentWriter: Send + Sync {
    /// Create the collection when it is missing. Never touches an existing one.
    async fn ensure_collection_exists(
        &self,
        connection_id: &str,
        database_name: &str,
        collection_name: &str,
    ) -> Result<EnsureCollectionResult>;

    /// Write one batch. Conflicts are handled according to `strategy`; `Err` is
    /// reserved for failures the strategy cannot absorb.
    async fn write_documents(
        &self,
        connection_id: &str,
        database_name: &str,
        collection_name: &str,
        strategy: ConflictResolutionStrategy,
        documents: Vec<DocumentDetails>,
        options: &WriteOptions,
    ) -> Result<BulkWriteResult>;
}

/// Writer over clients resolved through a `ConnectionManager`.
pub struct ClusterDocumentWriter {
    connections: Arc<ConnectionManager>,
}

impl ClusterDocumentWriter {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self { connections }
    }
}

#[async_trait]
impl DocumentWriter for ClusterDocumentWriter {
    async fn ensure_collection_exists(
        &self,
        connection_id: &str,
        database_name: &str,
        collection_name: &str,
    ) -> Result<EnsureCollectionResult> {
        let client = self.connections.client(connection_id)?;
        let names = client.list_collection_names(database_name).await?;
        if names.iter().any(|name| name == collection_name) {
            return Ok(EnsureCollectionResult { created: false });
        }

        if let Err(err) = client.create_collection(database_name, collection_name).await {
            // Lost a creation race with another writer.
            let names = client.list_collection_names(database_name).await?;
            if names.iter().any(|name| name == collection_name) {
                return Ok(EnsureCollectionResult { created: false });
            }
            return Err(err);
        }

        log::info!("Created target collection {database_name}.{collection_name}");
        Ok(EnsureCollectionResult { created: true })
    }

    async fn write_documents(
        &self,
        connection_id: &str,
        database_name: &str,
        collection_name: &str,
        strategy: ConflictResolutionStrategy,
        documents: Vec<DocumentDetails>,
        options: &WriteOptions,
    ) -> Result<BulkWriteResult> {
        if documents.is_empty() {
            return Ok(BulkWriteResult::empty());
        }

        let client = self.connections.client(connection_id)?;
        let start = Instant::now();
        let count = documents.len();

        let result = match strategy {
            ConflictResolutionStrategy::Abort => {
                insert_reporting(client.as_ref(), database_name, collection_name, documents, true)
                    .await
            }
            ConflictResolutionStrategy::Skip => {
                insert_reporting(client.as_ref(), database_name, collection_name, documents, false)
                    .await
            }
            ConflictResolutionStrategy::GenerateNewIds => {
                let documents = documents
                    .into_iter()
                    .map(|doc| DocumentDetails::new(doc.id, with_new_id(doc.content)))
                    .collect();
                insert_reporting(client.as_ref(), database_name, collection_name, documents, false)
                    .await
            }
            ConflictResolutionStrategy::Overwrite => {
                overwrite(client.as_ref(), database_name, collection_name, documents).await?
            }
        };

        log_copy_duration("write_documents", start, || {
            format!(
                "{} strategy={} docs={count} inserted={} errors={}",
                options.batch_label.as_deref().unwrap_or("batch"),
                strategy.label(),
                result.inserted_count,
                result.error_count()
            )
        });
        Ok(result)
    }
}

/// Bulk insert, reporting each rejected document by its id. Failures of the call as a
/// whole become a single entry without a document id.
async fn insert_reporting(
    client: &dyn ClusterClient,
    database: &str,
    collection: &str,
    documents: Vec<DocumentDetails>,
    ordered: bool,
) -> BulkWriteResult {
    let (ids, contents): (Vec<Bson>, Vec<Document>) =
        documents.into_iter().map(|doc| (doc.id, doc.content)).unzip();

    match client.insert_documents(database, collection, contents, ordered).await {
        Ok(outcome) => outcome_to_result(&ids, outcome),
        Err(err) => call_failed(database, collection, err),
    }
}

fn call_failed(database: &str, collection: &str, err: Error) -> BulkWriteResult {
    log::error!("Bulk insert into {database}.{collection} failed: {err}");
    BulkWriteResult {
        inserted_count: 0,
        errors: Some(vec![DocumentWriteError::unclassified(err.to_string())]),
    }
}

fn outcome_to_result(ids: &[Bson], outcome: InsertOutcome) -> BulkWriteResult {
    let mut errors: Vec<DocumentWriteError> = outcome
        .write_errors
        .into_iter()
        .map(|e| {
            let id = ids.get(e.index).cloned().unwrap_or(Bson::Null);
            DocumentWriteError::for_document(id, e.message, e.kind)
        })
        .collect();
    if let Some(call_error) = outcome.call_error {
        errors.push(DocumentWriteError::unclassified(call_error));
    }
    BulkWriteResult { inserted_count: outcome.inserted_count, errors: Some(errors) }
}

fn superseded(id: Bson) -> DocumentWriteError {
    DocumentWriteError::for_document(
        id,
        "superseded by a later document with the same _id in this batch",
        WriteErrorKind::DuplicateKey,
    )
}

/// Unordered insert, then replace every duplicate-key conflict inside one transaction
/// with the incoming version.
async fn overwrite(
    client: &dyn ClusterClient,
    database: &str,
    collection: &str,
    documents: Vec<DocumentDetails>,
) -> Result<BulkWriteResult> {
    let contents: Vec<Document> = documents.iter().map(|doc| doc.content.clone()).collect();
    let outcome = match client.insert_documents(database, collection, contents, false).await {
        Ok(outcome) => outcome,
        Err(err) => return Ok(call_failed(database, collection, err)),
    };
    if outcome.call_error.is_some() {
        let ids: Vec<Bson> = documents.into_iter().map(|doc| doc.id).collect();
        return Ok(outcome_to_result(&ids, outcome));
    }

    let rejected: HashSet<usize> = outcome.write_errors.iter().map(|e| e.index).collect();
    let mut inserted_count = outcome.inserted_count;
    let mut errors = Vec::new();
    let mut conflicts: Vec<DocumentDetails> = Vec::new();
    for failure in outcome.write_errors {
        let Some(doc) = documents.get(failure.index) else {
            errors.push(DocumentWriteError::unclassified(failure.message));
            continue;
        };
        if failure.kind != WriteErrorKind::DuplicateKey {
            errors.push(DocumentWriteError::for_document(doc.id.clone(), failure.message, failure.kind));
            continue;
        }
        // Two incoming documents with one _id: the later one wins.
        if let Some(pos) = conflicts.iter().position(|c| c.id == doc.id) {
            let earlier = conflicts.remove(pos);
            errors.push(superseded(earlier.id));
        } else if inserted_earlier_in_batch(&documents[..failure.index], &rejected, &doc.id) {
            // The replacement below takes over the slot that insert already counted.
            inserted_count = inserted_count.saturating_sub(1);
            errors.push(superseded(doc.id.clone()));
        }
        conflicts.push(doc.clone());
    }

    if !conflicts.is_empty() {
        log::debug!("Overwriting {} existing documents in {database}.{collection}", conflicts.len());
        inserted_count += replace_in_transaction(client, database, collection, conflicts).await?;
    }

    Ok(BulkWriteResult { inserted_count, errors: Some(errors) })
}

/// Whether a document with `id` among `earlier` went in during this insert.
fn inserted_earlier_in_batch(earlier: &[DocumentDetails], rejected: &HashSet<usize>, id: &Bson) -> bool {
    earlier.iter().enumerate().any(|(index, doc)| doc.id == *id && !rejected.contains(&index))
}

/// Delete the existing documents by id and insert the incoming ones, atomically.
/// Any failure aborts the transaction and is surfaced as `Error::Transaction`.
async fn replace_in_transaction(
    client: &dyn ClusterClient,
    database: &str,
    collection: &str,
    documents: Vec<DocumentDetails>,
) -> Result<u64> {
    let (ids, contents): (Vec<Bson>, Vec<Document>) =
        documents.into_iter().map(|doc| (doc.id, doc.content)).unzip();

    let mut tx = client.start_transaction().await.map_err(|e| Error::Transaction(Box::new(e)))?;
    let step = match tx.delete_by_ids(database, collection, ids).await {
        Ok(_) => tx.insert_documents(database, collection, contents).await,
        Err(err) => Err(err),
    };

    match step {
        Ok(replaced) => {
            tx.commit().await.map_err(|e| Error::Transaction(Box::new(e)))?;
            Ok(replaced)
        }
        Err(err) => {
            if let Err(abort_err) = tx.abort().await {
                log::warn!("Failed to abort overwrite transaction: {abort_err}");
            }
            Err(Error::Transaction(Box::new(err)))
        }
    }
}

/// Pick the side-field name for the original id: `_original_id`, else the first free
/// `_original_id_<n>`.
pub fn original_id_field(document: &Document) -> String {
    if !document.contains_key(ORIGINAL_ID_FIELD) {
        return ORIGINAL_ID_FIELD.to_string();
    }
    let mut suffix = 1u32;
    loop {
        let candidate = format!("{ORIGINAL_ID_FIELD}_{suffix}");
        if !document.contains_key(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

/// Re-key a document under a fresh ObjectId, keeping its previous `_id` in a side field.
pub fn with_new_id(mut content: Document) -> Document {
    let original = content.remove("_id");

    let mut rekeyed = Document::new();
    rekeyed.insert("_id", ObjectId::new());
    if let Some(original) = original {
        let field = original_id_field(&content);
        rekeyed.insert(field, original);
    }
    rekeyed.extend(content);
    rekeyed
}
