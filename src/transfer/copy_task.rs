//! Copy/paste of one collection as a tracked, cancellable task.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{
    BulkWriteResult, ConflictResolutionStrategy, CopyPasteConfig, DocumentDetails,
    DocumentWriteError, ResourceRef,
};
use crate::state::CopySettings;
use crate::tasks::{EventEmitter, Subscription, Task, TaskState, TaskStateChange, TaskStatus};
use crate::transfer::keep_alive::{KeepAliveOptions, KeepAliveStats, KeepAliveStream};
use crate::transfer::reader::{DocumentDetailsStream, DocumentReader};
use crate::transfer::writer::{DocumentWriter, WriteOptions};

pub const COPY_PASTE_TASK_TYPE: &str = "copy-paste-collection";

/// Progress callback, called after every flushed batch with the processed count.
pub type ProgressCallback = Arc<dyn Fn(u64) + Send + Sync>;

#[derive(Clone)]
pub struct CopyTaskOptions {
    pub batch_size: usize,
    /// `None` reads the cursor directly.
    pub keep_alive: Option<KeepAliveOptions>,
    /// Individual errors kept for inspection; the count keeps going past it.
    pub max_recorded_errors: usize,
    pub progress: Option<ProgressCallback>,
}

impl Default for CopyTaskOptions {
    fn default() -> Self {
        Self::from(&CopySettings::default())
    }
}

impl From<&CopySettings> for CopyTaskOptions {
    fn from(settings: &CopySettings) -> Self {
        let keep_alive = settings.keep_alive_enabled.then(|| {
            KeepAliveOptions::new(
                Duration::from_millis(settings.keep_alive_interval_ms),
                Duration::from_millis(settings.keep_alive_timeout_ms),
            )
        });
        Self {
            batch_size: settings.batch_size.max(1) as usize,
            keep_alive,
            max_recorded_errors: settings.max_recorded_errors,
            progress: None,
        }
    }
}

impl std::fmt::Debug for CopyTaskOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyTaskOptions")
            .field("batch_size", &self.batch_size)
            .field("keep_alive", &self.keep_alive)
            .field("max_recorded_errors", &self.max_recorded_errors)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Counters recorded for observability once the run is over.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CopyTaskMetrics {
    pub documents_processed: u64,
    pub documents_inserted: u64,
    pub batches_written: u64,
    pub keep_alive_read_count: u64,
    pub max_buffer_length: u64,
    pub duration: Duration,
}

struct Progress {
    status: TaskStatus,
    recorded_errors: Vec<DocumentWriteError>,
    batches_written: u64,
    metrics: Option<CopyTaskMetrics>,
}

enum RunEnd {
    Completed,
    Cancelled,
}

pub struct CopyPasteCollectionTask {
    id: Uuid,
    name: String,
    config: CopyPasteConfig,
    reader: Arc<dyn DocumentReader>,
    writer: Arc<dyn DocumentWriter>,
    options: CopyTaskOptions,
    cancel: CancellationToken,
    started: AtomicBool,
    progress: Mutex<Progress>,
    events: EventEmitter<TaskStateChange>,
}

impl CopyPasteCollectionTask {
    pub fn new(
        config: CopyPasteConfig,
        reader: Arc<dyn DocumentReader>,
        writer: Arc<dyn DocumentWriter>,
        options: CopyTaskOptions,
    ) -> Self {
        let name = format!("Copy {} to {}", config.source.namespace(), config.target.namespace());
        let status = TaskStatus { message: "Waiting to start".to_string(), ..TaskStatus::default() };
        Self {
            id: Uuid::new_v4(),
            name,
            config,
            reader,
            writer,
            options,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            progress: Mutex::new(Progress {
                status,
                recorded_errors: Vec::new(),
                batches_written: 0,
                metrics: None,
            }),
            events: EventEmitter::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn config(&self) -> &CopyPasteConfig {
        &self.config
    }

    pub fn conflict_strategy(&self) -> ConflictResolutionStrategy {
        self.config.on_conflict
    }

    /// Document errors retained so far, capped at `max_recorded_errors`.
    pub fn recorded_errors(&self) -> Vec<DocumentWriteError> {
        self.progress.lock().recorded_errors.clone()
    }

    /// Available once the task reached a terminal state through `start`.
    pub fn metrics(&self) -> Option<CopyTaskMetrics> {
        self.progress.lock().metrics.clone()
    }

    /// Move to `new_state` unless already terminal. Listeners run after the lock is released.
    fn transition(&self, new_state: TaskState, message: impl Into<String>) -> bool {
        let previous_state = {
            let mut progress = self.progress.lock();
            let previous = progress.status.state;
            if previous.is_terminal() {
                return false;
            }
            progress.status.state = new_state;
            progress.status.message = message.into();
            progress.status.updated_at = Utc::now();
            previous
        };

        if previous_state != new_state {
            log::info!("Task {} ({}): {} -> {}", self.id, self.name, previous_state.label(), new_state.label());
            self.events.emit(&TaskStateChange { task_id: self.id, previous_state, new_state });
        }
        true
    }

    /// Move `Pending -> Cancelled` under one lock, so a concurrent `start` either sees
    /// `Cancelled` or has already left `Pending`.
    fn cancel_if_pending(&self) -> bool {
        {
            let mut progress = self.progress.lock();
            if progress.status.state != TaskState::Pending {
                return false;
            }
            progress.status.state = TaskState::Cancelled;
            progress.status.message = "Cancelled before start".to_string();
            progress.status.updated_at = Utc::now();
        }

        log::info!("Task {} ({}): Pending -> Cancelled", self.id, self.name);
        self.events.emit(&TaskStateChange {
            task_id: self.id,
            previous_state: TaskState::Pending,
            new_state: TaskState::Cancelled,
        });
        true
    }

    async fn run(&self) -> Result<RunEnd> {
        let source = &self.config.source;
        let target = &self.config.target;

        if !self.transition(TaskState::Initializing, "Preparing target collection") {
            return Ok(RunEnd::Cancelled);
        }
        self.writer
            .ensure_collection_exists(&target.connection_id, &target.database_name, &target.collection_name)
            .await?;
        if self.cancel.is_cancelled() {
            return Ok(RunEnd::Cancelled);
        }

        let total = self
            .reader
            .count_documents(&source.connection_id, &source.database_name, &source.collection_name)
            .await?;
        self.progress.lock().status.total_count = Some(total);
        if self.cancel.is_cancelled() {
            return Ok(RunEnd::Cancelled);
        }

        let stream = self
            .reader
            .stream_documents(
                &source.connection_id,
                &source.database_name,
                &source.collection_name,
                self.cancel.child_token(),
            )
            .await?;
        let (mut stream, keep_alive_stats) = self.wrap_stream(stream);

        self.transition(TaskState::Running, format!("Copying ~{total} documents"));
        let end = self.copy_loop(&mut stream).await;
        drop(stream);

        if let Some(stats) = keep_alive_stats {
            self.progress.lock().metrics = Some(CopyTaskMetrics {
                keep_alive_read_count: stats.keep_alive_read_count(),
                max_buffer_length: stats.max_buffer_length(),
                ..CopyTaskMetrics::default()
            });
        }
        end
    }

    fn wrap_stream(
        &self,
        stream: DocumentDetailsStream,
    ) -> (DocumentDetailsStream, Option<Arc<KeepAliveStats>>) {
        match self.options.keep_alive {
            Some(options) => {
                let keep_alive = KeepAliveStream::new(stream, options, self.cancel.clone());
                let stats = keep_alive.stats();
                (keep_alive.into_stream(), Some(stats))
            }
            None => (stream, None),
        }
    }

    async fn copy_loop(&self, stream: &mut DocumentDetailsStream) -> Result<RunEnd> {
        let batch_size = self.options.batch_size.max(1);
        let mut batch: Vec<DocumentDetails> = Vec::with_capacity(batch_size);
        let mut batch_number = 0u64;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(RunEnd::Cancelled);
            }
            match stream.next().await {
                Some(Ok(document)) => {
                    batch.push(document);
                    if batch.len() >= batch_size {
                        batch_number += 1;
                        self.flush(std::mem::take(&mut batch), batch_number).await?;
                    }
                }
                Some(Err(err)) => return Err(err),
                None => break,
            }
        }

        // The stream also ends when cancellation fires inside it.
        if self.cancel.is_cancelled() {
            return Ok(RunEnd::Cancelled);
        }
        if !batch.is_empty() {
            batch_number += 1;
            self.flush(batch, batch_number).await?;
        }
        Ok(RunEnd::Completed)
    }

    async fn flush(&self, batch: Vec<DocumentDetails>, batch_number: u64) -> Result<()> {
        let target = &self.config.target;
        let attempted = batch.len() as u64;
        let options = WriteOptions { batch_label: Some(format!("batch {batch_number}")) };
        log::debug!("Task {}: writing batch {batch_number} ({attempted} documents)", self.id);

        let result = self
            .writer
            .write_documents(
                &target.connection_id,
                &target.database_name,
                &target.collection_name,
                self.config.on_conflict,
                batch,
                &options,
            )
            .await?;

        let processed = self.record_batch(attempted, &result);
        if let Some(progress) = &self.options.progress {
            progress(processed);
        }

        let errors = result.errors.as_deref().unwrap_or_default();
        if result.has_unclassified_error() {
            let fatal = errors.iter().filter(|e| e.document_id.is_none());
            let message = fatal.map(|e| e.error.as_str()).collect::<Vec<_>>().join("; ");
            return Err(Error::Write(message));
        }
        if self.config.on_conflict == ConflictResolutionStrategy::Abort {
            if let Some(first) = errors.first() {
                let id = first.document_id.as_ref().map(ToString::to_string).unwrap_or_default();
                return Err(Error::Write(format!("document {id}: {}", first.error)));
            }
            if result.errors.is_none() && result.inserted_count < attempted {
                return Err(Error::Write(format!(
                    "{} of {attempted} documents were not written",
                    attempted - result.inserted_count
                )));
            }
        }
        Ok(())
    }

    /// Fold a batch outcome into the running totals. Returns the new processed count.
    fn record_batch(&self, attempted: u64, result: &BulkWriteResult) -> u64 {
        let mut progress = self.progress.lock();
        let (error_count, processed_delta) = match &result.errors {
            // No per-document detail: whatever was not inserted failed.
            None => (attempted.saturating_sub(result.inserted_count), attempted),
            Some(errors) => {
                let error_count = errors.len() as u64;
                // An ordered write stops at its first error; the rest was never attempted.
                let processed = if self.config.on_conflict.ordered() && error_count > 0 {
                    (result.inserted_count + error_count).min(attempted)
                } else {
                    attempted
                };
                for error in errors {
                    if progress.recorded_errors.len() < self.options.max_recorded_errors {
                        log::warn!(
                            "Task {}: document {} not written: {}",
                            self.id,
                            error.document_id.as_ref().map(ToString::to_string).unwrap_or_else(|| "-".into()),
                            error.error
                        );
                        progress.recorded_errors.push(error.clone());
                    }
                }
                (error_count, processed)
            }
        };

        progress.batches_written += 1;
        let status = &mut progress.status;
        status.processed_count += processed_delta;
        status.inserted_count += result.inserted_count.min(processed_delta);
        status.error_count += error_count.min(processed_delta);
        status.progress = status.total_count.filter(|total| *total > 0).map(|total| {
            (status.processed_count as f64 / total as f64 * 100.0).min(100.0)
        });
        status.message = match status.total_count {
            Some(total) => format!("Copied {} of ~{total} documents", status.processed_count),
            None => format!("Copied {} documents", status.processed_count),
        };
        status.updated_at = Utc::now();
        status.processed_count
    }

    fn finish(&self, end: Result<RunEnd>, started_at: Instant) -> TaskState {
        {
            let mut progress = self.progress.lock();
            let mut metrics = progress.metrics.take().unwrap_or_default();
            metrics.documents_processed = progress.status.processed_count;
            metrics.documents_inserted = progress.status.inserted_count;
            metrics.batches_written = progress.batches_written;
            metrics.duration = started_at.elapsed();
            progress.metrics = Some(metrics);
        }

        match end {
            Ok(RunEnd::Completed) => {
                let status = {
                    let mut progress = self.progress.lock();
                    if progress.status.total_count.is_some() {
                        progress.status.progress = Some(100.0);
                    }
                    progress.status.clone()
                };
                let message = format!(
                    "Copied {} documents ({} errors)",
                    status.inserted_count, status.error_count
                );
                self.transition(TaskState::Completed, message);
            }
            Ok(RunEnd::Cancelled) => {
                self.transition(TaskState::Cancelled, "Cancelled");
            }
            Err(err) => {
                log::error!("Task {} ({}) failed: {err}", self.id, self.name);
                let message = format!("Failed: {err}");
                {
                    let mut progress = self.progress.lock();
                    if !progress.status.state.is_terminal() {
                        progress.status.error = Some(err.to_string());
                    }
                }
                self.transition(TaskState::Failed, message);
            }
        }
        self.state()
    }
}

#[async_trait]
impl Task for CopyPasteCollectionTask {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn task_type(&self) -> &'static str {
        COPY_PASTE_TASK_TYPE
    }

    fn status(&self) -> TaskStatus {
        self.progress.lock().status.clone()
    }

    fn used_resources(&self) -> Vec<ResourceRef> {
        vec![ResourceRef::from(&self.config.source), ResourceRef::from(&self.config.target)]
    }

    fn cancel(&self) {
        self.cancel.cancel();
        // Nothing will ever observe the token if the task never started.
        self.cancel_if_pending();
    }

    fn on_did_change_state(
        &self,
        listener: Box<dyn Fn(&TaskStateChange) + Send + Sync>,
    ) -> Subscription {
        self.events.subscribe(listener)
    }

    async fn start(&self) -> Result<TaskState> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::TaskAlreadyStarted(self.id));
        }
        if self.state().is_terminal() {
            return Ok(self.state());
        }

        let started_at = Instant::now();
        let end = self.run().await;
        Ok(self.finish(end, started_at))
    }
}

#[cfg(test)]
mod tests {
    use mongodb::bson::doc;

    use super::*;
    use crate::connection::{ConnectionManager, MemoryClusterClient};
    use crate::models::CollectionRef;
    use crate::transfer::{ClusterDocumentReader, ClusterDocumentWriter};

    fn task_over(
        client: &MemoryClusterClient,
        strategy: ConflictResolutionStrategy,
        options: CopyTaskOptions,
    ) -> CopyPasteCollectionTask {
        let connections = Arc::new(ConnectionManager::new());
        connections.register("conn-A", Arc::new(client.clone()));
        let config = CopyPasteConfig::new(
            CollectionRef::new("conn-A", "src", "items"),
            CollectionRef::new("conn-A", "dst", "items"),
            strategy,
        );
        CopyPasteCollectionTask::new(
            config,
            Arc::new(ClusterDocumentReader::new(Arc::clone(&connections))),
            Arc::new(ClusterDocumentWriter::new(connections)),
            options,
        )
    }

    #[tokio::test]
    async fn terminal_state_emits_nothing_further() {
        let client = MemoryClusterClient::new();
        client.seed("src", "items", vec![doc! { "_id": 1 }]);
        let task = task_over(&client, ConflictResolutionStrategy::Skip, CopyTaskOptions::default());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _subscription = task.on_did_change_state(Box::new(move |change| {
            sink.lock().push((change.previous_state, change.new_state));
        }));

        assert_eq!(task.start().await.expect("started"), TaskState::Completed);
        task.cancel();
        assert!(!task.transition(TaskState::Running, "late"));

        assert_eq!(
            *seen.lock(),
            vec![
                (TaskState::Pending, TaskState::Initializing),
                (TaskState::Initializing, TaskState::Running),
                (TaskState::Running, TaskState::Completed),
            ]
        );
        assert_eq!(task.state(), TaskState::Completed);
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let client = MemoryClusterClient::new();
        let task = task_over(&client, ConflictResolutionStrategy::Abort, CopyTaskOptions::default());

        task.start().await.expect("first start");
        assert!(matches!(task.start().await, Err(Error::TaskAlreadyStarted(_))));
    }

    #[tokio::test]
    async fn cancel_before_start_skips_the_run() {
        let client = MemoryClusterClient::new();
        client.seed("src", "items", vec![doc! { "_id": 1 }]);
        let task = task_over(&client, ConflictResolutionStrategy::Skip, CopyTaskOptions::default());

        task.cancel();
        assert_eq!(task.start().await.expect("started"), TaskState::Cancelled);
        assert!(!client.collection_exists("dst", "items"));
    }

    #[tokio::test]
    async fn recorded_errors_are_capped() {
        let client = MemoryClusterClient::new();
        let docs: Vec<_> = (0..20).map(|i| doc! { "_id": i }).collect();
        client.seed("src", "items", docs.clone());
        client.seed("dst", "items", docs);
        let options = CopyTaskOptions { batch_size: 7, max_recorded_errors: 5, ..CopyTaskOptions::default() };
        let task = task_over(&client, ConflictResolutionStrategy::Skip, options);

        assert_eq!(task.start().await.expect("started"), TaskState::Completed);
        let status = task.status();
        assert_eq!(status.error_count, 20);
        assert_eq!(status.processed_count, 20);
        assert_eq!(task.recorded_errors().len(), 5);
        assert_eq!(task.metrics().map(|m| m.batches_written), Some(3));
    }

    #[test]
    fn pending_cancel_fires_once() {
        let client = MemoryClusterClient::new();
        let task = task_over(&client, ConflictResolutionStrategy::Skip, CopyTaskOptions::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _subscription = task.on_did_change_state(Box::new(move |change| {
            sink.lock().push((change.previous_state, change.new_state));
        }));

        assert!(task.cancel_if_pending());
        assert!(!task.cancel_if_pending());
        task.cancel();

        assert_eq!(*seen.lock(), vec![(TaskState::Pending, TaskState::Cancelled)]);
        assert_eq!(task.status().message, "Cancelled before start");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_cancel_and_start_emit_one_chain() {
        for _ in 0..50 {
            let client = MemoryClusterClient::new();
            client.seed("src", "items", vec![doc! { "_id": 1 }]);
            let task = Arc::new(task_over(&client, ConflictResolutionStrategy::Skip, CopyTaskOptions::default()));
            let seen = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&seen);
            let _subscription = task.on_did_change_state(Box::new(move |change| {
                sink.lock().push((change.previous_state, change.new_state));
            }));

            let starter = {
                let task = Arc::clone(&task);
                tokio::spawn(async move { task.start().await })
            };
            task.cancel();
            let state = starter.await.expect("joined").expect("started");

            let mut current = TaskState::Pending;
            for (previous, new) in seen.lock().iter() {
                assert_eq!(*previous, current);
                current = *new;
            }
            assert_eq!(current, state);
            assert!(matches!(state, TaskState::Cancelled | TaskState::Completed));
        }
    }
}
