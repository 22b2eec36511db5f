//! Collection copy/paste engine: reader, writer, keep-alive stream and the copy task.
//!
//! Data flow: a `CopyPasteConfig` binds a `DocumentReader` and a `DocumentWriter` into a
//! `CopyPasteCollectionTask`, which streams the source (optionally through
//! `KeepAliveStream`), batches documents and writes each batch under the configured
//! conflict strategy.

pub mod copy_task;
pub mod keep_alive;
pub mod reader;
pub mod writer;

pub use copy_task::{
    COPY_PASTE_TASK_TYPE, CopyPasteCollectionTask, CopyTaskMetrics, CopyTaskOptions,
    ProgressCallback,
};
pub use keep_alive::{KeepAliveOptions, KeepAliveStats, KeepAliveStream, MIN_KEEP_ALIVE_INTERVAL};
pub use reader::{ClusterDocumentReader, DocumentDetailsStream, DocumentReader};
pub use writer::{
    ClusterDocumentWriter, DocumentWriter, EnsureCollectionResult, ORIGINAL_ID_FIELD, WriteOptions,
    original_id_field, with_new_id,
};
