// Data structures and types

pub mod connection;
pub mod copy;
pub mod document;
pub mod resource;

pub use connection::SavedConnection;
pub use copy::{CollectionRef, ConflictResolutionStrategy, CopyPasteConfig};
pub use document::{BulkWriteResult, DocumentDetails, DocumentWriteError, WriteErrorKind};
pub use resource::ResourceRef;
