//! Cluster connection management and the client capability surface.
//!
//! This module provides:
//! - `ConnectionManager`: resolves connection ids to cached clients
//! - `client`: the `ClusterClient` / `ClusterTransaction` traits the engine depends on
//! - `mongo`: driver-backed implementation
//! - `memory`: in-process implementation
//! - `types`: shared types for all operations

pub mod client;
pub mod manager;
pub mod memory;
pub mod mongo;
pub mod types;

pub use client::{ClusterClient, ClusterTransaction, DocumentStream};
pub use manager::ConnectionManager;
pub use memory::MemoryClusterClient;
pub use mongo::MongoClusterClient;
pub use types::{CountMode, DUPLICATE_KEY_CODE, IndexedWriteError, InsertOutcome};
