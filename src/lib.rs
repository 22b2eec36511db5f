//! Collection copy/paste engine for DocumentDB and MongoDB-compatible clusters.

pub mod connection;
pub mod error;
pub mod helpers;
pub mod models;
pub mod perf;
pub mod session;
pub mod state;
pub mod tasks;
pub mod transfer;

pub use error::{Error, Result};
