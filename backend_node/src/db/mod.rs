//! Document persistence layer.
//!
//! Session, model, gradient, contributor and dataset records are stored as
//! JSON documents in named collections behind the [`DocumentStore`] trait.
//! The in-memory implementation is the fallback the service runs with when
//! no external document database is configured; a driver-backed store slots
//! in behind the same trait.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub mod memory;
pub mod records;
pub mod registry;

pub use memory::MemoryDocumentStore;
pub use records::*;
pub use registry::Registry;

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid document: {0}")]
    InvalidDocument(String),
    #[error("store error: {0}")]
    Other(String),
}

/// Collection names shared by every store implementation.
pub mod collections {
    pub const MODELS: &str = "models";
    pub const GRADIENTS: &str = "gradients";
    pub const TRAINING_SESSIONS: &str = "training_sessions";
    pub const DATASETS: &str = "datasets";
    pub const CONTRIBUTORS: &str = "contributors";
}

/// Minimal async document store: JSON documents addressed by
/// (collection, id), shallow-merge updates, equality-filtered listing.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert(&self, collection: &str, id: &str, doc: Value) -> Result<()>;
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>>;
    /// Shallow-merge `patch` object fields into the document. Returns false
    /// if the document does not exist.
    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<bool>;
    /// List documents, optionally filtered by an equality match on one field.
    async fn list(&self, collection: &str, filter: Option<(&str, &Value)>) -> Result<Vec<Value>>;
    async fn delete(&self, collection: &str, id: &str) -> Result<bool>;
    async fn count(&self, collection: &str) -> Result<usize>;
}
