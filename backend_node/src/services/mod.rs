//! Platform services: chain and blob mocks, gradient aggregation, and the
//! background training runner.

pub mod aggregation;
pub mod blobstore;
pub mod chain;
pub mod runner;

pub use aggregation::{AggregationError, AggregationService};
pub use blobstore::{mesh_uri, BlobError, BlobStore};
pub use chain::{ChainClient, ChainError};
pub use runner::{Control, SessionControls, TrainingRunner};
