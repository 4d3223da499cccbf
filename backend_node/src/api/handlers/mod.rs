//! Route handlers, one module per API prefix.

pub mod blobs;
pub mod chain;
pub mod contributors;
pub mod dataset;
pub mod demo;
pub mod gradients;
pub mod local_training;
pub mod models;
pub mod training;
