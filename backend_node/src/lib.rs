//! NeuroMesh backend: a decentralized AI training platform node.
//!
//! Contributors train small neural networks locally, submit encoded
//! gradients to blob storage, and the platform aggregates them with
//! federated averaging and records rounds on a (mocked) chain. The HTTP
//! API in [`api`] drives the whole flow.

pub mod ai;
pub mod api;
pub mod config;
pub mod db;
pub mod services;
