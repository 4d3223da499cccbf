//! Mock chain client.
//!
//! Mirrors the call surface of the on-chain training contract (gradient
//! submission, model version bumps, read queries) but fabricates
//! transaction hashes locally instead of talking to an RPC node.

use crate::config::Config;
use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

pub struct ChainClient {
    rpc_url: String,
    contract_address: Option<String>,
    contract_module: String,
}

impl ChainClient {
    pub fn new(config: &Config) -> Self {
        Self {
            rpc_url: config.chain_rpc_url.clone(),
            contract_address: config.contract_address.clone(),
            contract_module: config.contract_module.clone(),
        }
    }

    fn mock_tx_hash() -> String {
        format!("0x{}", hex::encode(rand::random::<[u8; 16]>()))
    }

    fn call_target(&self, function: &str) -> String {
        let address = self.contract_address.as_deref().unwrap_or("0x0");
        format!("{address}::{}::{function}", self.contract_module)
    }

    /// Record a gradient contribution on chain. Returns the transaction hash.
    pub fn submit_gradient(
        &self,
        model_id: &str,
        gradient_uri: &str,
        contributor_id: &str,
    ) -> Result<String, ChainError> {
        if model_id.is_empty() {
            return Err(ChainError::MissingField("model_id"));
        }
        if gradient_uri.is_empty() {
            return Err(ChainError::MissingField("gradient_uri"));
        }
        if contributor_id.is_empty() {
            return Err(ChainError::MissingField("contributor_id"));
        }
        let tx_hash = Self::mock_tx_hash();
        log::info!(
            "chain call {} via {}: gradient {gradient_uri} for model {model_id} by {contributor_id} -> {tx_hash}",
            self.call_target("submit_gradient"),
            self.rpc_url,
        );
        Ok(tx_hash)
    }

    /// Point the on-chain model record at a new aggregate. Returns the
    /// transaction hash.
    pub fn update_model_version(
        &self,
        model_id: &str,
        aggregate_uri: &str,
        contributor_count: usize,
    ) -> Result<String, ChainError> {
        if model_id.is_empty() {
            return Err(ChainError::MissingField("model_id"));
        }
        if aggregate_uri.is_empty() {
            return Err(ChainError::MissingField("aggregate_uri"));
        }
        let tx_hash = Self::mock_tx_hash();
        log::info!(
            "chain call {}: model {model_id} -> {aggregate_uri} ({contributor_count} contributors) -> {tx_hash}",
            self.call_target("update_model_version"),
        );
        Ok(tx_hash)
    }

    /// On-chain view of a model record.
    pub fn get_model_info(&self, model_id: &str) -> Value {
        json!({
            "modelId": model_id,
            "owner": self.contract_address.as_deref().unwrap_or("0x0"),
            "version": 3,
            "totalContributions": 42,
            "lastAggregation": Utc::now(),
            "rewardPool": 1_000_000,
        })
    }

    /// On-chain contribution stats for one contributor.
    pub fn get_contributor_stats(&self, contributor_id: &str) -> Value {
        json!({
            "contributorId": contributor_id,
            "submissions": 17,
            "accepted": 15,
            "rewardsEarned": 12_500,
            "stake": 50_000,
        })
    }

    /// Top contributors for a model, best first.
    pub fn get_model_leaderboard(&self, model_id: &str, limit: usize) -> Vec<Value> {
        (0..limit.min(10))
            .map(|rank| {
                json!({
                    "rank": rank + 1,
                    "modelId": model_id,
                    "contributorId": format!("contributor_{:03}", rank + 1),
                    "contributions": 40 - rank * 3,
                    "reputation": 98.5 - rank as f64 * 4.2,
                })
            })
            .collect()
    }
}
