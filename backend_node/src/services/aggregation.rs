//! Gradient aggregation round: fetch submitted blobs, average them, store
//! the aggregate and point the chain record at it.

use super::blobstore::{BlobStore, mesh_uri};
use super::chain::{ChainClient, ChainError};
use crate::ai::{self, AggregateError, CodecError, GradientMap};
use crate::db::{DbError, Registry};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("no gradient submissions for model {0}")]
    NoSubmissions(String),
    #[error("no decodable gradient blobs for model {0}")]
    NoValidGradients(String),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregationOutcome {
    pub model_id: String,
    pub aggregate_cid: String,
    pub aggregate_uri: String,
    pub transaction_hash: String,
    pub contributor_count: usize,
    pub skipped_blobs: usize,
}

pub struct AggregationService {
    registry: Registry,
    blobs: Arc<BlobStore>,
    chain: Arc<ChainClient>,
}

impl AggregationService {
    pub fn new(registry: Registry, blobs: Arc<BlobStore>, chain: Arc<ChainClient>) -> Self {
        Self {
            registry,
            blobs,
            chain,
        }
    }

    /// Run one aggregation round over every gradient submitted for a model.
    /// Blobs that fail to download or decode are skipped with a warning;
    /// the round fails only when nothing decodable remains.
    pub async fn aggregate_model_gradients(
        &self,
        model_id: &str,
    ) -> Result<AggregationOutcome, AggregationError> {
        let submissions = self.registry.get_gradients(model_id).await?;
        if submissions.is_empty() {
            return Err(AggregationError::NoSubmissions(model_id.to_string()));
        }

        let mut contributions: Vec<GradientMap> = Vec::with_capacity(submissions.len());
        let mut skipped = 0;
        for submission in &submissions {
            let Some(blob_id) = submission.get("blob_id").and_then(|v| v.as_str()) else {
                skipped += 1;
                continue;
            };
            let bytes = match self.blobs.download(blob_id) {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::warn!("skipping gradient blob {blob_id}: {e}");
                    skipped += 1;
                    continue;
                }
            };
            match ai::decode_gradients(&bytes) {
                Ok(gradients) => contributions.push(gradients),
                Err(e) => {
                    log::warn!("skipping undecodable gradient blob {blob_id}: {e}");
                    skipped += 1;
                }
            }
        }
        if contributions.is_empty() {
            return Err(AggregationError::NoValidGradients(model_id.to_string()));
        }

        let contributor_count = contributions.len();
        let aggregate = ai::federated_average(&contributions)?;
        let encoded = ai::encode_gradients(&aggregate)?;
        let aggregate_cid = self.blobs.upload(
            encoded,
            Some("application/octet-stream".to_string()),
            json!({
                "modelId": model_id,
                "kind": "aggregate",
                "contributorCount": contributor_count,
            }),
        );
        let aggregate_uri = mesh_uri(&aggregate_cid);

        let transaction_hash =
            self.chain
                .update_model_version(model_id, &aggregate_uri, contributor_count)?;
        self.registry
            .update_model(
                model_id,
                json!({
                    "latest_aggregate_uri": aggregate_uri,
                    "last_aggregation_tx": transaction_hash,
                    "contributor_count": contributor_count,
                }),
            )
            .await?;

        log::info!(
            "aggregated {contributor_count} contributions for model {model_id} -> {aggregate_uri}"
        );
        Ok(AggregationOutcome {
            model_id: model_id.to_string(),
            aggregate_cid,
            aggregate_uri,
            transaction_hash,
            contributor_count,
            skipped_blobs: skipped,
        })
    }
}
