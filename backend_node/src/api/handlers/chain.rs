//! Direct chain-client endpoints.

use crate::api::errors::{ApiError, ApiResult};
use crate::api::server::AppState;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/submit-gradient", post(submit_gradient))
        .route("/update-model", post(update_model))
        .route("/model-info/:model_id", get(model_info))
}

#[derive(Debug, Deserialize)]
pub struct SubmitGradientRequest {
    #[serde(alias = "modelId")]
    pub model_id: String,
    #[serde(alias = "gradientUri")]
    pub gradient_uri: String,
    #[serde(alias = "contributorId")]
    pub contributor_id: String,
}

pub async fn submit_gradient(
    State(state): State<AppState>,
    Json(request): Json<SubmitGradientRequest>,
) -> ApiResult<Json<Value>> {
    let tx_hash = state.chain.submit_gradient(
        &request.model_id,
        &request.gradient_uri,
        &request.contributor_id,
    )?;
    Ok(Json(json!({
        "success": true,
        "transaction_hash": tx_hash,
        "model_id": request.model_id,
    })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateModelRequest {
    #[serde(alias = "modelId")]
    pub model_id: String,
    #[serde(alias = "aggregateUri")]
    pub aggregate_uri: String,
    #[serde(alias = "contributorCount", default)]
    pub contributor_count: usize,
}

pub async fn update_model(
    State(state): State<AppState>,
    Json(request): Json<UpdateModelRequest>,
) -> ApiResult<Json<Value>> {
    if request.model_id.is_empty() {
        return Err(ApiError::missing_field("model_id"));
    }
    let tx_hash = state.chain.update_model_version(
        &request.model_id,
        &request.aggregate_uri,
        request.contributor_count,
    )?;
    Ok(Json(json!({
        "success": true,
        "transaction_hash": tx_hash,
        "model_id": request.model_id,
    })))
}

pub async fn model_info(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> ApiResult<Json<Value>> {
    Ok(Json(json!({
        "success": true,
        "info": state.chain.get_model_info(&model_id),
    })))
}
