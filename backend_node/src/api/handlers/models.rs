//! Model registry endpoints.

use crate::api::errors::ApiResult;
use crate::api::server::AppState;
use crate::db::ModelInfo;
use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_models))
        .route("/:model_id", get(get_model))
        .route("/:model_id/versions", get(model_versions))
        .route("/:model_id/versions/:version", get(model_version))
        .route("/:model_id/leaderboard", get(model_leaderboard))
}

pub async fn list_models(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let models = state.registry.list_models().await?;
    Ok(Json(json!({
        "success": true,
        "count": models.len(),
        "models": models,
    })))
}

pub async fn get_model(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let model = match state.registry.get_model(&model_id).await? {
        Some(doc) => doc,
        None => serde_json::to_value(ModelInfo::new(
            model_id.clone(),
            "MNIST Classifier".to_string(),
            "Default demo model".to_string(),
        ))?,
    };
    Ok(Json(json!({ "success": true, "model": model })))
}

pub async fn model_versions(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let model = state.registry.get_model(&model_id).await?;
    let current = model
        .as_ref()
        .and_then(|m| m.get("version"))
        .and_then(|v| v.as_str())
        .unwrap_or("1.0.0")
        .to_string();
    let accuracy = model
        .as_ref()
        .and_then(|m| m.get("accuracy"))
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);
    Ok(Json(json!({
        "success": true,
        "model_id": model_id,
        "current_version": current,
        "versions": [
            {
                "version": current,
                "accuracy": accuracy,
                "status": "active",
            }
        ],
    })))
}

pub async fn model_version(
    State(state): State<AppState>,
    Path((model_id, version)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let model = state.registry.get_model(&model_id).await?;
    let current = model
        .as_ref()
        .and_then(|m| m.get("version"))
        .and_then(|v| v.as_str())
        .unwrap_or("1.0.0");
    if version != current {
        return Err(crate::api::errors::ApiError::with_details(
            404,
            "Model version not found".to_string(),
            json!({ "model_id": model_id, "version": version }),
        ));
    }
    let accuracy = model
        .as_ref()
        .and_then(|m| m.get("accuracy"))
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);
    Ok(Json(json!({
        "success": true,
        "model_id": model_id,
        "version": version,
        "accuracy": accuracy,
        "status": "active",
    })))
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

pub async fn model_leaderboard(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
    Query(query): Query<LeaderboardQuery>,
) -> ApiResult<Json<Value>> {
    let leaderboard = state.chain.get_model_leaderboard(&model_id, query.limit);
    Ok(Json(json!({
        "success": true,
        "model_id": model_id,
        "leaderboard": leaderboard,
    })))
}
