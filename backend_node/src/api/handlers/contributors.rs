//! Contributor reputation endpoints.

use crate::api::errors::ApiResult;
use crate::api::server::AppState;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/leaderboard", get(leaderboard))
        .route("/:contributor_id", get(get_contributor))
        .route("/:contributor_id/stats", get(contributor_stats))
}

fn placeholder_contributor(contributor_id: &str) -> Value {
    json!({
        "id": contributor_id,
        "address": format!("0x{}", contributor_id.replace('-', "")),
        "reputation_score": 0.0,
        "total_contributions": 0,
        "successful_contributions": 0,
    })
}

pub async fn leaderboard(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let mut contributors = state
        .registry
        .store()
        .list(crate::db::collections::CONTRIBUTORS, None)
        .await?;
    contributors.sort_by(|a, b| {
        let score = |c: &Value| {
            c.get("reputation_score")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0)
        };
        score(b).partial_cmp(&score(a)).unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(Json(json!({
        "success": true,
        "count": contributors.len(),
        "leaderboard": contributors,
    })))
}

pub async fn get_contributor(
    State(state): State<AppState>,
    Path(contributor_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let contributor = state
        .registry
        .get_contributor(&contributor_id)
        .await?
        .unwrap_or_else(|| placeholder_contributor(&contributor_id));
    Ok(Json(json!({ "success": true, "contributor": contributor })))
}

pub async fn contributor_stats(
    State(state): State<AppState>,
    Path(contributor_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let contributor = state
        .registry
        .get_contributor(&contributor_id)
        .await?
        .unwrap_or_else(|| placeholder_contributor(&contributor_id));
    let datasets = state.registry.datasets_by_contributor(&contributor_id).await?;
    Ok(Json(json!({
        "success": true,
        "contributor": contributor,
        "datasets_uploaded": datasets.len(),
        "chain_stats": state.chain.get_contributor_stats(&contributor_id),
    })))
}
