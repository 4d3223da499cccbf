//! Local-training alias of the session endpoints, plus an upload route that
//! pushes a finished session's gradients to blob storage without touching
//! the chain.

use super::training;
use crate::api::errors::ApiResult;
use crate::api::server::AppState;
use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

pub fn router() -> Router<AppState> {
    training::router().route("/upload-gradients/:session_id", post(upload_gradients))
}

pub async fn upload_gradients(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let submission = training::store_session_gradients(&state, &session_id).await?;
    Ok(Json(json!({
        "success": true,
        "status": "uploaded",
        "cid": submission.blob_id,
        "uri": submission.gradient_uri,
        "url": format!("{}/{}", state.config.blob_endpoint, submission.blob_id),
        "size": submission.size,
    })))
}
