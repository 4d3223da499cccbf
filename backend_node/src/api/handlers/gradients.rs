//! Encoded gradient blob upload, download and aggregation.

use crate::ai;
use crate::api::errors::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::db::GradientSubmission;
use crate::services::mesh_uri;
use axum::body::Bytes;
use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload_gradient))
        .route("/download/:blob_id", get(download_gradient))
        .route("/list/:model_id", get(list_gradients))
        .route("/aggregate/:model_id", post(aggregate_gradients))
}

/// Multipart upload of a pre-encoded gradient blob plus identifying fields.
pub async fn upload_gradient(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let mut model_id = None;
    let mut contributor_id = None;
    let mut payload: Option<Bytes> = None;

    while let Some(field) = multipart.next_field().await? {
        match field.name().unwrap_or_default() {
            "model_id" | "modelId" => model_id = Some(field.text().await?),
            "contributor_id" | "contributorId" => contributor_id = Some(field.text().await?),
            "gradient_file" | "file" => payload = Some(field.bytes().await?),
            other => log::debug!("ignoring unknown multipart field {other}"),
        }
    }

    let model_id = model_id.ok_or_else(|| ApiError::missing_field("model_id"))?;
    let contributor_id = contributor_id.ok_or_else(|| ApiError::missing_field("contributor_id"))?;
    let payload = payload.ok_or_else(|| ApiError::missing_field("gradient_file"))?;

    let decoded = ai::decode_gradients(&payload)?;
    let size = payload.len();
    let blob_id = state.blobs.upload(
        payload.to_vec(),
        Some("application/octet-stream".to_string()),
        json!({ "model_id": model_id, "kind": "gradients", "layers": decoded.len() }),
    );

    let submission = GradientSubmission {
        id: Uuid::new_v4().to_string(),
        model_id: model_id.clone(),
        contributor_id: contributor_id.clone(),
        gradient_uri: mesh_uri(&blob_id),
        blob_id,
        size,
        timestamp: Utc::now(),
        metadata: Some(json!({ "parameter_count": decoded.values().map(|g| g.len()).sum::<usize>() })),
    };
    state.registry.submit_gradient(&submission).await?;
    state
        .registry
        .update_contributor_reputation(&contributor_id, 1.0)
        .await?;

    Ok(Json(json!({
        "success": true,
        "status": "uploaded",
        "gradient_id": submission.id,
        "gradient_uri": submission.gradient_uri,
        "model_id": model_id,
        "contributor_id": contributor_id,
        "size": size,
    })))
}

pub async fn download_gradient(
    State(state): State<AppState>,
    Path(blob_id): Path<String>,
) -> ApiResult<Response> {
    let bytes = state.blobs.download(&blob_id)?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    )
        .into_response())
}

pub async fn list_gradients(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let gradients = state.registry.get_gradients(&model_id).await?;
    Ok(Json(json!({
        "success": true,
        "model_id": model_id,
        "count": gradients.len(),
        "gradients": gradients,
    })))
}

pub async fn aggregate_gradients(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let outcome = state.aggregation().aggregate_model_gradients(&model_id).await?;
    Ok(Json(json!({
        "success": true,
        "outcome": outcome,
    })))
}
