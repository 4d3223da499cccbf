//! Raw blob access.

use crate::api::errors::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::services::mesh_uri;
use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/store", post(store_blob))
        .route("/retrieve/:cid", get(retrieve_blob))
        .route("/exists/:cid", get(blob_exists))
        .route("/:cid/info", get(blob_info))
        .route("/:cid", delete(delete_blob))
}

pub async fn store_blob(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<Value>> {
    while let Some(field) = multipart.next_field().await? {
        if matches!(field.name().unwrap_or_default(), "file" | "blob") {
            let filename = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let bytes = field.bytes().await?.to_vec();
            let size = bytes.len();
            let cid = state
                .blobs
                .upload(bytes, content_type, json!({ "filename": filename }));
            return Ok(Json(json!({
                "success": true,
                "cid": cid,
                "uri": mesh_uri(&cid),
                "size": size,
                "url": format!("{}/{}", state.config.blob_endpoint, cid),
            })));
        }
    }
    Err(ApiError::missing_field("file"))
}

pub async fn retrieve_blob(
    State(state): State<AppState>,
    Path(cid): Path<String>,
) -> ApiResult<Response> {
    let bytes = state.blobs.download(&cid)?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    )
        .into_response())
}

pub async fn blob_exists(
    State(state): State<AppState>,
    Path(cid): Path<String>,
) -> ApiResult<Json<Value>> {
    Ok(Json(json!({
        "success": true,
        "cid": cid,
        "exists": state.blobs.exists(&cid),
    })))
}

pub async fn blob_info(
    State(state): State<AppState>,
    Path(cid): Path<String>,
) -> ApiResult<Json<Value>> {
    Ok(Json(json!({
        "success": true,
        "info": state.blobs.info(&cid)?,
    })))
}

pub async fn delete_blob(
    State(state): State<AppState>,
    Path(cid): Path<String>,
) -> ApiResult<Json<Value>> {
    let deleted = state.blobs.delete(&cid);
    Ok(Json(json!({
        "success": deleted,
        "cid": cid,
    })))
}
