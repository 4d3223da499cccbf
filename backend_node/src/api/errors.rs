//! API error handling for the training platform.

use crate::ai::{AggregateError, CodecError, TrainError};
use crate::db::DbError;
use crate::services::{AggregationError, BlobError, ChainError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Error envelope returned by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: u16,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub timestamp: u64,
}

impl ApiError {
    pub fn new(code: u16, message: String) -> Self {
        Self {
            code,
            message,
            details: None,
            timestamp: chrono::Utc::now().timestamp() as u64,
        }
    }

    pub fn with_details(code: u16, message: String, details: serde_json::Value) -> Self {
        Self {
            code,
            message,
            details: Some(details),
            timestamp: chrono::Utc::now().timestamp() as u64,
        }
    }

    // Common error constructors
    pub fn bad_request(message: &str) -> Self {
        Self::new(400, message.to_string())
    }

    pub fn not_found(message: &str) -> Self {
        Self::new(404, message.to_string())
    }

    pub fn unprocessable_entity(message: &str) -> Self {
        Self::new(422, message.to_string())
    }

    pub fn internal_server_error(message: &str) -> Self {
        Self::new(500, message.to_string())
    }

    pub fn service_unavailable(message: &str) -> Self {
        Self::new(503, message.to_string())
    }

    // Platform-specific errors
    pub fn session_not_found(session_id: &str) -> Self {
        Self::with_details(
            404,
            "Training session not found".to_string(),
            serde_json::json!({
                "session_id": session_id
            }),
        )
    }

    pub fn model_not_found(model_id: &str) -> Self {
        Self::with_details(
            404,
            "Model not found".to_string(),
            serde_json::json!({
                "model_id": model_id
            }),
        )
    }

    pub fn blob_not_found(cid: &str) -> Self {
        Self::with_details(
            404,
            "Blob not found".to_string(),
            serde_json::json!({
                "cid": cid
            }),
        )
    }

    pub fn invalid_transition(action: &str, current_status: &str) -> Self {
        Self::with_details(
            400,
            format!("Cannot {action} session in its current state"),
            serde_json::json!({
                "action": action,
                "current_status": current_status
            }),
        )
    }

    pub fn training_not_completed(session_id: &str) -> Self {
        Self::with_details(
            400,
            "Training has not produced a result yet".to_string(),
            serde_json::json!({
                "session_id": session_id
            }),
        )
    }

    pub fn invalid_gradient(reason: &str) -> Self {
        Self::with_details(
            400,
            "Invalid gradient payload".to_string(),
            serde_json::json!({
                "reason": reason
            }),
        )
    }

    pub fn missing_field(field: &str) -> Self {
        Self::with_details(
            422,
            "Missing required field".to_string(),
            serde_json::json!({
                "field": field
            }),
        )
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "API Error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

impl From<DbError> for ApiError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(what) => Self::not_found(&format!("Not found: {what}")),
            other => Self::internal_server_error(&other.to_string()),
        }
    }
}

impl From<BlobError> for ApiError {
    fn from(e: BlobError) -> Self {
        match e {
            BlobError::NotFound(cid) => Self::blob_not_found(&cid),
        }
    }
}

impl From<ChainError> for ApiError {
    fn from(e: ChainError) -> Self {
        Self::unprocessable_entity(&e.to_string())
    }
}

impl From<CodecError> for ApiError {
    fn from(e: CodecError) -> Self {
        Self::invalid_gradient(&e.to_string())
    }
}

impl From<AggregateError> for ApiError {
    fn from(e: AggregateError) -> Self {
        Self::bad_request(&e.to_string())
    }
}

impl From<TrainError> for ApiError {
    fn from(e: TrainError) -> Self {
        Self::bad_request(&e.to_string())
    }
}

impl From<AggregationError> for ApiError {
    fn from(e: AggregationError) -> Self {
        match e {
            AggregationError::NoSubmissions(model_id) => Self::with_details(
                404,
                "No gradient submissions for model".to_string(),
                serde_json::json!({ "model_id": model_id }),
            ),
            AggregationError::NoValidGradients(model_id) => Self::with_details(
                422,
                "No decodable gradient blobs for model".to_string(),
                serde_json::json!({ "model_id": model_id }),
            ),
            AggregationError::Db(e) => e.into(),
            AggregationError::Chain(e) => e.into(),
            AggregationError::Aggregate(e) => e.into(),
            AggregationError::Codec(e) => e.into(),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::internal_server_error(&format!("serialization error: {e}"))
    }
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(e: axum::extract::multipart::MultipartError) -> Self {
        Self::bad_request(&format!("invalid multipart body: {e}"))
    }
}
