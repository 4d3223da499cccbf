//! Training session lifecycle endpoints.
//!
//! The same handlers serve `/api/training` and `/api/local-training`; the
//! local variant adds an extra upload route on top of this router.

use crate::ai::{self, TrainParams};
use crate::api::errors::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::db::{GradientSubmission, ModelInfo, SessionStatus, TrainingSession};
use crate::services::{mesh_uri, Control};
use axum::extract::{Multipart, Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/start", post(start_training))
        .route("/start-with-dataset", post(start_with_dataset))
        .route("/status/:session_id", get(session_status))
        .route("/pause/:session_id", post(pause_training))
        .route("/resume/:session_id", post(resume_training))
        .route("/stop/:session_id", post(stop_training))
        .route("/sessions", get(list_sessions))
        .route("/session/:session_id", get(session_detail))
        .route("/model/:model_id", get(model_info))
        .route("/model-details/:model_id", get(model_details))
        .route("/submit-gradients/:session_id", post(submit_gradients))
}

/// Start request. Field names accept both snake_case and the camelCase the
/// web client sends.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StartTrainingRequest {
    #[serde(alias = "modelType")]
    pub model_type: String,
    #[serde(alias = "modelId")]
    pub model_id: Option<String>,
    #[serde(alias = "contributorId")]
    pub contributor_id: Option<String>,
    pub epochs: usize,
    #[serde(alias = "batchSize")]
    pub batch_size: usize,
    #[serde(alias = "learningRate")]
    pub learning_rate: f64,
    pub optimizer: String,
    #[serde(alias = "validationSplit")]
    pub validation_split: f64,
    #[serde(alias = "datasetCid", alias = "datasetCID")]
    pub dataset_cid: Option<String>,
}

impl Default for StartTrainingRequest {
    fn default() -> Self {
        let params = TrainParams::default();
        Self {
            model_type: params.model_type,
            model_id: None,
            contributor_id: None,
            epochs: params.epochs,
            batch_size: params.batch_size,
            learning_rate: params.learning_rate,
            optimizer: params.optimizer,
            validation_split: params.validation_split,
            dataset_cid: None,
        }
    }
}

impl StartTrainingRequest {
    fn into_params(self) -> TrainParams {
        TrainParams {
            model_type: self.model_type,
            epochs: self.epochs,
            batch_size: self.batch_size,
            learning_rate: self.learning_rate,
            optimizer: self.optimizer,
            validation_split: self.validation_split,
            dataset_cid: self.dataset_cid,
            ..TrainParams::default()
        }
    }

    /// Apply one form field, used by the multipart start variant.
    fn apply_field(&mut self, name: &str, value: &str) {
        match name {
            "model_type" | "modelType" => self.model_type = value.to_string(),
            "model_id" | "modelId" => self.model_id = Some(value.to_string()),
            "contributor_id" | "contributorId" => self.contributor_id = Some(value.to_string()),
            "epochs" => {
                if let Ok(v) = value.parse() {
                    self.epochs = v;
                }
            }
            "batch_size" | "batchSize" => {
                if let Ok(v) = value.parse() {
                    self.batch_size = v;
                }
            }
            "learning_rate" | "learningRate" => {
                if let Ok(v) = value.parse() {
                    self.learning_rate = v;
                }
            }
            "optimizer" => self.optimizer = value.to_string(),
            "validation_split" | "validationSplit" => {
                if let Ok(v) = value.parse() {
                    self.validation_split = v;
                }
            }
            _ => log::debug!("ignoring unknown form field {name}"),
        }
    }
}

async fn create_session(
    state: &AppState,
    request: StartTrainingRequest,
) -> ApiResult<(String, String)> {
    let session_id = Uuid::new_v4().to_string();
    let model_id = request
        .model_id
        .clone()
        .unwrap_or_else(|| format!("model_{session_id}"));
    let contributor_id = request
        .contributor_id
        .clone()
        .unwrap_or_else(|| "anonymous".to_string());

    if state.registry.get_model(&model_id).await?.is_none() {
        let model = ModelInfo::new(
            model_id.clone(),
            format!("{} model", request.model_type),
            format!("Created for training session {session_id}"),
        );
        state.registry.create_model(&model).await?;
    }

    let session = TrainingSession::new(session_id.clone(), model_id.clone(), contributor_id);
    state.registry.create_training_session(&session).await?;
    state.runner.spawn(session_id.clone(), request.into_params());
    Ok((session_id, model_id))
}

pub async fn start_training(
    State(state): State<AppState>,
    Json(request): Json<StartTrainingRequest>,
) -> ApiResult<Json<Value>> {
    let (session_id, model_id) = create_session(&state, request).await?;
    Ok(Json(json!({
        "success": true,
        "session_id": session_id,
        "model_id": model_id,
        "status": "preparing",
        "message": "Training session created",
        "timestamp": Utc::now(),
    })))
}

/// Multipart start: a dataset file plus hyperparameter form fields. The
/// dataset is stored as a blob and the session trains against it.
pub async fn start_with_dataset(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let mut request = StartTrainingRequest::default();
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" || name == "dataset" {
            let filename = field.file_name().unwrap_or("dataset.csv").to_string();
            file = Some((filename, field.bytes().await?.to_vec()));
        } else {
            let value = field.text().await?;
            request.apply_field(&name, &value);
        }
    }

    let (filename, bytes) = file.ok_or_else(|| ApiError::missing_field("file"))?;
    let content = String::from_utf8(bytes.clone())
        .map_err(|_| ApiError::bad_request("dataset file is not valid UTF-8"))?;
    let validation = super::dataset::validate_content(&filename, &content);
    if !validation.is_valid {
        return Err(ApiError::with_details(
            400,
            "Dataset validation failed".to_string(),
            json!({ "errors": validation.errors }),
        ));
    }

    let size = bytes.len();
    let cid = state.blobs.upload(
        bytes,
        Some("text/plain".to_string()),
        json!({ "filename": filename, "kind": "dataset" }),
    );
    request.dataset_cid = Some(cid.clone());

    let (session_id, model_id) = create_session(&state, request).await?;
    Ok(Json(json!({
        "success": true,
        "session_id": session_id,
        "model_id": model_id,
        "status": "preparing",
        "dataset_cid": cid,
        "dataset_size": size,
        "validation": validation,
        "timestamp": Utc::now(),
    })))
}

pub async fn session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let doc = state
        .registry
        .get_training_session(&session_id)
        .await?
        .ok_or_else(|| ApiError::session_not_found(&session_id))?;
    Ok(Json(json!({
        "success": true,
        "session_id": session_id,
        "status": doc.get("status"),
        "progress": doc.get("progress"),
        "epochMetrics": doc.get("epochMetrics"),
        "result": doc.get("result"),
        "error": doc.get("error"),
    })))
}

async fn require_status(state: &AppState, session_id: &str) -> ApiResult<SessionStatus> {
    state
        .registry
        .session_status(session_id)
        .await?
        .ok_or_else(|| ApiError::session_not_found(session_id))
}

pub async fn pause_training(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let status = require_status(&state, &session_id).await?;
    if status != SessionStatus::Training {
        return Err(ApiError::invalid_transition("pause", &status.to_string()));
    }
    state
        .registry
        .update_training_session(&session_id, json!({"status": "paused"}))
        .await?;
    state.controls.signal(&session_id, Control::Pause);
    Ok(Json(json!({
        "success": true,
        "session_id": session_id,
        "status": "paused",
    })))
}

pub async fn resume_training(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let status = require_status(&state, &session_id).await?;
    if status != SessionStatus::Paused {
        return Err(ApiError::invalid_transition("resume", &status.to_string()));
    }
    state
        .registry
        .update_training_session(&session_id, json!({"status": "training"}))
        .await?;
    state.controls.signal(&session_id, Control::Run);
    Ok(Json(json!({
        "success": true,
        "session_id": session_id,
        "status": "training",
    })))
}

pub async fn stop_training(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let status = require_status(&state, &session_id).await?;
    if status.is_terminal() {
        return Err(ApiError::invalid_transition("stop", &status.to_string()));
    }
    state
        .registry
        .update_training_session(
            &session_id,
            json!({"status": "stopped", "error": "Training stopped by user"}),
        )
        .await?;
    state.controls.signal(&session_id, Control::Stop);
    Ok(Json(json!({
        "success": true,
        "session_id": session_id,
        "status": "stopped",
    })))
}

#[derive(Debug, Deserialize)]
pub struct SessionsQuery {
    #[serde(alias = "modelId")]
    pub model_id: Option<String>,
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<SessionsQuery>,
) -> ApiResult<Json<Value>> {
    let sessions = state
        .registry
        .list_training_sessions(query.model_id.as_deref())
        .await?;
    Ok(Json(json!({
        "success": true,
        "count": sessions.len(),
        "sessions": sessions,
    })))
}

pub async fn session_detail(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let doc = state
        .registry
        .get_training_session(&session_id)
        .await?
        .ok_or_else(|| ApiError::session_not_found(&session_id))?;
    Ok(Json(json!({ "success": true, "session": doc })))
}

pub async fn model_info(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let model = match state.registry.get_model(&model_id).await? {
        Some(doc) => doc,
        // unseen models get a default record rather than a 404 so the
        // frontend can render a placeholder card
        None => serde_json::to_value(ModelInfo::new(
            model_id.clone(),
            "MNIST Classifier".to_string(),
            "Default demo model".to_string(),
        ))?,
    };
    Ok(Json(json!({ "success": true, "model": model })))
}

pub async fn model_details(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let model = state
        .registry
        .get_model(&model_id)
        .await?
        .ok_or_else(|| ApiError::model_not_found(&model_id))?;
    let sessions = state
        .registry
        .list_training_sessions(Some(&model_id))
        .await?;
    let gradients = state.registry.get_gradients(&model_id).await?;
    Ok(Json(json!({
        "success": true,
        "model": model,
        "sessions": sessions,
        "gradient_count": gradients.len(),
        "chain_info": state.chain.get_model_info(&model_id),
    })))
}

/// Encode the finished session's parameters and register them as a gradient
/// contribution. Shared by the training and local-training routers.
pub async fn store_session_gradients(
    state: &AppState,
    session_id: &str,
) -> ApiResult<GradientSubmission> {
    let doc = state
        .registry
        .get_training_session(session_id)
        .await?
        .ok_or_else(|| ApiError::session_not_found(session_id))?;
    let result = doc
        .get("result")
        .filter(|v| !v.is_null())
        .ok_or_else(|| ApiError::training_not_completed(session_id))?;
    let gradients_json = result
        .get("gradients")
        .filter(|v| v.is_object())
        .ok_or_else(|| ApiError::invalid_gradient("session result has no gradients"))?;

    let gradients = ai::gradient_map_from_json(gradients_json)?;
    let bytes = ai::encode_gradients(&gradients)?;
    let size = bytes.len();
    let blob_id = state.blobs.upload(
        bytes,
        Some("application/octet-stream".to_string()),
        json!({ "session_id": session_id, "kind": "gradients" }),
    );

    let model_id = doc
        .get("model_id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let contributor_id = doc
        .get("contributor_id")
        .and_then(|v| v.as_str())
        .unwrap_or("anonymous")
        .to_string();

    let submission = GradientSubmission {
        id: Uuid::new_v4().to_string(),
        model_id,
        contributor_id,
        gradient_uri: mesh_uri(&blob_id),
        blob_id,
        size,
        timestamp: Utc::now(),
        metadata: Some(json!({ "session_id": session_id })),
    };
    state.registry.submit_gradient(&submission).await?;
    state
        .registry
        .update_training_session(
            session_id,
            json!({ "gradient_uri": submission.gradient_uri }),
        )
        .await?;
    Ok(submission)
}

pub async fn submit_gradients(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let submission = store_session_gradients(&state, &session_id).await?;
    let tx_hash = state.chain.submit_gradient(
        &submission.model_id,
        &submission.gradient_uri,
        &submission.contributor_id,
    )?;
    state
        .registry
        .update_contributor_reputation(&submission.contributor_id, 1.0)
        .await?;
    Ok(Json(json!({
        "success": true,
        "gradient_id": submission.id,
        "gradient_uri": submission.gradient_uri,
        "transaction_hash": tx_hash,
        "message": "Gradients submitted to the network",
    })))
}
