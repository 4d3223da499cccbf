//! End-to-end tests against the full router.

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use neuromesh_backend::api::{create_router, AppState};
use neuromesh_backend::config::Config;
use serde_json::{json, Value};
use tokio::time::{sleep, timeout, Duration};
use tower::ServiceExt;

fn test_app() -> Router {
    let config = Config {
        batch_pace_ms: 0,
        ..Config::default()
    };
    create_router(AppState::new(config))
}

async fn request(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(serde_json::to_vec(&value).unwrap())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn quick_training_request() -> Value {
    json!({
        "modelType": "mlp",
        "epochs": 1,
        "batchSize": 500,
        "learningRate": 0.01,
        "optimizer": "sgd",
    })
}

async fn wait_for_status(app: &Router, session_id: &str, wanted: &str) -> Value {
    loop {
        let (status, body) = request(
            app,
            Method::GET,
            &format!("/api/training/status/{session_id}"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] == wanted {
            return body;
        }
        if body["status"] == "failed" {
            panic!("session failed: {}", body["error"]);
        }
        sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn health_and_root_respond() {
    let app = test_app();
    let (status, body) = request(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = request(&app, Method::GET, "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "running");
}

#[tokio::test]
async fn training_session_runs_to_completion() {
    let app = test_app();
    let (status, body) = request(
        &app,
        Method::POST,
        "/api/training/start",
        Some(quick_training_request()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let session_id = body["session_id"].as_str().unwrap().to_string();
    let model_id = body["model_id"].as_str().unwrap().to_string();

    let body = timeout(
        Duration::from_secs(60),
        wait_for_status(&app, &session_id, "completed"),
    )
    .await
    .expect("session did not complete in time");
    let result = &body["result"];
    assert!(result["finalLoss"].as_f64().unwrap().is_finite());
    assert!(result["gradients"]["layer_0_weights"].is_array());
    assert!(!body["epochMetrics"].as_array().unwrap().is_empty());

    // completed sessions reject further control actions
    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/api/training/pause/{session_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"]["current_status"], "completed");

    // the model accuracy was updated from the final epoch
    let (status, body) = request(
        &app,
        Method::GET,
        &format!("/api/models/{model_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["model"]["accuracy"].as_f64().is_some());
}

#[tokio::test]
async fn pause_resume_stop_flow() {
    let app = test_app();
    let mut start = quick_training_request();
    start["epochs"] = json!(100);
    start["batchSize"] = json!(16);
    let (_, body) = request(&app, Method::POST, "/api/training/start", Some(start)).await;
    let session_id = body["session_id"].as_str().unwrap().to_string();

    timeout(
        Duration::from_secs(60),
        wait_for_status(&app, &session_id, "training"),
    )
    .await
    .expect("session never started training");

    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/api/training/pause/{session_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "paused");

    // pausing twice is rejected
    let (status, _) = request(
        &app,
        Method::POST,
        &format!("/api/training/pause/{session_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/api/training/resume/{session_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "training");

    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/api/training/stop/{session_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "stopped");

    let body = timeout(
        Duration::from_secs(60),
        wait_for_status(&app, &session_id, "stopped"),
    )
    .await
    .unwrap();
    assert_eq!(body["error"], "Training stopped by user");
}

#[tokio::test]
async fn unknown_session_returns_error_envelope() {
    let app = test_app();
    let (status, body) = request(&app, Method::GET, "/api/training/status/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 404);
    assert_eq!(body["details"]["session_id"], "nope");
    assert!(body["timestamp"].as_u64().is_some());
}

#[tokio::test]
async fn local_training_alias_serves_the_same_surface() {
    let app = test_app();
    let (status, body) = request(
        &app,
        Method::POST,
        "/api/local-training/start",
        Some(quick_training_request()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let session_id = body["session_id"].as_str().unwrap().to_string();

    timeout(
        Duration::from_secs(60),
        wait_for_status(&app, &session_id, "completed"),
    )
    .await
    .unwrap();

    // the alias-only upload route stores the finished gradients as a blob
    let (status, body) = request(
        &app,
        Method::POST,
        &format!("/api/local-training/upload-gradients/{session_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "uploaded");
    let cid = body["cid"].as_str().unwrap().to_string();

    let (status, body) = request(&app, Method::GET, &format!("/api/blobs/{cid}/info"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["info"]["size"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn demo_training_is_deterministic() {
    let app = test_app();
    let req = json!({ "modelType": "mlp", "epochs": 5, "participants": 3 });
    let (status, first) = request(&app, Method::POST, "/api/demo/run-training", Some(req.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let (_, second) = request(&app, Method::POST, "/api/demo/run-training", Some(req)).await;
    assert_eq!(first, second);
    assert_eq!(first["participants"], 3);
    assert_eq!(first["aggregatedLayers"], 6);

    let other = json!({ "modelType": "mlp", "epochs": 5, "participants": 4 });
    let (_, third) = request(&app, Method::POST, "/api/demo/run-training", Some(other)).await;
    assert_ne!(first["finalAccuracy"], third["finalAccuracy"]);

    let bad = json!({ "participants": 0 });
    let (status, _) = request(&app, Method::POST, "/api/demo/run-training", Some(bad)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

fn multipart_body(boundary: &str, filename: &str, content: &str) -> Vec<u8> {
    format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
         Content-Type: text/csv\r\n\r\n\
         {content}\r\n\
         --{boundary}--\r\n"
    )
    .into_bytes()
}

#[tokio::test]
async fn dataset_validate_and_upload() {
    let app = test_app();
    let boundary = "X-NEUROMESH-BOUNDARY";
    let csv = "f1,f2,label\n1.0,2.0,cat\n3.0,4.0,dog\n";

    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/dataset/validate")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(multipart_body(boundary, "data.csv", csv)))
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["validation"]["isValid"], true);
    assert_eq!(body["validation"]["rowCount"], 2);

    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/dataset/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(multipart_body(boundary, "data.csv", csv)))
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["success"], true);
    let cid = body["cid"].as_str().unwrap();
    assert!(cid.starts_with("0x"));

    let (status, body) = request(&app, Method::GET, "/api/dataset/list", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);

    // a ragged file is rejected with the validation errors attached
    let bad = "f1,f2,label\n1.0,2.0\n";
    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/dataset/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(multipart_body(boundary, "bad.csv", bad)))
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
