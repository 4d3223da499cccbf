//! Dataset validation and upload.

use crate::api::errors::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::db::{Dataset, DatasetValidation};
use axum::extract::{Multipart, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

const MAX_REPORTED_ERRORS: usize = 10;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/validate", post(validate_dataset))
        .route("/upload", post(upload_dataset))
        .route("/list", get(list_datasets))
}

/// Validate by file extension, falling back to sniffing the content when
/// the extension is unrecognized.
pub fn validate_content(filename: &str, content: &str) -> DatasetValidation {
    let extension = filename.rsplit('.').next().unwrap_or_default();
    match extension.to_ascii_lowercase().as_str() {
        "csv" => validate_csv_content(content),
        "json" => validate_json_content(content),
        other => {
            let head = content.trim_start();
            if head.starts_with('[') || head.starts_with('{') {
                validate_json_content(content)
            } else if content.contains(',') {
                validate_csv_content(content)
            } else {
                DatasetValidation {
                    is_valid: false,
                    row_count: 0,
                    column_count: 0,
                    data_type: other.to_string(),
                    missing_values: 0,
                    columns: Vec::new(),
                    errors: vec![format!("unsupported file type: .{other}")],
                }
            }
        }
    }
}

/// CSV check: a header row, consistent column counts, at least one data row.
pub fn validate_csv_content(content: &str) -> DatasetValidation {
    let mut lines = content.lines().filter(|l| !l.trim().is_empty());
    let Some(header) = lines.next() else {
        return DatasetValidation {
            is_valid: false,
            row_count: 0,
            column_count: 0,
            data_type: "csv".to_string(),
            missing_values: 0,
            columns: Vec::new(),
            errors: vec!["file is empty".to_string()],
        };
    };

    let columns: Vec<String> = header.split(',').map(|c| c.trim().to_string()).collect();
    let mut errors = Vec::new();
    if columns.len() < 2 {
        errors.push("need at least one feature column and a label column".to_string());
    }

    let mut row_count = 0;
    let mut missing_values = 0;
    for (line_no, line) in lines.enumerate() {
        row_count += 1;
        let fields: Vec<&str> = line.split(',').collect();
        missing_values += fields.iter().filter(|f| f.trim().is_empty()).count();
        if fields.len() != columns.len() && errors.len() < MAX_REPORTED_ERRORS {
            errors.push(format!(
                "line {}: expected {} columns, found {}",
                line_no + 2,
                columns.len(),
                fields.len()
            ));
        }
    }
    if row_count == 0 {
        errors.push("no data rows after the header".to_string());
    }

    DatasetValidation {
        is_valid: errors.is_empty(),
        row_count,
        column_count: columns.len(),
        data_type: "csv".to_string(),
        missing_values,
        columns,
        errors,
    }
}

/// JSON check: an array of flat objects sharing the first record's keys.
pub fn validate_json_content(content: &str) -> DatasetValidation {
    let invalid = |errors: Vec<String>| DatasetValidation {
        is_valid: false,
        row_count: 0,
        column_count: 0,
        data_type: "json".to_string(),
        missing_values: 0,
        columns: Vec::new(),
        errors,
    };

    let value: Value = match serde_json::from_str(content) {
        Ok(value) => value,
        Err(e) => return invalid(vec![format!("invalid JSON: {e}")]),
    };
    let Value::Array(items) = value else {
        return invalid(vec!["top-level value must be an array".to_string()]);
    };
    if items.is_empty() {
        return invalid(vec!["array is empty".to_string()]);
    }

    let columns: Vec<String> = match &items[0] {
        Value::Object(fields) => fields.keys().cloned().collect(),
        _ => return invalid(vec!["records must be objects".to_string()]),
    };

    let mut errors = Vec::new();
    let mut missing_values = 0;
    for (i, item) in items.iter().enumerate() {
        match item {
            Value::Object(fields) => {
                missing_values += fields.values().filter(|v| v.is_null()).count();
                if fields.len() != columns.len() && errors.len() < MAX_REPORTED_ERRORS {
                    errors.push(format!(
                        "record {i}: expected {} fields, found {}",
                        columns.len(),
                        fields.len()
                    ));
                }
            }
            _ => {
                if errors.len() < MAX_REPORTED_ERRORS {
                    errors.push(format!("record {i} is not an object"));
                }
            }
        }
    }

    DatasetValidation {
        is_valid: errors.is_empty(),
        row_count: items.len(),
        column_count: columns.len(),
        data_type: "json".to_string(),
        missing_values,
        columns,
        errors,
    }
}

async fn read_file(multipart: &mut Multipart) -> ApiResult<(String, Vec<u8>, Option<String>)> {
    let mut uploaded_by = None;
    while let Some(field) = multipart.next_field().await? {
        match field.name().unwrap_or_default() {
            "file" | "dataset" => {
                let filename = field.file_name().unwrap_or("dataset.csv").to_string();
                return Ok((filename, field.bytes().await?.to_vec(), uploaded_by));
            }
            "contributor_id" | "contributorId" => {
                uploaded_by = Some(field.text().await?);
            }
            _ => {}
        }
    }
    Err(ApiError::missing_field("file"))
}

pub async fn validate_dataset(mut multipart: Multipart) -> ApiResult<Json<Value>> {
    let (filename, bytes, _) = read_file(&mut multipart).await?;
    let validation = match String::from_utf8(bytes) {
        Ok(content) => validate_content(&filename, &content),
        Err(_) => DatasetValidation {
            is_valid: false,
            row_count: 0,
            column_count: 0,
            data_type: String::new(),
            missing_values: 0,
            columns: Vec::new(),
            errors: vec!["file is not valid UTF-8".to_string()],
        },
    };
    Ok(Json(json!({
        "success": validation.is_valid,
        "filename": filename,
        "validation": validation,
    })))
}

pub async fn upload_dataset(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let (filename, bytes, uploaded_by) = read_file(&mut multipart).await?;
    let content = String::from_utf8(bytes.clone())
        .map_err(|_| ApiError::bad_request("dataset file is not valid UTF-8"))?;
    let validation = validate_content(&filename, &content);
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
    let dataset = Dataset {
        id: Uuid::new_v4().to_string(),
        filename: filename.clone(),
        size,
        cid: cid.clone(),
        validation: validation.clone(),
        uploaded_by: uploaded_by.unwrap_or_else(|| "anonymous".to_string()),
        uploaded_at: Utc::now(),
        content_type: Some("text/plain".to_string()),
        metadata: None,
    };
    state.registry.create_dataset(&dataset).await?;

    Ok(Json(json!({
        "success": true,
        "dataset_id": dataset.id,
        "cid": cid,
        "url": format!("{}/{}", state.config.blob_endpoint, cid),
        "validation": validation,
        "timestamp": Utc::now(),
    })))
}

pub async fn list_datasets(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let datasets = state.registry.list_datasets().await?;
    Ok(Json(json!({
        "success": true,
        "count": datasets.len(),
        "datasets": datasets,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_csv_passes() {
        let report = validate_csv_content("a,b,label\n1,2,x\n3,4,y\n");
        assert!(report.is_valid);
        assert_eq!(report.row_count, 2);
        assert_eq!(report.columns, vec!["a", "b", "label"]);
    }

    #[test]
    fn ragged_csv_fails_with_line_numbers() {
        let report = validate_csv_content("a,b,label\n1,2,x\n3,4\n");
        assert!(!report.is_valid);
        assert!(report.errors[0].contains("line 3"));
    }

    #[test]
    fn empty_csv_fails() {
        assert!(!validate_csv_content("").is_valid);
        assert!(!validate_csv_content("a,b,label\n").is_valid);
    }

    #[test]
    fn valid_json_passes() {
        let report = validate_json_content(r#"[{"x": 1, "y": 0}, {"x": 2, "y": 1}]"#);
        assert!(report.is_valid);
        assert_eq!(report.row_count, 2);
        assert_eq!(report.column_count, 2);
    }

    #[test]
    fn json_rejects_non_arrays_and_mixed_records() {
        assert!(!validate_json_content(r#"{"x": 1}"#).is_valid);
        assert!(!validate_json_content("not json").is_valid);
        assert!(!validate_json_content(r#"[{"x": 1}, {"x": 1, "y": 2}]"#).is_valid);
    }

    #[test]
    fn missing_values_are_counted() {
        let report = validate_csv_content("a,b,label\n1,,x\n,,y\n");
        assert!(report.is_valid);
        assert_eq!(report.missing_values, 3);

        let report = validate_json_content(r#"[{"x": null, "y": 1}]"#);
        assert!(report.is_valid);
        assert_eq!(report.missing_values, 1);
    }

    #[test]
    fn extension_dispatch_with_content_sniffing() {
        assert_eq!(validate_content("d.csv", "a,b\n1,2\n").data_type, "csv");
        assert_eq!(validate_content("d.json", "[]").data_type, "json");
        // unknown extensions fall back to sniffing
        assert_eq!(
            validate_content("d.data", r#"[{"x": 1, "y": 0}]"#).data_type,
            "json"
        );
        assert_eq!(validate_content("d.txt", "a,b\n1,2\n").data_type, "csv");
        assert!(!validate_content("d.parquet", "").is_valid);
    }
}
