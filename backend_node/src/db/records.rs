//! Database record types for the platform collections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Lifecycle state of a training session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Preparing,
    Training,
    Paused,
    Completed,
    Failed,
    Stopped,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Stopped
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Preparing => "preparing",
            SessionStatus::Training => "training",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Batch-level progress snapshot pushed to the session document during
/// training. Field names are part of the frontend contract.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub epoch: usize,
    pub batch: usize,
    #[serde(rename = "totalBatches")]
    pub total_batches: usize,
    pub loss: f64,
    pub accuracy: f64,
    pub percentage: f64,
    #[serde(rename = "timeElapsed")]
    pub time_elapsed: i64,
    #[serde(rename = "estimatedTimeRemaining")]
    pub estimated_time_remaining: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetric {
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
    #[serde(rename = "valLoss", default, skip_serializing_if = "Option::is_none")]
    pub val_loss: Option<f64>,
    #[serde(rename = "valAccuracy", default, skip_serializing_if = "Option::is_none")]
    pub val_accuracy: Option<f64>,
    #[serde(rename = "learningRate")]
    pub learning_rate: f64,
    pub duration: f64,
    pub timestamp: DateTime<Utc>,
}

/// Final training outcome attached to a completed session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingResult {
    #[serde(rename = "modelType")]
    pub model_type: String,
    #[serde(rename = "finalLoss")]
    pub final_loss: f64,
    #[serde(rename = "finalAccuracy")]
    pub final_accuracy: f64,
    #[serde(rename = "trainingTime")]
    pub training_time: i64,
    /// Trained parameters as nested JSON arrays, keyed by parameter name.
    pub gradients: HashMap<String, Value>,
    pub stats: Value,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSession {
    pub id: String,
    pub model_id: String,
    pub contributor_id: String,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressSnapshot>,
    #[serde(rename = "epochMetrics", default)]
    pub epoch_metrics: Vec<EpochMetric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TrainingResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gradient_uri: Option<String>,
}

impl TrainingSession {
    pub fn new(id: String, model_id: String, contributor_id: String) -> Self {
        Self {
            id,
            model_id,
            contributor_id,
            status: SessionStatus::Preparing,
            start_time: Utc::now(),
            end_time: None,
            progress: None,
            epoch_metrics: Vec::new(),
            result: None,
            metrics: None,
            error: None,
            gradient_uri: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub accuracy: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ModelInfo {
    pub fn new(id: String, name: String, description: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            description,
            version: "1.0.0".to_string(),
            accuracy: 0.0,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientSubmission {
    pub id: String,
    pub model_id: String,
    pub contributor_id: String,
    pub gradient_uri: String,
    pub blob_id: String,
    pub size: usize,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contributor {
    pub id: String,
    pub address: String,
    pub reputation_score: f64,
    pub total_contributions: u64,
    pub successful_contributions: u64,
    pub last_contribution: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contributor {
    pub fn new(id: String, address: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            address,
            reputation_score: 0.0,
            total_contributions: 0,
            successful_contributions: 0,
            last_contribution: now,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Validation report produced for an uploaded dataset file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetValidation {
    #[serde(rename = "isValid")]
    pub is_valid: bool,
    #[serde(rename = "rowCount", default)]
    pub row_count: usize,
    #[serde(rename = "columnCount", default)]
    pub column_count: usize,
    #[serde(rename = "dataType", default)]
    pub data_type: String,
    #[serde(rename = "missingValues", default)]
    pub missing_values: usize,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    pub filename: String,
    pub size: usize,
    pub cid: String,
    pub validation: DatasetValidation,
    pub uploaded_by: String,
    pub uploaded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::Preparing).unwrap(),
            "\"preparing\""
        );
        let status: SessionStatus = serde_json::from_str("\"paused\"").unwrap();
        assert_eq!(status, SessionStatus::Paused);
    }

    #[test]
    fn terminal_states() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
        assert!(SessionStatus::Stopped.is_terminal());
        assert!(!SessionStatus::Training.is_terminal());
        assert!(!SessionStatus::Paused.is_terminal());
    }

    #[test]
    fn progress_uses_frontend_field_names() {
        let progress = ProgressSnapshot {
            epoch: 1,
            batch: 2,
            total_batches: 31,
            loss: 2.3,
            accuracy: 0.1,
            percentage: 6.4,
            time_elapsed: 12,
            estimated_time_remaining: 160,
        };
        let value = serde_json::to_value(&progress).unwrap();
        assert!(value.get("totalBatches").is_some());
        assert!(value.get("timeElapsed").is_some());
        assert!(value.get("estimatedTimeRemaining").is_some());
    }
}
