//! Batch training loop around [`FeedForwardNet`].

use super::model::{FeedForwardNet, ModelError};
use super::optimizer::{self, Optimizer};
use super::GradientMap;
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("invalid dataset: {0}")]
    Dataset(String),
    #[error("empty training batch")]
    EmptyBatch,
}

/// Hyperparameters for one training session. Defaults mirror the demo MNIST
/// configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainParams {
    #[serde(default = "default_model_type")]
    pub model_type: String,
    #[serde(default = "default_input_size")]
    pub input_size: usize,
    #[serde(default = "default_hidden_sizes")]
    pub hidden_sizes: Vec<usize>,
    #[serde(default = "default_num_classes")]
    pub num_classes: usize,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_optimizer")]
    pub optimizer: String,
    #[serde(default = "default_validation_split")]
    pub validation_split: f64,
    #[serde(default)]
    pub dataset_cid: Option<String>,
}

fn default_model_type() -> String {
    "mlp".to_string()
}
fn default_input_size() -> usize {
    784
}
fn default_hidden_sizes() -> Vec<usize> {
    vec![128, 64]
}
fn default_num_classes() -> usize {
    10
}
fn default_epochs() -> usize {
    10
}
fn default_batch_size() -> usize {
    32
}
fn default_learning_rate() -> f64 {
    0.001
}
fn default_optimizer() -> String {
    "adam".to_string()
}
fn default_validation_split() -> f64 {
    0.2
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            model_type: default_model_type(),
            input_size: default_input_size(),
            hidden_sizes: default_hidden_sizes(),
            num_classes: default_num_classes(),
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            learning_rate: default_learning_rate(),
            optimizer: default_optimizer(),
            validation_split: default_validation_split(),
            dataset_cid: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StepMetrics {
    pub loss: f64,
    pub accuracy: f64,
}

pub struct Trainer {
    net: FeedForwardNet,
    optimizer: Box<dyn Optimizer>,
    steps: usize,
}

impl Trainer {
    pub fn new(params: &TrainParams) -> Self {
        let net = FeedForwardNet::new(params.input_size, &params.hidden_sizes, params.num_classes);
        let optimizer = optimizer::from_name(&params.optimizer, params.learning_rate);
        Self {
            net,
            optimizer,
            steps: 0,
        }
    }

    /// Forward, backward and one optimizer step on a single batch.
    pub fn train_step(
        &mut self,
        inputs: &Array2<f64>,
        targets: &Array2<f64>,
    ) -> Result<StepMetrics, TrainError> {
        if inputs.nrows() == 0 {
            return Err(TrainError::EmptyBatch);
        }

        let activations = self.net.forward_trace(inputs);
        let output = &activations[activations.len() - 1];
        let metrics = StepMetrics {
            loss: cross_entropy(output, targets),
            accuracy: accuracy(output, targets),
        };

        let gradients = self.net.backward(&activations, targets);
        let mut params = self.net.parameters();
        self.optimizer.step(&mut params, &gradients);
        self.net.set_parameters(&params)?;
        self.steps += 1;
        Ok(metrics)
    }

    /// Loss and accuracy without touching the parameters.
    pub fn evaluate(&self, inputs: &Array2<f64>, targets: &Array2<f64>) -> StepMetrics {
        let output = self.net.forward(inputs);
        StepMetrics {
            loss: cross_entropy(&output, targets),
            accuracy: accuracy(&output, targets),
        }
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Current parameters keyed for the gradient pipeline.
    pub fn parameters(&self) -> GradientMap {
        self.net.parameters()
    }
}

/// Mean cross-entropy with predictions clipped away from 0 and 1.
fn cross_entropy(predictions: &Array2<f64>, targets: &Array2<f64>) -> f64 {
    let clipped = predictions.mapv(|p| p.clamp(1e-15, 1.0 - 1e-15));
    let per_row = (targets * &clipped.mapv(f64::ln)).sum_axis(Axis(1));
    -per_row.mean().unwrap_or(0.0)
}

/// Fraction of rows where the predicted class matches the target class.
fn accuracy(predictions: &Array2<f64>, targets: &Array2<f64>) -> f64 {
    let total = predictions.nrows();
    if total == 0 {
        return 0.0;
    }
    let correct = predictions
        .axis_iter(Axis(0))
        .zip(targets.axis_iter(Axis(0)))
        .filter(|(pred, target)| argmax(pred) == argmax(target))
        .count();
    correct as f64 / total as f64
}

fn argmax(row: &ndarray::ArrayView1<'_, f64>) -> usize {
    let mut best = 0;
    let mut best_value = f64::NEG_INFINITY;
    for (i, &v) in row.iter().enumerate() {
        if v > best_value {
            best = i;
            best_value = v;
        }
    }
    best
}

/// Parse an uploaded dataset into a feature matrix and one-hot labels.
///
/// CSV files take the last column as the label and every other column as a
/// numeric feature; the first row is treated as a header. JSON files are an
/// array of objects, either `{features: [...], target: ...}` or flat objects
/// with a `target` or `label` field and numeric features. Flat feature
/// columns are ordered by field name, so column order is stable regardless
/// of how each record is written.
pub fn load_dataset(content: &str, data_type: &str) -> Result<(Array2<f64>, Array2<f64>), TrainError> {
    let (rows, labels) = match data_type {
        "csv" => parse_csv(content)?,
        "json" => parse_json(content)?,
        other => {
            return Err(TrainError::Dataset(format!(
                "unsupported dataset type: {other}"
            )))
        }
    };
    if rows.is_empty() {
        return Err(TrainError::Dataset("dataset has no data rows".to_string()));
    }

    let width = rows[0].len();
    let mut flat = Vec::with_capacity(rows.len() * width);
    for row in &rows {
        flat.extend_from_slice(row);
    }
    let features = Array2::from_shape_vec((rows.len(), width), flat)
        .map_err(|e| TrainError::Dataset(e.to_string()))?;

    // class index = position in the sorted set of distinct labels
    let mut classes: Vec<&String> = labels.iter().collect();
    classes.sort();
    classes.dedup();
    let mut targets = Array2::zeros((labels.len(), classes.len()));
    for (i, label) in labels.iter().enumerate() {
        if let Ok(class) = classes.binary_search(&label) {
            targets[[i, class]] = 1.0;
        }
    }
    Ok((features, targets))
}

fn parse_csv(content: &str) -> Result<(Vec<Vec<f64>>, Vec<String>), TrainError> {
    let mut rows = Vec::new();
    let mut labels = Vec::new();
    for (line_no, line) in content.lines().enumerate().skip(1) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() < 2 {
            return Err(TrainError::Dataset(format!(
                "line {}: need at least one feature and a label",
                line_no + 1
            )));
        }
        let (label, feature_fields) = fields
            .split_last()
            .ok_or_else(|| TrainError::Dataset("empty row".to_string()))?;
        let features = feature_fields
            .iter()
            .map(|f| {
                f.parse::<f64>().map_err(|_| {
                    TrainError::Dataset(format!(
                        "line {}: non-numeric feature {f:?}",
                        line_no + 1
                    ))
                })
            })
            .collect::<Result<Vec<f64>, TrainError>>()?;
        if let Some(first) = rows.first() {
            let first: &Vec<f64> = first;
            if first.len() != features.len() {
                return Err(TrainError::Dataset(format!(
                    "line {}: expected {} features, got {}",
                    line_no + 1,
                    first.len(),
                    features.len()
                )));
            }
        }
        rows.push(features);
        labels.push((*label).to_string());
    }
    Ok((rows, labels))
}

fn parse_json(content: &str) -> Result<(Vec<Vec<f64>>, Vec<String>), TrainError> {
    let value: Value =
        serde_json::from_str(content).map_err(|e| TrainError::Dataset(e.to_string()))?;
    let Value::Array(items) = value else {
        return Err(TrainError::Dataset(
            "json dataset must be an array of objects".to_string(),
        ));
    };

    let mut rows = Vec::new();
    let mut labels = Vec::new();
    for (i, item) in items.iter().enumerate() {
        let Value::Object(fields) = item else {
            return Err(TrainError::Dataset(format!("record {i} is not an object")));
        };
        let (features, label) = if let Some(features) = fields.get("features") {
            let label = fields
                .get("target")
                .or_else(|| fields.get("label"))
                .ok_or_else(|| {
                    TrainError::Dataset(format!("record {i} has features but no target"))
                })?;
            (numeric_list(features, i)?, label)
        } else {
            let label = fields
                .get("target")
                .or_else(|| fields.get("label"))
                .ok_or_else(|| {
                    TrainError::Dataset(format!("record {i} has no target or label field"))
                })?;
            let features = fields
                .iter()
                .filter(|(key, _)| key.as_str() != "target" && key.as_str() != "label")
                .map(|(key, v)| {
                    v.as_f64().ok_or_else(|| {
                        TrainError::Dataset(format!("record {i}: non-numeric feature {key:?}"))
                    })
                })
                .collect::<Result<Vec<f64>, TrainError>>()?;
            (features, label)
        };
        rows.push(features);
        labels.push(label_text(label));
    }
    Ok((rows, labels))
}

fn numeric_list(value: &Value, record: usize) -> Result<Vec<f64>, TrainError> {
    let Value::Array(items) = value else {
        return Err(TrainError::Dataset(format!(
            "record {record}: features must be an array"
        )));
    };
    items
        .iter()
        .map(|v| {
            v.as_f64().ok_or_else(|| {
                TrainError::Dataset(format!("record {record}: non-numeric feature"))
            })
        })
        .collect()
}

fn label_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
