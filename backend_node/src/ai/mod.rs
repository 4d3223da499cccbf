//! Neural-network training and gradient aggregation.
//!
//! Gradients and model parameters are maps from parameter name to an
//! n-dimensional f64 array. The same map shape flows through the trainer,
//! the federated averaging operators and the binary gradient codec.

use ndarray::{ArrayD, IxDyn};
use serde_json::Value;
use std::collections::HashMap;

pub mod aggregator;
pub mod codec;
pub mod model;
pub mod optimizer;
pub mod trainer;

pub use aggregator::{
    clipped_federated_average, federated_average, momentum_federated_average,
    weighted_federated_average, AggregateError,
};
pub use codec::{decode_gradients, encode_gradients, validate_gradients, CodecError};
pub use model::{FeedForwardNet, ModelError};
pub use trainer::{StepMetrics, TrainError, TrainParams, Trainer};

/// Parameter name -> n-dimensional gradient (or weight) array.
pub type GradientMap = HashMap<String, ArrayD<f64>>;

/// Render an array as nested JSON lists, matching the wire shape the
/// frontend and the document store expect.
pub fn array_to_json(array: &ArrayD<f64>) -> Value {
    fn go(view: ndarray::ArrayViewD<'_, f64>) -> Value {
        if view.ndim() == 0 {
            return view
                .iter()
                .next()
                .copied()
                .map(|v| serde_json::json!(v))
                .unwrap_or(Value::Null);
        }
        Value::Array(
            view.axis_iter(ndarray::Axis(0))
                .map(|sub| go(sub))
                .collect(),
        )
    }
    go(array.view())
}

/// Parse nested JSON lists back into an array. Ragged or non-numeric input
/// is rejected.
pub fn json_to_array(value: &Value) -> Result<ArrayD<f64>, CodecError> {
    let mut shape = Vec::new();
    let mut cursor = value;
    while let Value::Array(items) = cursor {
        shape.push(items.len());
        match items.first() {
            Some(first) => cursor = first,
            None => break,
        }
    }

    let mut data = Vec::new();
    flatten_into(value, &mut data, &shape, 0)?;
    ArrayD::from_shape_vec(IxDyn(&shape), data)
        .map_err(|e| CodecError::Shape(e.to_string()))
}

fn flatten_into(
    value: &Value,
    out: &mut Vec<f64>,
    shape: &[usize],
    depth: usize,
) -> Result<(), CodecError> {
    match value {
        Value::Array(items) => {
            if depth >= shape.len() || items.len() != shape[depth] {
                return Err(CodecError::Shape("ragged nested array".to_string()));
            }
            for item in items {
                flatten_into(item, out, shape, depth + 1)?;
            }
            Ok(())
        }
        Value::Number(n) => {
            if depth != shape.len() {
                return Err(CodecError::Shape("ragged nested array".to_string()));
            }
            out.push(n.as_f64().ok_or_else(|| {
                CodecError::Shape(format!("non-finite numeric value: {n}"))
            })?);
            Ok(())
        }
        other => Err(CodecError::Shape(format!(
            "expected number or array, got {other}"
        ))),
    }
}

/// Convert a full gradient map to a JSON object of nested lists.
pub fn gradient_map_to_json(gradients: &GradientMap) -> HashMap<String, Value> {
    gradients
        .iter()
        .map(|(k, v)| (k.clone(), array_to_json(v)))
        .collect()
}

/// Parse a JSON object of nested lists into a gradient map.
pub fn gradient_map_from_json(value: &Value) -> Result<GradientMap, CodecError> {
    let Value::Object(fields) = value else {
        return Err(CodecError::Shape("gradient payload must be an object".to_string()));
    };
    fields
        .iter()
        .map(|(k, v)| Ok((k.clone(), json_to_array(v)?)))
        .collect()
}
