//! Fully connected network used by the demo trainers.
//!
//! Hidden layers use ReLU, the output layer softmax. Parameters are exposed
//! as a [`GradientMap`] keyed `layer_{i}_weights` / `layer_{i}_biases` so
//! they can flow straight into the aggregation and codec paths.

use super::GradientMap;
use ndarray::{Array2, Axis, Ix2};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),
    #[error("parameter {name} has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
}

pub struct FeedForwardNet {
    weights: Vec<Array2<f64>>,
    /// Row vectors, shape (1, layer_size), broadcast over the batch.
    biases: Vec<Array2<f64>>,
}

impl FeedForwardNet {
    /// Build a network with the given layer widths. Weights start at small
    /// random values, biases at zero.
    pub fn new(input_size: usize, hidden_sizes: &[usize], output_size: usize) -> Self {
        let mut sizes = vec![input_size];
        sizes.extend_from_slice(hidden_sizes);
        sizes.push(output_size);

        let mut weights = Vec::with_capacity(sizes.len() - 1);
        let mut biases = Vec::with_capacity(sizes.len() - 1);
        for window in sizes.windows(2) {
            let (fan_in, fan_out) = (window[0], window[1]);
            weights.push(Array2::random((fan_in, fan_out), StandardNormal) * 0.01);
            biases.push(Array2::zeros((1, fan_out)));
        }
        Self { weights, biases }
    }

    pub fn num_layers(&self) -> usize {
        self.weights.len()
    }

    /// Forward pass returning only the softmax output.
    pub fn forward(&self, input: &Array2<f64>) -> Array2<f64> {
        let activations = self.forward_trace(input);
        activations
            .into_iter()
            .next_back()
            .unwrap_or_else(|| input.clone())
    }

    /// Forward pass keeping every layer activation. `result[0]` is the input
    /// and `result[last]` the softmax output; the intermediate entries are
    /// what the backward pass needs for the ReLU masks.
    pub fn forward_trace(&self, input: &Array2<f64>) -> Vec<Array2<f64>> {
        let mut activations = Vec::with_capacity(self.weights.len() + 1);
        activations.push(input.clone());

        let last = self.weights.len() - 1;
        for (i, (w, b)) in self.weights.iter().zip(&self.biases).enumerate() {
            let z = activations[i].dot(w) + b;
            let a = if i == last {
                softmax(&z)
            } else {
                z.mapv(|v| v.max(0.0))
            };
            activations.push(a);
        }
        activations
    }

    /// Backward pass for softmax output with cross-entropy loss.
    ///
    /// The output delta is `softmax - targets`; propagating through a hidden
    /// layer multiplies by the transposed weights and masks by that layer's
    /// ReLU activation, so units that were clamped to zero pass no gradient.
    pub fn backward(&self, activations: &[Array2<f64>], targets: &Array2<f64>) -> GradientMap {
        let batch = targets.nrows() as f64;
        let output = &activations[activations.len() - 1];
        let mut delta = output - targets;

        let mut gradients = GradientMap::with_capacity(self.weights.len() * 2);
        for i in (0..self.weights.len()).rev() {
            let grad_w = activations[i].t().dot(&delta) / batch;
            let grad_b = delta.sum_axis(Axis(0)).insert_axis(Axis(0)) / batch;
            gradients.insert(format!("layer_{i}_weights"), grad_w.into_dyn());
            gradients.insert(format!("layer_{i}_biases"), grad_b.into_dyn());

            if i > 0 {
                let mask = activations[i].mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
                delta = delta.dot(&self.weights[i].t()) * mask;
            }
        }
        gradients
    }

    /// Snapshot the current parameters under the `layer_{i}_*` keys.
    pub fn parameters(&self) -> GradientMap {
        let mut params = GradientMap::with_capacity(self.weights.len() * 2);
        for (i, (w, b)) in self.weights.iter().zip(&self.biases).enumerate() {
            params.insert(format!("layer_{i}_weights"), w.clone().into_dyn());
            params.insert(format!("layer_{i}_biases"), b.clone().into_dyn());
        }
        params
    }

    /// Load parameters from a map. Unknown keys and shape mismatches are
    /// rejected rather than silently ignored.
    pub fn set_parameters(&mut self, params: &GradientMap) -> Result<(), ModelError> {
        for (name, value) in params {
            let (layers, index) = if let Some(idx) = name
                .strip_prefix("layer_")
                .and_then(|rest| rest.strip_suffix("_weights"))
            {
                (&mut self.weights, idx)
            } else if let Some(idx) = name
                .strip_prefix("layer_")
                .and_then(|rest| rest.strip_suffix("_biases"))
            {
                (&mut self.biases, idx)
            } else {
                return Err(ModelError::UnknownParameter(name.clone()));
            };

            let index: usize = index
                .parse()
                .map_err(|_| ModelError::UnknownParameter(name.clone()))?;
            let slot = layers
                .get_mut(index)
                .ok_or_else(|| ModelError::UnknownParameter(name.clone()))?;
            if value.shape() != slot.shape() {
                return Err(ModelError::ShapeMismatch {
                    name: name.clone(),
                    expected: slot.shape().to_vec(),
                    actual: value.shape().to_vec(),
                });
            }
            *slot = value
                .clone()
                .into_dimensionality::<Ix2>()
                .map_err(|_| ModelError::ShapeMismatch {
                    name: name.clone(),
                    expected: slot.shape().to_vec(),
                    actual: value.shape().to_vec(),
                })?;
        }
        Ok(())
    }
}

/// Row-wise softmax, shifted by the row max for numeric stability.
fn softmax(z: &Array2<f64>) -> Array2<f64> {
    let max = z
        .map_axis(Axis(1), |row| {
            row.fold(f64::NEG_INFINITY, |a, &b| a.max(b))
        })
        .insert_axis(Axis(1));
    let exp = (z - &max).mapv(f64::exp);
    let sums = exp.sum_axis(Axis(1)).insert_axis(Axis(1));
    exp / sums
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn softmax_rows_sum_to_one() {
        let z = array![[1.0, 2.0, 3.0], [1000.0, 1000.0, 1000.0]];
        let s = softmax(&z);
        for row in s.axis_iter(Axis(0)) {
            assert!((row.sum() - 1.0).abs() < 1e-12);
        }
        assert!((s[[1, 0]] - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn forward_shapes() {
        let net = FeedForwardNet::new(4, &[8, 6], 3);
        let x = Array2::zeros((5, 4));
        let out = net.forward(&x);
        assert_eq!(out.dim(), (5, 3));
        let trace = net.forward_trace(&x);
        assert_eq!(trace.len(), 4);
        assert_eq!(trace[1].dim(), (5, 8));
    }

    #[test]
    fn backward_produces_gradients_for_every_parameter() {
        let net = FeedForwardNet::new(4, &[8], 3);
        let x = Array2::ones((2, 4));
        let y = array![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let trace = net.forward_trace(&x);
        let grads = net.backward(&trace, &y);
        assert_eq!(grads.len(), 4);
        assert_eq!(grads["layer_0_weights"].shape(), &[4, 8]);
        assert_eq!(grads["layer_1_weights"].shape(), &[8, 3]);
        assert_eq!(grads["layer_0_biases"].shape(), &[1, 8]);
    }

    #[test]
    fn relu_mask_blocks_dead_units() {
        // with all-negative inputs and tiny positive weights the hidden
        // pre-activations are negative, so layer 0 must see zero gradient
        let mut net = FeedForwardNet::new(2, &[3], 2);
        let mut params = net.parameters();
        for (name, value) in params.iter_mut() {
            if name == "layer_0_weights" {
                value.fill(0.5);
            }
        }
        net.set_parameters(&params).unwrap();

        let x = array![[-1.0, -1.0]];
        let y = array![[1.0, 0.0]];
        let trace = net.forward_trace(&x);
        let grads = net.backward(&trace, &y);
        assert!(grads["layer_0_weights"].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn set_parameters_rejects_bad_shapes() {
        let mut net = FeedForwardNet::new(4, &[8], 3);
        let mut params = GradientMap::new();
        params.insert(
            "layer_0_weights".to_string(),
            Array2::<f64>::zeros((3, 3)).into_dyn(),
        );
        assert!(net.set_parameters(&params).is_err());

        let mut params = GradientMap::new();
        params.insert("mystery".to_string(), Array2::<f64>::zeros((1, 1)).into_dyn());
        assert!(net.set_parameters(&params).is_err());
    }

    #[test]
    fn gradient_descent_reduces_loss() {
        let mut net = FeedForwardNet::new(2, &[16], 2);
        let x = array![[0.0, 1.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]];
        let y = array![[1.0, 0.0], [0.0, 1.0], [1.0, 0.0], [0.0, 1.0]];

        let loss = |net: &FeedForwardNet| {
            let p = net.forward(&x);
            -(&y * &p.mapv(|v| v.max(1e-15).ln())).sum() / x.nrows() as f64
        };

        let before = loss(&net);
        for _ in 0..200 {
            let trace = net.forward_trace(&x);
            let grads = net.backward(&trace, &y);
            let mut params = net.parameters();
            for (name, value) in params.iter_mut() {
                *value -= &(&grads[name] * 0.5);
            }
            net.set_parameters(&params).unwrap();
        }
        assert!(loss(&net) < before);
    }
}
