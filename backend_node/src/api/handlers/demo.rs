//! Self-contained federated training demo.
//!
//! Fabricates one gradient map per participant from a seed derived from the
//! request, runs them through real federated averaging and reports seeded
//! summary metrics. The same request always produces the same numbers.

use crate::ai::{self, GradientMap};
use crate::api::errors::{ApiError, ApiResult};
use crate::api::server::AppState;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use ndarray::{Array2, ArrayD};
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

pub fn router() -> Router<AppState> {
    Router::new().route("/run-training", post(run_demo_training))
}

#[derive(Debug, Deserialize, Hash)]
#[serde(default)]
pub struct DemoTrainingRequest {
    #[serde(alias = "modelType")]
    pub model_type: String,
    pub epochs: usize,
    pub participants: usize,
}

impl Default for DemoTrainingRequest {
    fn default() -> Self {
        Self {
            model_type: "mlp".to_string(),
            epochs: 5,
            participants: 3,
        }
    }
}

impl DemoTrainingRequest {
    fn seed(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

fn demo_gradients(rng: &mut rand::rngs::StdRng) -> GradientMap {
    let mut map = GradientMap::new();
    for (i, (rows, cols)) in [(8, 16), (16, 8), (8, 4)].into_iter().enumerate() {
        let weights =
            Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-0.1..0.1)).into_dyn();
        let biases = ArrayD::from_shape_fn(ndarray::IxDyn(&[1, cols]), |_| {
            rng.gen_range(-0.01..0.01)
        });
        map.insert(format!("layer_{i}_weights"), weights);
        map.insert(format!("layer_{i}_biases"), biases);
    }
    map
}

pub async fn run_demo_training(
    State(_state): State<AppState>,
    Json(request): Json<DemoTrainingRequest>,
) -> ApiResult<Json<Value>> {
    if request.participants == 0 {
        return Err(ApiError::bad_request("participants must be at least 1"));
    }
    if request.epochs == 0 {
        return Err(ApiError::bad_request("epochs must be at least 1"));
    }

    let seed = request.seed();
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);

    let contributions: Vec<GradientMap> = (0..request.participants)
        .map(|_| demo_gradients(&mut rng))
        .collect();
    let aggregate = ai::federated_average(&contributions)?;
    // sum in key order so identical requests produce bit-identical norms
    let mut keys: Vec<&String> = aggregate.keys().collect();
    keys.sort();
    let aggregate_norm: f64 = keys
        .iter()
        .map(|k| aggregate[*k].iter().map(|v| v * v).sum::<f64>())
        .sum::<f64>()
        .sqrt();

    // seeded but plausible-looking summary metrics
    let final_accuracy = 0.82 + (seed % 120) as f64 / 1000.0;
    let final_loss = 0.65 - (seed % 400) as f64 / 1000.0;
    let rewards: Vec<Value> = (0..request.participants)
        .map(|p| {
            json!({
                "contributor": format!("demo_contributor_{}", p + 1),
                "share": 1.0 / request.participants as f64,
                "reward": rng.gen_range(50.0..150.0),
            })
        })
        .collect();

    Ok(Json(json!({
        "success": true,
        "demo": true,
        "modelType": request.model_type,
        "epochs": request.epochs,
        "participants": request.participants,
        "aggregatedLayers": aggregate.len(),
        "aggregateNorm": aggregate_norm,
        "finalAccuracy": final_accuracy,
        "finalLoss": final_loss,
        "rewardDistribution": rewards,
    })))
}
