//! Federated averaging over contributor gradient maps.

use super::GradientMap;
use ndarray::ArrayD;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("no gradient contributions to aggregate")]
    EmptyInput,
    #[error("weight count mismatch: {gradients} contributions but {weights} weights")]
    WeightMismatch { gradients: usize, weights: usize },
    #[error("contribution weights sum to zero")]
    ZeroTotalWeight,
}

/// Plain mean of the contributions, key by key.
///
/// Keys absent from the first contribution are seeded from their first
/// occurrence, and every key is divided by the total contribution count at
/// the end. A key missing from some contributions is therefore scaled down
/// as if the missing contributors had sent zeros.
pub fn federated_average(contributions: &[GradientMap]) -> Result<GradientMap, AggregateError> {
    let first = contributions.first().ok_or(AggregateError::EmptyInput)?;

    let mut sums: GradientMap = first
        .iter()
        .map(|(key, grad)| (key.clone(), ArrayD::zeros(grad.raw_dim())))
        .collect();
    for contribution in contributions {
        for (key, grad) in contribution {
            match sums.get_mut(key) {
                Some(sum) => *sum += grad,
                None => {
                    sums.insert(key.clone(), grad.clone());
                }
            }
        }
    }

    let count = contributions.len() as f64;
    for sum in sums.values_mut() {
        *sum /= count;
    }
    Ok(sums)
}

/// Weighted mean with weights normalized to sum to one.
pub fn weighted_federated_average(
    contributions: &[GradientMap],
    weights: &[f64],
) -> Result<GradientMap, AggregateError> {
    if contributions.is_empty() {
        return Err(AggregateError::EmptyInput);
    }
    if contributions.len() != weights.len() {
        return Err(AggregateError::WeightMismatch {
            gradients: contributions.len(),
            weights: weights.len(),
        });
    }
    let total: f64 = weights.iter().sum();
    if total == 0.0 {
        return Err(AggregateError::ZeroTotalWeight);
    }

    let mut result = GradientMap::new();
    for (contribution, weight) in contributions.iter().zip(weights) {
        let weight = weight / total;
        for (key, grad) in contribution {
            let scaled = grad * weight;
            match result.get_mut(key) {
                Some(acc) => *acc += &scaled,
                None => {
                    result.insert(key.clone(), scaled);
                }
            }
        }
    }
    Ok(result)
}

/// Mean of contributions after clipping each one to a global L2 norm bound.
pub fn clipped_federated_average(
    contributions: &[GradientMap],
    clip_norm: f64,
) -> Result<GradientMap, AggregateError> {
    let clipped: Vec<GradientMap> = contributions
        .iter()
        .map(|contribution| {
            let norm = global_norm(contribution);
            if norm > clip_norm && norm > 0.0 {
                let scale = clip_norm / norm;
                contribution
                    .iter()
                    .map(|(key, grad)| (key.clone(), grad * scale))
                    .collect()
            } else {
                contribution.clone()
            }
        })
        .collect();
    federated_average(&clipped)
}

/// Mean of the contributions plus the updated velocity map
/// (`v' = momentum * v + (1 - momentum) * mean`). Keys without a velocity
/// entry take the averaged gradient directly. A missing velocity map is
/// treated as all zeros.
pub fn momentum_federated_average(
    contributions: &[GradientMap],
    velocity: Option<&GradientMap>,
    momentum: f64,
) -> Result<(GradientMap, GradientMap), AggregateError> {
    let average = federated_average(contributions)?;
    let zero_velocity: GradientMap;
    let velocity = match velocity {
        Some(velocity) => velocity,
        None => {
            zero_velocity = average
                .iter()
                .map(|(key, grad)| (key.clone(), ArrayD::zeros(grad.raw_dim())))
                .collect();
            &zero_velocity
        }
    };

    let blended: GradientMap = average
        .iter()
        .map(|(key, grad)| match velocity.get(key) {
            Some(prev) => {
                let next = prev * momentum + grad * (1.0 - momentum);
                (key.clone(), next)
            }
            None => (key.clone(), grad.clone()),
        })
        .collect();
    Ok((average, blended))
}

/// Global L2 norm across every array in one contribution.
fn global_norm(contribution: &GradientMap) -> f64 {
    contribution
        .values()
        .map(|grad| grad.iter().map(|v| v * v).sum::<f64>())
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn map_of(key: &str, values: [f64; 2]) -> GradientMap {
        let mut map = GradientMap::new();
        map.insert(key.to_string(), array![values[0], values[1]].into_dyn());
        map
    }

    #[test]
    fn plain_average() {
        let result =
            federated_average(&[map_of("w", [1.0, 2.0]), map_of("w", [3.0, 4.0])]).unwrap();
        assert_eq!(result["w"], array![2.0, 3.0].into_dyn());
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(matches!(
            federated_average(&[]),
            Err(AggregateError::EmptyInput)
        ));
    }

    #[test]
    fn key_missing_from_some_contributions_is_diluted() {
        let mut second = map_of("w", [3.0, 4.0]);
        second.insert("b".to_string(), array![2.0, 2.0].into_dyn());
        let result = federated_average(&[map_of("w", [1.0, 2.0]), second]).unwrap();
        assert_eq!(result["b"], array![1.0, 1.0].into_dyn());
    }

    #[test]
    fn weighted_average_normalizes() {
        let result = weighted_federated_average(
            &[map_of("w", [1.0, 1.0]), map_of("w", [3.0, 3.0])],
            &[1.0, 3.0],
        )
        .unwrap();
        assert_eq!(result["w"], array![2.5, 2.5].into_dyn());
    }

    #[test]
    fn weighted_average_rejects_bad_weights() {
        let contributions = [map_of("w", [1.0, 1.0]), map_of("w", [3.0, 3.0])];
        assert!(matches!(
            weighted_federated_average(&contributions, &[1.0]),
            Err(AggregateError::WeightMismatch { .. })
        ));
        assert!(matches!(
            weighted_federated_average(&contributions, &[0.0, 0.0]),
            Err(AggregateError::ZeroTotalWeight)
        ));
    }

    #[test]
    fn clipping_bounds_each_contribution() {
        // norm of [3, 4] is 5, clipped to 1 it becomes [0.6, 0.8]
        let result = clipped_federated_average(&[map_of("w", [3.0, 4.0])], 1.0).unwrap();
        let w = &result["w"];
        assert!((w[[0]] - 0.6).abs() < 1e-12);
        assert!((w[[1]] - 0.8).abs() < 1e-12);

        // below the bound nothing changes
        let result = clipped_federated_average(&[map_of("w", [0.3, 0.4])], 1.0).unwrap();
        assert_eq!(result["w"], array![0.3, 0.4].into_dyn());
    }

    #[test]
    fn momentum_blends_with_velocity() {
        let velocity = map_of("w", [10.0, 10.0]);
        let (mean, new_velocity) = momentum_federated_average(
            &[map_of("w", [2.0, 2.0])],
            Some(&velocity),
            0.9,
        )
        .unwrap();
        assert_eq!(mean["w"], array![2.0, 2.0].into_dyn());
        assert!((new_velocity["w"][[0]] - 9.2).abs() < 1e-12);
    }

    #[test]
    fn momentum_without_velocity_scales_by_one_minus_momentum() {
        let (_, new_velocity) =
            momentum_federated_average(&[map_of("w", [10.0, 10.0])], None, 0.9).unwrap();
        assert!((new_velocity["w"][[0]] - 1.0).abs() < 1e-12);
    }
}
