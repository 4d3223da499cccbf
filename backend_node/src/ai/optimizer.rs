//! Parameter update rules applied between batches.

use super::GradientMap;
use ndarray::ArrayD;

/// Applies one gradient step to a parameter map in place. Parameters with
/// no matching gradient entry are left untouched.
pub trait Optimizer: Send {
    fn step(&mut self, params: &mut GradientMap, gradients: &GradientMap);
}

/// Pick an optimizer by its wire name. Unrecognized names fall back to Adam.
pub fn from_name(name: &str, learning_rate: f64) -> Box<dyn Optimizer> {
    match name.to_ascii_lowercase().as_str() {
        "sgd" => Box::new(Sgd::new(learning_rate)),
        "momentum" => Box::new(Momentum::new(learning_rate, 0.9)),
        _ => Box::new(Adam::new(learning_rate)),
    }
}

pub struct Sgd {
    learning_rate: f64,
}

impl Sgd {
    pub fn new(learning_rate: f64) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, params: &mut GradientMap, gradients: &GradientMap) {
        for (name, param) in params.iter_mut() {
            if let Some(grad) = gradients.get(name) {
                *param -= &(grad * self.learning_rate);
            }
        }
    }
}

pub struct Momentum {
    learning_rate: f64,
    momentum: f64,
    velocity: GradientMap,
}

impl Momentum {
    pub fn new(learning_rate: f64, momentum: f64) -> Self {
        Self {
            learning_rate,
            momentum,
            velocity: GradientMap::new(),
        }
    }
}

impl Optimizer for Momentum {
    fn step(&mut self, params: &mut GradientMap, gradients: &GradientMap) {
        for (name, param) in params.iter_mut() {
            let Some(grad) = gradients.get(name) else {
                continue;
            };
            let velocity = self
                .velocity
                .entry(name.clone())
                .or_insert_with(|| ArrayD::zeros(grad.raw_dim()));
            *velocity = &*velocity * self.momentum - &(grad * self.learning_rate);
            *param += &*velocity;
        }
    }
}

/// Adam with bias-corrected first and second moment estimates.
pub struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    first_moment: GradientMap,
    second_moment: GradientMap,
    timestep: i32,
}

impl Adam {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            first_moment: GradientMap::new(),
            second_moment: GradientMap::new(),
            timestep: 0,
        }
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut GradientMap, gradients: &GradientMap) {
        self.timestep += 1;
        let bias1 = 1.0 - self.beta1.powi(self.timestep);
        let bias2 = 1.0 - self.beta2.powi(self.timestep);

        for (name, param) in params.iter_mut() {
            let Some(grad) = gradients.get(name) else {
                continue;
            };
            let m = self
                .first_moment
                .entry(name.clone())
                .or_insert_with(|| ArrayD::zeros(grad.raw_dim()));
            let v = self
                .second_moment
                .entry(name.clone())
                .or_insert_with(|| ArrayD::zeros(grad.raw_dim()));

            *m = &*m * self.beta1 + &(grad * (1.0 - self.beta1));
            *v = &*v * self.beta2 + &(grad.mapv(|g| g * g) * (1.0 - self.beta2));

            let m_hat = &*m / bias1;
            let v_hat = &*v / bias2;
            let update = m_hat / (v_hat.mapv(f64::sqrt) + self.epsilon) * self.learning_rate;
            *param -= &update;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn single_param(value: f64) -> GradientMap {
        let mut map = GradientMap::new();
        map.insert("w".to_string(), array![value].into_dyn());
        map
    }

    #[test]
    fn sgd_moves_against_the_gradient() {
        let mut params = single_param(1.0);
        let grads = single_param(0.5);
        Sgd::new(0.1).step(&mut params, &grads);
        assert!((params["w"][[0]] - 0.95).abs() < 1e-12);
    }

    #[test]
    fn momentum_accumulates_velocity() {
        let mut params = single_param(1.0);
        let grads = single_param(1.0);
        let mut opt = Momentum::new(0.1, 0.9);
        opt.step(&mut params, &grads);
        let after_one = params["w"][[0]];
        opt.step(&mut params, &grads);
        let second_step = params["w"][[0]] - after_one;
        // second step is larger in magnitude than the first
        assert!(second_step.abs() > (after_one - 1.0).abs());
    }

    #[test]
    fn adam_first_step_has_unit_direction() {
        // with bias correction the first Adam step is close to lr in magnitude
        let mut params = single_param(1.0);
        let grads = single_param(10.0);
        Adam::new(0.001).step(&mut params, &grads);
        assert!((params["w"][[0]] - (1.0 - 0.001)).abs() < 1e-6);
    }

    #[test]
    fn parameters_without_gradients_are_untouched() {
        let mut params = single_param(1.0);
        params.insert("frozen".to_string(), array![5.0].into_dyn());
        let grads = single_param(1.0);
        from_name("adam", 0.01).step(&mut params, &grads);
        assert_eq!(params["frozen"][[0]], 5.0);
    }
}
