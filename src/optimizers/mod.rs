// --- File: src/optimizers/mod.rs ---

//! Optimizers that update model parameters from gradients.
//!
//! Optimizers work on the eager `ndarray` values of a [`Parameters`] map.
//! They receive the current weights and the computed gradients and apply
//! their update rule in place.

use crate::config::{OptimizerKind, TrainConfig};
use crate::model::{Gradients, ModelError, Parameters};
use ndarray::ArrayD;
use std::collections::HashMap;

/// Common interface for all optimizers.
pub trait Optimizer {
    /// Performs one optimization step, updating the weights.
    ///
    /// # Arguments
    ///
    /// * `parameters` - Current model weights, keyed by name
    ///   (e.g. "linear.weight").
    /// * `gradients` - Gradients for some or all of those weights.
    fn step(&mut self, parameters: &mut Parameters, gradients: &Gradients) -> Result<(), ModelError>;

    fn learning_rate(&self) -> f32;
}

/// Looks up the parameter a gradient belongs to and checks the shapes agree.
fn target<'a>(
    parameters: &'a mut Parameters,
    name: &str,
    grad: &ArrayD<f32>,
) -> Result<&'a mut ArrayD<f32>, ModelError> {
    let param = parameters
        .get_mut(name)
        .ok_or_else(|| ModelError::MissingParameter(name.to_string()))?;
    if param.shape() != grad.shape() {
        return Err(ModelError::ShapeMismatch {
            what: name.to_string(),
            expected: param.shape().to_vec(),
            actual: grad.shape().to_vec(),
        });
    }
    Ok(param)
}

/// Stochastic Gradient Descent with optional momentum.
pub struct Sgd {
    lr: f32,
    momentum: f32,
    velocity: HashMap<String, ArrayD<f32>>,
}

impl Sgd {
    pub fn new(lr: f32) -> Self {
        Self {
            lr,
            momentum: 0.0,
            velocity: HashMap::new(),
        }
    }

    /// Sets the momentum factor (0 disables it).
    pub fn with_momentum(mut self, momentum: f32) -> Self {
        self.momentum = momentum;
        self
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, parameters: &mut Parameters, gradients: &Gradients) -> Result<(), ModelError> {
        let (lr, momentum) = (self.lr, self.momentum);
        for (name, grad) in gradients {
            let param = target(parameters, name, grad)?;
            if momentum == 0.0 {
                // param = param - lr * grad
                ndarray::azip!((p in param, &g in grad) *p -= lr * g);
                continue;
            }
            let v = self
                .velocity
                .entry(name.clone())
                .or_insert_with(|| ArrayD::zeros(grad.raw_dim()));
            // v = momentum * v + grad; param = param - lr * v
            ndarray::azip!((v in &mut *v, &g in grad) *v = momentum * *v + g);
            ndarray::azip!((p in param, &v in &*v) *p -= lr * v);
        }
        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }
}

/// Adam (Kingma & Ba) with bias correction.
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    t: i32,
    m: HashMap<String, ArrayD<f32>>,
    v: HashMap<String, ArrayD<f32>>,
}

impl Adam {
    pub fn new(lr: f32) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            t: 0,
            m: HashMap::new(),
            v: HashMap::new(),
        }
    }

    pub fn with_betas(mut self, beta1: f32, beta2: f32) -> Self {
        self.beta1 = beta1;
        self.beta2 = beta2;
        self
    }

    pub fn with_eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }
}

impl Optimizer for Adam {
    fn step(&mut self, parameters: &mut Parameters, gradients: &Gradients) -> Result<(), ModelError> {
        self.t += 1;
        let (b1, b2, eps, lr) = (self.beta1, self.beta2, self.eps, self.lr);
        let correction1 = 1.0 - b1.powi(self.t);
        let correction2 = 1.0 - b2.powi(self.t);

        for (name, grad) in gradients {
            let param = target(parameters, name, grad)?;
            let m = self
                .m
                .entry(name.clone())
                .or_insert_with(|| ArrayD::zeros(grad.raw_dim()));
            let v = self
                .v
                .entry(name.clone())
                .or_insert_with(|| ArrayD::zeros(grad.raw_dim()));

            ndarray::azip!((p in param, m in m, v in v, &g in grad) {
                *m = b1 * *m + (1.0 - b1) * g;
                *v = b2 * *v + (1.0 - b2) * g * g;
                let m_hat = *m / correction1;
                let v_hat = *v / correction2;
                *p -= lr * m_hat / (v_hat.sqrt() + eps);
            });
        }
        Ok(())
    }

    fn learning_rate(&self) -> f32 {
        self.lr
    }
}

/// Builds the optimizer selected in the run configuration.
pub fn build_optimizer(config: &TrainConfig) -> Box<dyn Optimizer> {
    match config.optimizer {
        OptimizerKind::Sgd => Box::new(Sgd::new(config.learning_rate).with_momentum(config.momentum)),
        OptimizerKind::Adam => Box::new(Adam::new(config.learning_rate)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, IxDyn};

    fn single(name: &str, value: ArrayD<f32>) -> Parameters {
        let mut map = Parameters::new();
        map.insert(name.to_string(), value);
        map
    }

    #[test]
    fn test_sgd_step() {
        let mut params = single("w", array![1.0, 2.0].into_dyn());
        let grads = single("w", array![0.5, -1.0].into_dyn());
        let mut sgd = Sgd::new(0.1);
        sgd.step(&mut params, &grads).unwrap();
        assert!((params["w"][[0]] - 0.95).abs() < 1e-6);
        assert!((params["w"][[1]] - 2.1).abs() < 1e-6);
    }

    #[test]
    fn test_sgd_momentum_accumulates() {
        let mut params = single("w", array![0.0].into_dyn());
        let grads = single("w", array![1.0].into_dyn());
        let mut sgd = Sgd::new(1.0).with_momentum(0.5);
        sgd.step(&mut params, &grads).unwrap(); // v = 1
        sgd.step(&mut params, &grads).unwrap(); // v = 1.5
        assert!((params["w"][[0]] + 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_adam_first_step_moves_by_lr() {
        let mut params = single("w", array![1.0, -1.0].into_dyn());
        let grads = single("w", array![3.0, -0.2].into_dyn());
        let mut adam = Adam::new(0.01);
        adam.step(&mut params, &grads).unwrap();
        // With bias correction the first update is lr * sign(grad).
        assert!((params["w"][[0]] - 0.99).abs() < 1e-5);
        assert!((params["w"][[1]] + 0.99).abs() < 1e-5);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let mut params = single("w", ArrayD::zeros(IxDyn(&[2, 2])));
        let grads = single("w", ArrayD::zeros(IxDyn(&[4])));
        assert!(matches!(
            Sgd::new(0.1).step(&mut params, &grads),
            Err(ModelError::ShapeMismatch { .. })
        ));
        let unknown = single("b", ArrayD::zeros(IxDyn(&[2])));
        assert!(matches!(
            Adam::new(0.1).step(&mut params, &unknown),
            Err(ModelError::MissingParameter(_))
        ));
    }

    #[test]
    fn test_build_from_config() {
        let config = TrainConfig {
            optimizer: OptimizerKind::Sgd,
            learning_rate: 0.5,
            ..TrainConfig::default()
        };
        assert_eq!(build_optimizer(&config).learning_rate(), 0.5);
    }
}
