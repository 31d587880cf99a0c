// --- File: src/model/mod.rs ---

//! The classifier seam.
//!
//! The training loop only needs three things from a network: logits for a
//! batch, gradients for the last training batch, and named parameters the
//! optimizer can update. [`Classifier`] captures exactly that, so any
//! architecture can be plugged in. Two simple implementations ship here:
//!
//! - [`LinearClassifier`]: flatten, then one affine layer
//! - [`ConstantClassifier`]: the same logits for every input

pub mod constant;
pub mod linear;

pub use constant::ConstantClassifier;
pub use linear::LinearClassifier;

use crate::phase::Phase;
use ndarray::{Array2, ArrayD};
use std::collections::HashMap;
use thiserror::Error;

/// Named model parameters, e.g. `"linear.weight"`.
pub type Parameters = HashMap<String, ArrayD<f32>>;

/// Gradients keyed by the parameter they belong to.
pub type Gradients = Parameters;

/// Model errors.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("label {label} is out of range for {num_classes} classes")]
    LabelOutOfRange { label: usize, num_classes: usize },

    #[error("backward called without a preceding training forward pass")]
    NoForwardCache,

    #[error("parameter '{0}' not found")]
    MissingParameter(String),

    #[error("unknown model '{0}'")]
    UnknownModel(String),
}

pub(crate) type Result<T> = std::result::Result<T, ModelError>;

/// A trainable classification network.
pub trait Classifier {
    /// Short architecture name stored in checkpoints.
    fn name(&self) -> &str;

    /// Number of output classes.
    fn num_classes(&self) -> usize;

    /// Computes logits of shape `[B, num_classes]` for inputs `[B, ...]`.
    ///
    /// In [`Phase::Train`] the model keeps whatever it needs for
    /// [`Classifier::backward`].
    fn forward(&mut self, inputs: &ArrayD<f32>, phase: Phase) -> Result<Array2<f32>>;

    /// Gradient of the loss with respect to every parameter, given the
    /// gradient with respect to the logits of the last training forward.
    fn backward(&mut self, grad_logits: &Array2<f32>) -> Result<Gradients>;

    fn parameters(&self) -> &Parameters;

    fn parameters_mut(&mut self) -> &mut Parameters;

    /// Replaces all parameters, checking names and shapes first.
    fn load_parameters(&mut self, params: Parameters) -> Result<()> {
        let current = self.parameters_mut();
        for (name, existing) in current.iter() {
            let incoming = params
                .get(name)
                .ok_or_else(|| ModelError::MissingParameter(name.clone()))?;
            if incoming.shape() != existing.shape() {
                return Err(ModelError::ShapeMismatch {
                    what: name.clone(),
                    expected: existing.shape().to_vec(),
                    actual: incoming.shape().to_vec(),
                });
            }
        }
        for (name, value) in params {
            if let Some(slot) = current.get_mut(&name) {
                *slot = value;
            }
        }
        Ok(())
    }
}

impl<C: Classifier + ?Sized> Classifier for Box<C> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn num_classes(&self) -> usize {
        (**self).num_classes()
    }

    fn forward(&mut self, inputs: &ArrayD<f32>, phase: Phase) -> Result<Array2<f32>> {
        (**self).forward(inputs, phase)
    }

    fn backward(&mut self, grad_logits: &Array2<f32>) -> Result<Gradients> {
        (**self).backward(grad_logits)
    }

    fn parameters(&self) -> &Parameters {
        (**self).parameters()
    }

    fn parameters_mut(&mut self) -> &mut Parameters {
        (**self).parameters_mut()
    }

    fn load_parameters(&mut self, params: Parameters) -> Result<()> {
        (**self).load_parameters(params)
    }
}

/// Builds a classifier by name.
///
/// # Arguments
///
/// * `name` - `"linear"` or `"constant"` (always predicts class 0)
/// * `sample_shape` - Shape of one input sample, without the batch axis
/// * `num_classes` - Number of output classes
/// * `seed` - Seed for weight initialisation
pub fn build_classifier(
    name: &str,
    sample_shape: &[usize],
    num_classes: usize,
    seed: u64,
) -> Result<Box<dyn Classifier + Send>> {
    match name {
        "linear" => Ok(Box::new(LinearClassifier::for_sample_shape(
            sample_shape,
            num_classes,
            seed,
        ))),
        "constant" => Ok(Box::new(ConstantClassifier::predicting(0, num_classes))),
        other => Err(ModelError::UnknownModel(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn test_build_classifier_by_name() {
        let model = build_classifier("linear", &[1, 4, 4], 3, 0).unwrap();
        assert_eq!(model.name(), "linear");
        assert_eq!(model.num_classes(), 3);
        assert!(matches!(
            build_classifier("resnet", &[1, 4, 4], 3, 0),
            Err(ModelError::UnknownModel(_))
        ));
    }

    #[test]
    fn test_load_parameters_checks_shapes() {
        let mut model = LinearClassifier::new(4, 2, 1);
        let mut params = model.parameters().clone();
        params.insert(
            linear::WEIGHT.to_string(),
            ArrayD::zeros(IxDyn(&[3, 2])),
        );
        assert!(matches!(
            model.load_parameters(params),
            Err(ModelError::ShapeMismatch { .. })
        ));

        let mut missing = model.parameters().clone();
        missing.remove(linear::BIAS);
        assert!(matches!(
            model.load_parameters(missing),
            Err(ModelError::MissingParameter(name)) if name == linear::BIAS
        ));

        let mut zeros = model.parameters().clone();
        for value in zeros.values_mut() {
            value.fill(0.0);
        }
        model.load_parameters(zeros).unwrap();
        assert!(model.parameters().values().all(|p| p.iter().all(|&v| v == 0.0)));
    }
}
