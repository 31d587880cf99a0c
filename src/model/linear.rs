// --- File: src/model/linear.rs ---

//! Flatten followed by one fully connected layer: `logits = x·W + b`.

use super::{Classifier, Gradients, ModelError, Parameters, Result};
use crate::phase::Phase;
use ndarray::{Array1, Array2, ArrayD, ArrayView1, ArrayView2, Axis, Ix1, Ix2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Name of the weight matrix `[in_features, num_classes]`.
pub const WEIGHT: &str = "linear.weight";
/// Name of the bias vector `[num_classes]`.
pub const BIAS: &str = "linear.bias";

/// Linear classifier over flattened samples.
pub struct LinearClassifier {
    in_features: usize,
    num_classes: usize,
    params: Parameters,
    /// Flattened inputs of the last training forward.
    cache: Option<Array2<f32>>,
}

impl LinearClassifier {
    /// Creates the layer with Xavier-uniform weights and zero bias.
    ///
    /// # Panics
    ///
    /// Panics if `in_features` or `num_classes` is 0.
    pub fn new(in_features: usize, num_classes: usize, seed: u64) -> Self {
        assert!(in_features > 0, "in_features must be positive");
        assert!(num_classes > 0, "num_classes must be positive");

        let mut rng = StdRng::seed_from_u64(seed);
        let limit = (6.0 / (in_features + num_classes) as f32).sqrt();
        let weight = Array2::from_shape_simple_fn((in_features, num_classes), || {
            rng.random_range(-limit..limit)
        });
        let bias = Array1::<f32>::zeros(num_classes);

        let mut params = Parameters::new();
        params.insert(WEIGHT.to_string(), weight.into_dyn());
        params.insert(BIAS.to_string(), bias.into_dyn());

        Self {
            in_features,
            num_classes,
            params,
            cache: None,
        }
    }

    /// Creates a classifier for samples of the given shape, e.g. `[1, 96, 96, 96]`.
    pub fn for_sample_shape(sample_shape: &[usize], num_classes: usize, seed: u64) -> Self {
        Self::new(sample_shape.iter().product(), num_classes, seed)
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    fn weight(&self) -> Result<ArrayView2<'_, f32>> {
        let w = self
            .params
            .get(WEIGHT)
            .ok_or_else(|| ModelError::MissingParameter(WEIGHT.to_string()))?;
        w.view()
            .into_dimensionality::<Ix2>()
            .map_err(|_| ModelError::ShapeMismatch {
                what: WEIGHT.to_string(),
                expected: vec![self.in_features, self.num_classes],
                actual: w.shape().to_vec(),
            })
    }

    fn bias(&self) -> Result<ArrayView1<'_, f32>> {
        let b = self
            .params
            .get(BIAS)
            .ok_or_else(|| ModelError::MissingParameter(BIAS.to_string()))?;
        b.view()
            .into_dimensionality::<Ix1>()
            .map_err(|_| ModelError::ShapeMismatch {
                what: BIAS.to_string(),
                expected: vec![self.num_classes],
                actual: b.shape().to_vec(),
            })
    }

    /// Reshapes `[B, ...]` into `[B, in_features]`.
    fn flatten(&self, inputs: &ArrayD<f32>) -> Result<Array2<f32>> {
        let mismatch = || ModelError::ShapeMismatch {
            what: "inputs".to_string(),
            expected: vec![inputs.shape().first().copied().unwrap_or(0), self.in_features],
            actual: inputs.shape().to_vec(),
        };
        if inputs.ndim() < 2 {
            return Err(mismatch());
        }
        let batch = inputs.shape()[0];
        let features: usize = inputs.shape()[1..].iter().product();
        if features != self.in_features {
            return Err(mismatch());
        }
        inputs
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((batch, features))
            .map_err(|_| mismatch())
    }
}

impl Classifier for LinearClassifier {
    fn name(&self) -> &str {
        "linear"
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn forward(&mut self, inputs: &ArrayD<f32>, phase: Phase) -> Result<Array2<f32>> {
        let x = self.flatten(inputs)?;
        let logits = x.dot(&self.weight()?) + &self.bias()?;
        self.cache = if phase.is_train() { Some(x) } else { None };
        Ok(logits)
    }

    fn backward(&mut self, grad_logits: &Array2<f32>) -> Result<Gradients> {
        let x = self.cache.take().ok_or(ModelError::NoForwardCache)?;
        if grad_logits.dim() != (x.nrows(), self.num_classes) {
            return Err(ModelError::ShapeMismatch {
                what: "grad_logits".to_string(),
                expected: vec![x.nrows(), self.num_classes],
                actual: grad_logits.shape().to_vec(),
            });
        }

        let mut grads = Gradients::new();
        grads.insert(WEIGHT.to_string(), x.t().dot(grad_logits).into_dyn());
        grads.insert(BIAS.to_string(), grad_logits.sum_axis(Axis(0)).into_dyn());
        Ok(grads)
    }

    fn parameters(&self) -> &Parameters {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut Parameters {
        &mut self.params
    }
}
