// --- File: src/model/constant.rs ---

//! A parameter-free classifier returning fixed logits.

use super::{Classifier, Gradients, ModelError, Parameters, Result};
use crate::phase::Phase;
use ndarray::{Array1, Array2, ArrayD};

/// Returns the same logits for every sample.
///
/// Useful as a majority-class baseline and for checking the training loop
/// bookkeeping without any learning going on.
#[derive(Debug, Clone)]
pub struct ConstantClassifier {
    logits: Array1<f32>,
    params: Parameters,
}

impl ConstantClassifier {
    /// # Panics
    ///
    /// Panics if `logits` is empty.
    pub fn new(logits: Array1<f32>) -> Self {
        assert!(!logits.is_empty(), "need at least one class");
        Self {
            logits,
            params: Parameters::new(),
        }
    }

    /// Always predicts `class`.
    pub fn predicting(class: usize, num_classes: usize) -> Self {
        assert!(class < num_classes, "class must be below num_classes");
        let mut logits = Array1::zeros(num_classes);
        logits[class] = 1.0;
        Self::new(logits)
    }
}

impl Classifier for ConstantClassifier {
    fn name(&self) -> &str {
        "constant"
    }

    fn num_classes(&self) -> usize {
        self.logits.len()
    }

    fn forward(&mut self, inputs: &ArrayD<f32>, _phase: Phase) -> Result<Array2<f32>> {
        let batch = match inputs.shape().first() {
            Some(&b) => b,
            None => {
                return Err(ModelError::ShapeMismatch {
                    what: "inputs".to_string(),
                    expected: vec![0],
                    actual: vec![],
                })
            }
        };
        Ok(Array2::from_shape_fn((batch, self.logits.len()), |(_, j)| self.logits[j]))
    }

    fn backward(&mut self, _grad_logits: &Array2<f32>) -> Result<Gradients> {
        Ok(Gradients::new())
    }

    fn parameters(&self) -> &Parameters {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut Parameters {
        &mut self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn test_same_logits_for_every_sample() {
        let mut model = ConstantClassifier::predicting(1, 3);
        let logits = model.forward(&ArrayD::zeros(IxDyn(&[4, 1, 2, 2])), Phase::Train).unwrap();
        assert_eq!(logits.dim(), (4, 3));
        for row in logits.rows() {
            assert_eq!(row.to_vec(), vec![0.0, 1.0, 0.0]);
        }
        assert!(model.backward(&logits).unwrap().is_empty());
        assert!(model.parameters().is_empty());
    }
}
