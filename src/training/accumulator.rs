// --- File: src/training/accumulator.rs ---

//! Per-epoch running sums.

use super::history::EpochRecord;
use crate::data::DataError;
use crate::metrics::{Accuracy, Metric};
use crate::phase::Phase;

/// Accumulates loss and accuracy over the batches of one epoch.
///
/// Each batch contributes `mean_loss * batch_len` to the loss sum, so the
/// epoch loss is the per-sample mean even when the last batch is short.
#[derive(Debug, Clone, Default)]
pub struct EpochAccumulator {
    loss_sum: f64,
    accuracy: Accuracy,
    batches: usize,
}

impl EpochAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one batch.
    ///
    /// # Arguments
    ///
    /// * `mean_loss` - Mean loss over the batch
    /// * `predicted` - Predicted class per sample
    /// * `labels` - True class per sample
    pub fn add_batch(&mut self, mean_loss: f32, predicted: &[usize], labels: &[usize]) {
        self.loss_sum += f64::from(mean_loss) * labels.len() as f64;
        self.accuracy.update(predicted, labels);
        self.batches += 1;
    }

    /// Number of samples seen.
    pub fn samples(&self) -> usize {
        self.accuracy.total()
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Per-sample mean loss.
    pub fn loss(&self) -> Result<f64, DataError> {
        match self.samples() {
            0 => Err(DataError::EmptyDataset),
            n => Ok(self.loss_sum / n as f64),
        }
    }

    /// Fraction of correct predictions.
    pub fn accuracy(&self) -> Result<f64, DataError> {
        match self.samples() {
            0 => Err(DataError::EmptyDataset),
            _ => Ok(self.accuracy.compute()),
        }
    }

    /// Closes the epoch.
    pub fn finish(&self, epoch: usize, phase: Phase) -> Result<EpochRecord, DataError> {
        Ok(EpochRecord {
            epoch,
            phase,
            loss: self.loss()?,
            accuracy: self.accuracy()?,
            samples: self.samples(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_weighted_loss() {
        let mut acc = EpochAccumulator::new();
        acc.add_batch(1.0, &[0, 0, 0], &[0, 1, 0]);
        acc.add_batch(4.0, &[1], &[1]);

        // (1.0 * 3 + 4.0 * 1) / 4, not the mean of batch means (2.5)
        assert!((acc.loss().unwrap() - 1.75).abs() < 1e-12);
        assert!((acc.accuracy().unwrap() - 0.75).abs() < 1e-12);
        assert_eq!(acc.samples(), 4);
        assert_eq!(acc.batches(), 2);
    }

    #[test]
    fn test_empty_epoch_is_an_error() {
        let acc = EpochAccumulator::new();
        assert!(matches!(acc.loss(), Err(DataError::EmptyDataset)));
        assert!(acc.finish(1, Phase::Train).is_err());
    }

    #[test]
    fn test_finish_builds_record() {
        let mut acc = EpochAccumulator::new();
        acc.add_batch(0.5, &[1, 1], &[1, 0]);
        let record = acc.finish(3, Phase::Eval).unwrap();
        assert_eq!(record.epoch, 3);
        assert_eq!(record.phase, Phase::Eval);
        assert_eq!(record.samples, 2);
        assert!((record.accuracy - 0.5).abs() < 1e-12);
    }
}
