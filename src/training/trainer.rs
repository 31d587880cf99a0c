// --- File: src/training/trainer.rs ---

//! The epoch loop.

use super::accumulator::EpochAccumulator;
use super::history::{EpochRecord, History};
use super::Result;
use crate::config::TrainConfig;
use crate::data::{DataLoader, Dataset};
use crate::losses::{argmax_rows, cross_entropy};
use crate::metrics::BestMetric;
use crate::model::{Classifier, Parameters};
use crate::optimizers::Optimizer;
use crate::phase::Phase;
use crate::serialization::CheckpointSink;
use log::{debug, info};

/// Receives progress events from the loop.
///
/// All methods default to doing nothing.
pub trait BatchObserver {
    /// Called after every batch with its mean loss and size.
    fn on_batch(&mut self, _phase: Phase, _epoch: usize, _batch: usize, _loss: f32, _batch_len: usize) {}

    /// Called when a phase of an epoch completes.
    fn on_epoch_end(&mut self, _record: &EpochRecord) {}

    /// Called after a new best model was handed to the checkpoint sink.
    fn on_checkpoint(&mut self, _epoch: usize, _metric: f64) {}
}

/// Optional collaborators of [`Trainer::fit`].
#[derive(Default)]
pub struct FitHooks<'a> {
    pub checkpoint: Option<&'a mut dyn CheckpointSink>,
    pub observer: Option<&'a mut dyn BatchObserver>,
}

impl<'a> FitHooks<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn checkpoint(mut self, sink: &'a mut dyn CheckpointSink) -> Self {
        self.checkpoint = Some(sink);
        self
    }

    pub fn observer(mut self, observer: &'a mut dyn BatchObserver) -> Self {
        self.observer = Some(observer);
        self
    }
}

/// Runs training and validation epochs and keeps the best model.
///
/// Loss and accuracy are accumulated once per batch, weighted by batch
/// length. After each validation the model is checkpointed if its
/// accuracy strictly beats the best so far. Until some model has been
/// saved, the value to beat is `min_accuracy`, or chance level
/// (`1 / num_classes`) when unset.
pub struct Trainer {
    epochs: usize,
    val_interval: usize,
    min_accuracy: Option<f64>,
    best: BestMetric,
}

impl Trainer {
    /// Creates a trainer validating after every epoch.
    ///
    /// # Panics
    ///
    /// Panics if `epochs` is 0.
    pub fn new(epochs: usize) -> Self {
        assert!(epochs > 0, "epochs must be at least 1");
        Self {
            epochs,
            val_interval: 1,
            min_accuracy: None,
            best: BestMetric::maximize("val_accuracy"),
        }
    }

    /// Creates a trainer from the `[train]` table.
    pub fn from_config(config: &TrainConfig) -> Self {
        Self::new(config.epochs).with_val_interval(config.val_interval)
    }

    /// Validates every `interval` epochs.
    ///
    /// # Panics
    ///
    /// Panics if `interval` is 0.
    pub fn with_val_interval(mut self, interval: usize) -> Self {
        assert!(interval > 0, "val_interval must be at least 1");
        self.val_interval = interval;
        self
    }

    /// Sets the validation accuracy the first checkpoint has to beat.
    pub fn with_min_accuracy(mut self, min_accuracy: f64) -> Self {
        self.min_accuracy = Some(min_accuracy);
        self.best = BestMetric::maximize("val_accuracy").with_baseline(min_accuracy);
        self
    }

    pub fn epochs(&self) -> usize {
        self.epochs
    }

    /// Best validation accuracy so far.
    pub fn best(&self) -> &BestMetric {
        &self.best
    }

    /// Runs one training epoch: forward, loss, backward and optimizer step
    /// for every batch.
    pub fn train_epoch<M, D>(
        &mut self,
        model: &mut M,
        optimizer: &mut dyn Optimizer,
        loader: &mut DataLoader<D>,
        epoch: usize,
        observer: Option<&mut (dyn BatchObserver + '_)>,
    ) -> Result<EpochRecord>
    where
        M: Classifier + ?Sized,
        D: Dataset,
    {
        run_epoch(model, Some(optimizer), loader, Phase::Train, epoch, observer)
    }

    /// Runs one evaluation epoch: forward and loss only.
    pub fn evaluate<M, D>(
        &mut self,
        model: &mut M,
        loader: &mut DataLoader<D>,
        epoch: usize,
        observer: Option<&mut (dyn BatchObserver + '_)>,
    ) -> Result<EpochRecord>
    where
        M: Classifier + ?Sized,
        D: Dataset,
    {
        run_epoch(model, None, loader, Phase::Eval, epoch, observer)
    }

    /// Feeds a validation result to the best-model tracker.
    ///
    /// On a strict improvement `params` are handed to `sink` and `true` is
    /// returned. The new best is only recorded once the sink has saved it.
    pub fn record_validation(
        &mut self,
        record: &EpochRecord,
        params: &Parameters,
        sink: Option<&mut (dyn CheckpointSink + '_)>,
    ) -> Result<bool> {
        if !self.best.improves(record.accuracy) {
            debug!(
                "epoch {}: val accuracy {:.4} does not improve on {:?}",
                record.epoch,
                record.accuracy,
                self.best.best_value().or(self.min_accuracy)
            );
            return Ok(false);
        }
        if let Some(sink) = sink {
            sink.save(record.epoch, record.accuracy, params)?;
        }
        self.best.record(record.accuracy, record.epoch);
        info!("epoch {}: new best val accuracy {:.4}", record.epoch, record.accuracy);
        Ok(true)
    }

    /// Runs the whole schedule.
    ///
    /// # Arguments
    ///
    /// * `model` - Classifier to train
    /// * `optimizer` - Updates `model`'s parameters
    /// * `train` - Training batches, one pass per epoch
    /// * `val` - Validation batches; without it nothing is checkpointed
    /// * `hooks` - Optional checkpoint sink and observer
    pub fn fit<M, DT, DV>(
        &mut self,
        model: &mut M,
        optimizer: &mut dyn Optimizer,
        train: &mut DataLoader<DT>,
        mut val: Option<&mut DataLoader<DV>>,
        hooks: FitHooks<'_>,
    ) -> Result<History>
    where
        M: Classifier + ?Sized,
        DT: Dataset,
        DV: Dataset,
    {
        let FitHooks {
            mut checkpoint,
            mut observer,
        } = hooks;

        if self.min_accuracy.is_none() && self.best.best_value().is_none() {
            let chance = 1.0 / model.num_classes().max(1) as f64;
            self.best = BestMetric::maximize("val_accuracy").with_baseline(chance);
        }

        info!(
            "training {} for {} epochs ({} train samples, {} batches per epoch)",
            model.name(),
            self.epochs,
            train.len(),
            train.num_batches()
        );

        let mut history = History::new();
        for epoch in 1..=self.epochs {
            let record = self.train_epoch(model, optimizer, train, epoch, observer.as_deref_mut())?;
            history.push(record);

            let Some(val) = val.as_deref_mut() else {
                continue;
            };
            if epoch % self.val_interval != 0 {
                continue;
            }
            let record = self.evaluate(model, val, epoch, observer.as_deref_mut())?;
            if self.record_validation(&record, model.parameters(), checkpoint.as_deref_mut())? {
                if let Some(observer) = observer.as_deref_mut() {
                    observer.on_checkpoint(epoch, record.accuracy);
                }
            }
            history.push(record);
        }

        match (self.best.best_value(), self.best.best_epoch()) {
            (Some(acc), Some(epoch)) => info!("finished; best val accuracy {acc:.4} at epoch {epoch}"),
            _ => info!("finished; no validation result improved on the baseline"),
        }
        Ok(history)
    }
}

fn run_epoch<M, D>(
    model: &mut M,
    mut optimizer: Option<&mut (dyn Optimizer + '_)>,
    loader: &mut DataLoader<D>,
    phase: Phase,
    epoch: usize,
    mut observer: Option<&mut (dyn BatchObserver + '_)>,
) -> Result<EpochRecord>
where
    M: Classifier + ?Sized,
    D: Dataset,
{
    let mut acc = EpochAccumulator::new();
    let num_batches = loader.num_batches();

    for (i, batch) in loader.iter().enumerate() {
        let batch = batch?;
        let logits = model.forward(&batch.inputs, phase)?;
        let (loss, grad_logits) = cross_entropy(&logits, &batch.labels)?;

        if phase.is_train() {
            let grads = model.backward(&grad_logits)?;
            if let Some(optimizer) = optimizer.as_deref_mut() {
                optimizer.step(model.parameters_mut(), &grads)?;
            }
        }

        acc.add_batch(loss, &argmax_rows(&logits), &batch.labels);
        debug!(
            "epoch {epoch} {phase} batch {}/{num_batches}: loss {loss:.4} ({} samples)",
            i + 1,
            batch.len()
        );
        if let Some(observer) = observer.as_deref_mut() {
            observer.on_batch(phase, epoch, i, loss, batch.len());
        }
    }

    let record = acc.finish(epoch, phase)?;
    info!(
        "epoch {epoch} {phase}: loss {:.4}, accuracy {:.4} over {} samples",
        record.loss, record.accuracy, record.samples
    );
    if let Some(observer) = observer.as_deref_mut() {
        observer.on_epoch_end(&record);
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::InMemoryDataset;
    use crate::model::{ConstantClassifier, LinearClassifier};
    use crate::optimizers::Sgd;
    use crate::serialization::CheckpointError;
    use crate::training::TrainError;
    use ndarray::{ArrayD, IxDyn};

    /// Two well separated clusters in 2D.
    fn separable(n: usize) -> InMemoryDataset {
        let mut values = Vec::with_capacity(n * 2);
        let mut labels = Vec::with_capacity(n);
        for i in 0..n {
            let label = i % 2;
            let sign = if label == 0 { -1.0 } else { 1.0 };
            values.push(sign * (1.0 + (i % 5) as f32 * 0.1));
            values.push(sign * 0.5);
            labels.push(label);
        }
        InMemoryDataset::new(ArrayD::from_shape_vec(IxDyn(&[n, 2]), values).unwrap(), labels, 2)
    }

    #[derive(Default)]
    struct CountingSink {
        saved: Vec<(usize, f64)>,
    }

    impl CheckpointSink for CountingSink {
        fn save(&mut self, epoch: usize, metric: f64, _params: &Parameters) -> std::result::Result<(), CheckpointError> {
            self.saved.push((epoch, metric));
            Ok(())
        }
    }

    #[test]
    fn test_constant_classifier_accuracy() {
        let mut loader = DataLoader::new(separable(10), 2).unwrap();
        let mut model = ConstantClassifier::predicting(0, 2);
        let mut trainer = Trainer::new(1);

        let record = trainer.evaluate(&mut model, &mut loader, 1, None).unwrap();
        assert_eq!(record.samples, 10);
        assert!((record.accuracy - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_record_validation_strict_improvement() {
        let mut trainer = Trainer::new(3).with_min_accuracy(0.5);
        let mut sink = CountingSink::default();
        let params = Parameters::new();

        for (epoch, acc) in [(1, 0.5), (2, 0.7), (3, 0.6)] {
            let record = EpochRecord {
                epoch,
                phase: Phase::Eval,
                loss: 0.0,
                accuracy: acc,
                samples: 10,
            };
            trainer.record_validation(&record, &params, Some(&mut sink)).unwrap();
        }

        assert_eq!(sink.saved, vec![(2, 0.7)]);
        assert_eq!(trainer.best().best_epoch(), Some(2));
    }

    /// Fails the first `failures` saves.
    struct FlakySink {
        failures: usize,
        saved: Vec<usize>,
    }

    impl CheckpointSink for FlakySink {
        fn save(&mut self, epoch: usize, _metric: f64, _params: &Parameters) -> std::result::Result<(), CheckpointError> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(CheckpointError::DirectoryNotFound("unwritable".into()));
            }
            self.saved.push(epoch);
            Ok(())
        }
    }

    #[test]
    fn test_failed_save_leaves_best_unchanged() {
        let mut trainer = Trainer::new(2).with_min_accuracy(0.5);
        let mut sink = FlakySink { failures: 1, saved: Vec::new() };
        let params = Parameters::new();
        let record = |epoch| EpochRecord {
            epoch,
            phase: Phase::Eval,
            loss: 0.0,
            accuracy: 0.8,
            samples: 10,
        };

        let result = trainer.record_validation(&record(1), &params, Some(&mut sink));
        assert!(matches!(result, Err(TrainError::Checkpoint(_))));
        assert_eq!(trainer.best().best_value(), None);

        // the same accuracy still counts as an improvement next time
        assert!(trainer.record_validation(&record(2), &params, Some(&mut sink)).unwrap());
        assert_eq!(sink.saved, vec![2]);
        assert_eq!(trainer.best().best_epoch(), Some(2));
    }

    #[test]
    fn test_fit_learns_separable_data() {
        let mut train = DataLoader::new(separable(20), 4).unwrap().shuffle(true).seed(1);
        let mut val = DataLoader::new(separable(10), 5).unwrap();
        let mut model = LinearClassifier::new(2, 2, 3);
        let mut optimizer = Sgd::new(0.5);
        let mut sink = CountingSink::default();

        let mut trainer = Trainer::new(5);
        let history = trainer
            .fit(
                &mut model,
                &mut optimizer,
                &mut train,
                Some(&mut val),
                FitHooks::new().checkpoint(&mut sink),
            )
            .unwrap();

        assert_eq!(history.len(), 10);
        let val_acc = history.accuracies(Phase::Eval);
        assert!((val_acc.last().unwrap() - 1.0).abs() < 1e-12);
        let train_loss = history.losses(Phase::Train);
        assert!(train_loss.last().unwrap() < train_loss.first().unwrap());
        assert!(!sink.saved.is_empty());
    }

    #[test]
    fn test_val_interval_skips_epochs() {
        let mut train = DataLoader::new(separable(6), 3).unwrap();
        let mut val = DataLoader::new(separable(4), 2).unwrap();
        let mut model = ConstantClassifier::predicting(1, 2);
        let mut optimizer = Sgd::new(0.1);

        let history = Trainer::new(4)
            .with_val_interval(2)
            .fit(&mut model, &mut optimizer, &mut train, Some(&mut val), FitHooks::new())
            .unwrap();

        let eval_epochs: Vec<usize> = history.phase(Phase::Eval).map(|r| r.epoch).collect();
        assert_eq!(eval_epochs, vec![2, 4]);
    }
}
