// --- File: src/metrics/running.rs ---

//! Metrics tracked across epochs.

/// Tracks the best value of a metric to maximize.
///
/// Only a strict improvement over the current best counts. An optional
/// baseline sets the value a metric has to beat before anything is
/// recorded, e.g. chance-level accuracy.
#[derive(Debug, Clone)]
pub struct BestMetric {
    /// Name of the tracked metric
    metric_name: String,
    /// Value to beat before the first improvement
    baseline: Option<f64>,
    /// Best value so far
    best_value: Option<f64>,
    /// Epoch of the best value
    best_epoch: Option<usize>,
}

impl BestMetric {
    /// Creates a tracker with no baseline.
    pub fn maximize(metric_name: &str) -> Self {
        Self {
            metric_name: metric_name.to_string(),
            baseline: None,
            best_value: None,
            best_epoch: None,
        }
    }

    /// Sets the value the metric has to exceed.
    pub fn with_baseline(mut self, baseline: f64) -> Self {
        self.baseline = Some(baseline);
        self
    }

    /// Whether `value` would be a strict improvement. Does not record it.
    pub fn improves(&self, value: f64) -> bool {
        match self.best_value.or(self.baseline) {
            Some(best) => value > best,
            None => !value.is_nan(),
        }
    }

    /// Stores `value` as the new best.
    pub fn record(&mut self, value: f64, epoch: usize) {
        self.best_value = Some(value);
        self.best_epoch = Some(epoch);
    }

    /// Records a value if it improves. Returns `true` if it did.
    pub fn check(&mut self, value: f64, epoch: usize) -> bool {
        let is_better = self.improves(value);
        if is_better {
            self.record(value, epoch);
        }
        is_better
    }

    /// Returns the name of the tracked metric.
    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    /// Returns the best value, if any value improved on the baseline.
    pub fn best_value(&self) -> Option<f64> {
        self.best_value
    }

    /// Returns the epoch of the best value.
    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    /// Resets the state; the baseline is kept.
    pub fn reset(&mut self) {
        self.best_value = None;
        self.best_epoch = None;
    }
}
