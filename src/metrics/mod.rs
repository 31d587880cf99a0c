// --- File: src/metrics/mod.rs ---

//! Metrics for judging a classifier.
//!
//! - **Accuracy**: fraction of correctly predicted class indices
//! - **ConfusionMatrix**: counts per (actual, predicted) pair, with
//!   per-class precision and recall
//! - **BestMetric**: tracks the best validation value seen so far
//!
//! # Example
//!
//! ```rust,ignore
//! use rustyscan::metrics::{Accuracy, Metric};
//!
//! let mut accuracy = Accuracy::new();
//! accuracy.update(&predicted, &labels);
//! println!("Accuracy: {:.4}", accuracy.compute());
//! accuracy.reset();
//! ```

pub mod classification;
pub mod running;

pub use classification::{Accuracy, ConfusionMatrix};
pub use running::BestMetric;

/// Base trait for metrics.
pub trait Metric: Send + Sync {
    /// Prediction type
    type Prediction: ?Sized;
    /// Target type
    type Target: ?Sized;
    /// Result type
    type Output;

    /// Updates the metric state with new data.
    fn update(&mut self, predictions: &Self::Prediction, targets: &Self::Target);

    /// Computes the current metric value.
    fn compute(&self) -> Self::Output;

    /// Resets the metric state.
    fn reset(&mut self);

    /// Returns the metric name.
    fn name(&self) -> &str;
}
