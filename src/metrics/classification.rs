// --- File: src/metrics/classification.rs ---

//! Classification metrics over class indices.

use super::Metric;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Accuracy = correct / total.
#[derive(Debug, Clone, Default)]
pub struct Accuracy {
    correct: usize,
    total: usize,
}

impl Accuracy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn correct(&self) -> usize {
        self.correct
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

impl Metric for Accuracy {
    type Prediction = [usize];
    type Target = [usize];
    type Output = f64;

    fn update(&mut self, predictions: &[usize], targets: &[usize]) {
        self.correct += predictions
            .iter()
            .zip(targets)
            .filter(|(p, t)| p == t)
            .count();
        self.total += predictions.len().min(targets.len());
    }

    fn compute(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.correct as f64 / self.total as f64
    }

    fn reset(&mut self) {
        self.correct = 0;
        self.total = 0;
    }

    fn name(&self) -> &str {
        "Accuracy"
    }
}

/// Confusion matrix for multi-class classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    num_classes: usize,
    matrix: Vec<Vec<usize>>, // [actual][predicted]
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![vec![0; num_classes]; num_classes],
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Returns the matrix, indexed `[actual][predicted]`.
    pub fn matrix(&self) -> &[Vec<usize>] {
        &self.matrix
    }

    /// Number of recorded predictions.
    pub fn total(&self) -> usize {
        self.matrix.iter().flatten().sum()
    }

    /// Computes accuracy.
    pub fn accuracy(&self) -> f64 {
        let correct: usize = (0..self.num_classes).map(|i| self.matrix[i][i]).sum();
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        correct as f64 / total as f64
    }

    /// Computes precision for each class.
    pub fn precision_per_class(&self) -> Vec<f64> {
        (0..self.num_classes)
            .map(|c| {
                let tp = self.matrix[c][c];
                let predicted_as_c: usize = (0..self.num_classes).map(|a| self.matrix[a][c]).sum();
                if predicted_as_c == 0 {
                    0.0
                } else {
                    tp as f64 / predicted_as_c as f64
                }
            })
            .collect()
    }

    /// Computes recall for each class.
    pub fn recall_per_class(&self) -> Vec<f64> {
        (0..self.num_classes)
            .map(|c| {
                let tp = self.matrix[c][c];
                let actual_c: usize = self.matrix[c].iter().sum();
                if actual_c == 0 {
                    0.0
                } else {
                    tp as f64 / actual_c as f64
                }
            })
            .collect()
    }

    /// Computes macro-averaged F1.
    pub fn macro_f1(&self) -> f64 {
        if self.num_classes == 0 {
            return 0.0;
        }
        let f1_sum: f64 = self
            .precision_per_class()
            .iter()
            .zip(self.recall_per_class())
            .map(|(&p, r)| if p + r == 0.0 { 0.0 } else { 2.0 * p * r / (p + r) })
            .sum();
        f1_sum / self.num_classes as f64
    }

    /// Renders the matrix plus per-class precision/recall as a text table.
    pub fn format_table(&self, class_names: &[String]) -> String {
        let label = |c: usize| class_names.get(c).cloned().unwrap_or_else(|| c.to_string());
        let width = (0..self.num_classes)
            .map(|c| label(c).len())
            .chain(std::iter::once(9))
            .max()
            .unwrap_or(9);

        let mut out = String::new();
        let _ = write!(out, "{:>width$}", "actual", width = width);
        for c in 0..self.num_classes {
            let _ = write!(out, " {:>width$}", label(c), width = width);
        }
        let _ = writeln!(out, " {:>9} {:>9}", "precision", "recall");

        let precision = self.precision_per_class();
        let recall = self.recall_per_class();
        for (a, row) in self.matrix.iter().enumerate() {
            let _ = write!(out, "{:>width$}", label(a), width = width);
            for count in row {
                let _ = write!(out, " {:>width$}", count, width = width);
            }
            let _ = writeln!(out, " {:>9.4} {:>9.4}", precision[a], recall[a]);
        }
        out
    }
}

impl Metric for ConfusionMatrix {
    type Prediction = [usize];
    type Target = [usize];
    type Output = f64;

    /// Records `(target, prediction)` pairs. Indices outside the matrix are skipped.
    fn update(&mut self, predictions: &[usize], targets: &[usize]) {
        for (&pred, &actual) in predictions.iter().zip(targets) {
            if actual < self.num_classes && pred < self.num_classes {
                self.matrix[actual][pred] += 1;
            }
        }
    }

    fn compute(&self) -> f64 {
        self.accuracy()
    }

    fn reset(&mut self) {
        for row in &mut self.matrix {
            row.fill(0);
        }
    }

    fn name(&self) -> &str {
        "ConfusionMatrix"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accuracy() {
        let mut acc = Accuracy::new();
        acc.update(&[0, 1, 1, 0], &[0, 1, 0, 0]);
        assert!((acc.compute() - 0.75).abs() < 1e-12);

        acc.update(&[1], &[0]);
        assert_eq!(acc.total(), 5);
        assert!((acc.compute() - 0.6).abs() < 1e-12);

        acc.reset();
        assert_eq!(acc.compute(), 0.0);
    }

    #[test]
    fn test_confusion_matrix_precision_recall() {
        let mut cm = ConfusionMatrix::new(2);
        // actual:    0 0 0 1 1
        // predicted: 0 1 0 1 0
        cm.update(&[0, 1, 0, 1, 0], &[0, 0, 0, 1, 1]);

        assert_eq!(cm.matrix().to_vec(), vec![vec![2, 1], vec![1, 1]]);
        assert!((cm.accuracy() - 0.6).abs() < 1e-12);

        let precision = cm.precision_per_class();
        assert!((precision[0] - 2.0 / 3.0).abs() < 1e-12);
        assert!((precision[1] - 0.5).abs() < 1e-12);

        let recall = cm.recall_per_class();
        assert!((recall[0] - 2.0 / 3.0).abs() < 1e-12);
        assert!((recall[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_confusion_matrix_skips_out_of_range() {
        let mut cm = ConfusionMatrix::new(2);
        cm.update(&[0, 5], &[0, 1]);
        assert_eq!(cm.total(), 1);
        cm.reset();
        assert_eq!(cm.total(), 0);
    }

    #[test]
    fn test_format_table_uses_class_names() {
        let mut cm = ConfusionMatrix::new(2);
        cm.update(&[0, 1], &[0, 1]);
        let table = cm.format_table(&["female".to_string(), "male".to_string()]);
        assert!(table.contains("female"));
        assert!(table.contains("precision"));
        assert_eq!(table.lines().count(), 3);
    }
}
