// --- File: src/config.rs ---

//! Run configuration loaded from a TOML file.
//!
//! Every field except `data.index_path` has a default, so the smallest
//! usable file is:
//!
//! ```toml
//! [data]
//! index_path = "labels.csv"
//! ```

use crate::data::IndexFormat;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

type Result<T> = std::result::Result<T, ConfigError>;

/// Intensity step at the head of the transform chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntensityMode {
    /// Min-max rescale into [0, 1].
    Scale,
    /// Per-image z-score.
    Standardize,
}

/// Which optimizer updates the model parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Sgd,
    Adam,
}

/// Random 90° rotation used for training-time augmentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentConfig {
    pub enabled: bool,
    /// Probability that a sample is rotated at all.
    pub prob: f32,
    /// Largest number of quarter turns.
    pub max_k: u32,
    /// Spatial axes spanning the rotation plane.
    pub axes: [usize; 2],
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prob: 0.8,
            max_k: 3,
            axes: [0, 1],
        }
    }
}

/// Where samples come from and how they are preprocessed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Label index file with (path, class) rows.
    pub index_path: PathBuf,
    /// Separate validation index; when absent the main index is split.
    pub val_index_path: Option<PathBuf>,
    /// Directory that image paths are relative to. Defaults to the index file's directory.
    pub root: Option<PathBuf>,
    pub delimiter: char,
    pub has_header: bool,
    pub path_column: usize,
    pub label_column: usize,
    /// Appended to every path read from the index (e.g. ".dcm").
    pub path_suffix: Option<String>,
    /// Explicit class order. Sorted distinct labels are used otherwise.
    pub classes: Option<Vec<String>>,
    /// Spatial shape every sample is resized to.
    pub target_shape: Vec<usize>,
    pub intensity: IntensityMode,
    pub augment: AugmentConfig,
    /// Fraction of the index held out for validation.
    pub val_fraction: f32,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            index_path: PathBuf::new(),
            val_index_path: None,
            root: None,
            delimiter: ',',
            has_header: true,
            path_column: 0,
            label_column: 1,
            path_suffix: None,
            classes: None,
            target_shape: vec![224, 224],
            intensity: IntensityMode::Scale,
            augment: AugmentConfig::default(),
            val_fraction: 0.2,
        }
    }
}

impl DataConfig {
    /// Column layout of the label index.
    pub fn index_format(&self) -> IndexFormat {
        IndexFormat {
            delimiter: self.delimiter,
            has_header: self.has_header,
            path_column: self.path_column,
            label_column: self.label_column,
            path_suffix: self.path_suffix.clone(),
        }
    }

    /// Root directory for image paths.
    pub fn resolved_root(&self) -> PathBuf {
        match &self.root {
            Some(root) => root.clone(),
            None => self
                .index_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        }
    }

    /// Shape of one transformed sample: `[1, *target_shape]`.
    pub fn sample_shape(&self) -> Vec<usize> {
        let mut shape = vec![1];
        shape.extend(&self.target_shape);
        shape
    }
}

/// Optimisation hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub shuffle: bool,
    pub drop_last: bool,
    pub learning_rate: f32,
    pub optimizer: OptimizerKind,
    /// Only used by SGD.
    pub momentum: f32,
    /// Validate every N epochs.
    pub val_interval: usize,
    /// Seed for splitting, shuffling, augmentation and weight init.
    pub seed: Option<u64>,
    /// Threads decoding samples inside a batch; 0 or 1 decodes inline.
    pub num_workers: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 5,
            batch_size: 2,
            shuffle: true,
            drop_last: false,
            learning_rate: 1e-4,
            optimizer: OptimizerKind::Adam,
            momentum: 0.9,
            val_interval: 1,
            seed: None,
            num_workers: 0,
        }
    }
}

/// Best-model checkpoint location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointSettings {
    pub enabled: bool,
    /// Directory name below `output_dir`.
    pub dir: PathBuf,
    pub model_name: String,
    /// Validation accuracy a model must beat before it is saved.
    /// Defaults to chance level, `1 / num_classes`.
    pub min_accuracy: Option<f64>,
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("best_model"),
            model_name: "linear".to_string(),
            min_accuracy: None,
        }
    }
}

/// Complete run configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub data: DataConfig,
    pub train: TrainConfig,
    pub checkpoint: CheckpointSettings,
    /// History and checkpoints are written here.
    pub output_dir: PathBuf,
}

impl RunConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: RunConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// Relative `index_path`, `val_index_path`, `root` and `output_dir`
    /// are resolved against the config file's directory.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: RunConfig = toml::from_str(&text)?;
        if let Some(base) = path.parent() {
            config.rebase(base);
        }
        config.validate()?;
        Ok(config)
    }

    fn rebase(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        join(&mut self.data.index_path);
        if let Some(p) = self.data.val_index_path.as_mut() {
            join(p);
        }
        if let Some(p) = self.data.root.as_mut() {
            join(p);
        }
        join(&mut self.output_dir);
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.data.index_path.as_os_str().is_empty() {
            return invalid("data.index_path is required");
        }
        if self.data.label_column == self.data.path_column {
            return invalid("data.path_column and data.label_column must differ");
        }
        if !(2..=3).contains(&self.data.target_shape.len()) {
            return invalid("data.target_shape must have 2 or 3 dimensions");
        }
        if self.data.target_shape.iter().any(|&d| d == 0) {
            return invalid("data.target_shape entries must be positive");
        }
        if !(0.0..1.0).contains(&self.data.val_fraction) {
            return invalid("data.val_fraction must be in [0, 1)");
        }
        let aug = &self.data.augment;
        if !(0.0..=1.0).contains(&aug.prob) {
            return invalid("data.augment.prob must be in [0, 1]");
        }
        let rank = self.data.target_shape.len();
        if aug.axes[0] == aug.axes[1] || aug.axes[0] >= rank || aug.axes[1] >= rank {
            return invalid("data.augment.axes must be two distinct spatial axes");
        }
        if self.train.epochs == 0 {
            return invalid("train.epochs must be at least 1");
        }
        if self.train.batch_size == 0 {
            return invalid("train.batch_size must be at least 1");
        }
        if self.train.val_interval == 0 {
            return invalid("train.val_interval must be at least 1");
        }
        if !(self.train.learning_rate > 0.0) {
            return invalid("train.learning_rate must be positive");
        }
        if let Some(min) = self.checkpoint.min_accuracy {
            if !(0.0..1.0).contains(&min) {
                return invalid("checkpoint.min_accuracy must be in [0, 1)");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = RunConfig::from_toml_str("[data]\nindex_path = \"labels.csv\"\n").unwrap();
        assert_eq!(config.train.batch_size, 2);
        assert_eq!(config.data.target_shape, vec![224, 224]);
        assert_eq!(config.data.intensity, IntensityMode::Scale);
        assert_eq!(config.data.sample_shape(), vec![1, 224, 224]);
        assert!(config.checkpoint.enabled);
    }

    #[test]
    fn test_full_config() {
        let text = r#"
            output_dir = "runs/mri"

            [data]
            index_path = "ixi/labels.tsv"
            delimiter = "\t"
            has_header = false
            target_shape = [96, 96, 96]
            intensity = "standardize"
            classes = ["female", "male"]

            [data.augment]
            prob = 0.5
            axes = [0, 2]

            [train]
            epochs = 3
            batch_size = 4
            optimizer = "sgd"
            learning_rate = 0.01
            seed = 7
        "#;
        let config = RunConfig::from_toml_str(text).unwrap();
        assert_eq!(config.data.delimiter, '\t');
        assert_eq!(config.data.target_shape, vec![96, 96, 96]);
        assert_eq!(config.data.intensity, IntensityMode::Standardize);
        assert_eq!(config.data.augment.axes, [0, 2]);
        assert_eq!(config.data.augment.max_k, 3);
        assert_eq!(config.train.optimizer, OptimizerKind::Sgd);
        assert_eq!(config.train.seed, Some(7));
        assert_eq!(config.data.resolved_root(), PathBuf::from("ixi"));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(RunConfig::from_toml_str("[train]\nepochs = 1\n").is_err());

        let zero_batch = "[data]\nindex_path = \"a.csv\"\n[train]\nbatch_size = 0\n";
        assert!(matches!(
            RunConfig::from_toml_str(zero_batch),
            Err(ConfigError::Invalid(_))
        ));

        let bad_shape = "[data]\nindex_path = \"a.csv\"\ntarget_shape = [4]\n";
        assert!(RunConfig::from_toml_str(bad_shape).is_err());

        let bad_axes = "[data]\nindex_path = \"a.csv\"\ntarget_shape = [4, 4]\n[data.augment]\naxes = [0, 2]\n";
        assert!(RunConfig::from_toml_str(bad_axes).is_err());
    }
}
