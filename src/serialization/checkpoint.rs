// --- File: src/serialization/checkpoint.rs ---

//! Saving and loading model checkpoints.
//!
//! A checkpoint is a directory holding:
//! - model weights (SafeTensors)
//! - metadata needed to rebuild and judge the model: epoch, best metric,
//!   class names, sample shape

use super::safetensors_io::{load_safetensors, save_safetensors, SafeTensorsError};
use crate::model::Parameters;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Metadata file inside a checkpoint directory.
pub const META_FILE: &str = "meta.json";
/// Weights file inside a checkpoint directory.
pub const WEIGHTS_FILE: &str = "model.safetensors";
/// Current checkpoint format version.
pub const FORMAT_VERSION: &str = "1.0";

/// Checkpoint errors
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SafeTensors error: {0}")]
    SafeTensors(#[from] SafeTensorsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("checkpoint directory does not exist: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("unsupported checkpoint version {0}")]
    UnsupportedVersion(String),

    #[error("invalid metadata entry {key} = '{value}'")]
    InvalidMetadata { key: String, value: String },
}

type Result<T> = std::result::Result<T, CheckpointError>;

/// Checkpoint metadata, stored as `meta.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// Checkpoint format version
    pub version: String,
    /// Architecture name, as accepted by `build_classifier`
    pub model_name: String,
    /// Epoch the weights were taken at (1-based)
    pub epoch: usize,
    /// Name of the metric that selected this checkpoint
    pub metric_name: String,
    /// Value of that metric
    pub best_metric: f64,
    /// Class names in index order
    pub class_names: Vec<String>,
    /// Shape of one input sample, without the batch axis
    pub sample_shape: Vec<usize>,
    pub learning_rate: f32,
    /// Free-form extra information
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl CheckpointMeta {
    pub fn new(model_name: &str, class_names: Vec<String>, sample_shape: Vec<usize>) -> Self {
        Self {
            version: FORMAT_VERSION.to_string(),
            model_name: model_name.to_string(),
            epoch: 0,
            metric_name: "val_accuracy".to_string(),
            best_metric: 0.0,
            class_names,
            sample_shape,
            learning_rate: 0.0,
            metadata: BTreeMap::new(),
        }
    }

    /// Sets the epoch
    pub fn with_epoch(mut self, epoch: usize) -> Self {
        self.epoch = epoch;
        self
    }

    /// Sets the selecting metric and its value
    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        self.metric_name = name.to_string();
        self.best_metric = value;
        self
    }

    /// Sets the learning rate
    pub fn with_learning_rate(mut self, lr: f32) -> Self {
        self.learning_rate = lr;
        self
    }

    /// Adds a metadata entry
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Run seed stored under the `"seed"` metadata key, if any.
    pub fn seed(&self) -> Result<Option<u64>> {
        match self.metadata.get("seed") {
            None => Ok(None),
            Some(value) => value.trim().parse().map(Some).map_err(|_| CheckpointError::InvalidMetadata {
                key: "seed".to_string(),
                value: value.clone(),
            }),
        }
    }
}

/// A loaded checkpoint.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub meta: CheckpointMeta,
    pub weights: Parameters,
}

/// Saves a checkpoint to a directory, replacing earlier contents.
///
/// Directory layout:
/// ```text
/// checkpoint_dir/
/// ├── meta.json            # CheckpointMeta
/// └── model.safetensors    # Model weights
/// ```
pub fn save_checkpoint<P: AsRef<Path>>(path: P, meta: &CheckpointMeta, weights: &Parameters) -> Result<()> {
    let dir = path.as_ref();
    fs::create_dir_all(dir)?;

    save_safetensors(dir.join(WEIGHTS_FILE), weights)?;

    let mut writer = BufWriter::new(File::create(dir.join(META_FILE))?);
    serde_json::to_writer_pretty(&mut writer, meta)?;
    writer.flush()?;

    Ok(())
}

/// Loads a checkpoint from a directory.
pub fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<Checkpoint> {
    let dir = path.as_ref();
    if !dir.is_dir() {
        return Err(CheckpointError::DirectoryNotFound(dir.to_path_buf()));
    }

    let meta_path = dir.join(META_FILE);
    if !meta_path.exists() {
        return Err(CheckpointError::FileNotFound(meta_path));
    }
    let meta: CheckpointMeta = serde_json::from_reader(BufReader::new(File::open(&meta_path)?))?;
    if meta.version != FORMAT_VERSION {
        return Err(CheckpointError::UnsupportedVersion(meta.version));
    }

    let weights_path = dir.join(WEIGHTS_FILE);
    if !weights_path.exists() {
        return Err(CheckpointError::FileNotFound(weights_path));
    }
    let weights = load_safetensors(&weights_path)?;

    Ok(Checkpoint { meta, weights })
}

/// Destination for best-so-far model snapshots.
pub trait CheckpointSink {
    /// Persists `params`, taken after `epoch` with validation `metric`.
    fn save(&mut self, epoch: usize, metric: f64, params: &Parameters) -> Result<()>;
}

/// Keeps the single best model in one fixed directory.
///
/// Every call overwrites the previous snapshot.
pub struct BestModelCheckpoint {
    dir: PathBuf,
    template: CheckpointMeta,
    writes: usize,
}

impl BestModelCheckpoint {
    /// # Arguments
    ///
    /// * `dir` - Directory the checkpoint is written to
    /// * `template` - Metadata copied into every snapshot; epoch and metric
    ///   are filled in per save
    pub fn new<P: Into<PathBuf>>(dir: P, template: CheckpointMeta) -> Self {
        Self {
            dir: dir.into(),
            template,
            writes: 0,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of snapshots written so far.
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl CheckpointSink for BestModelCheckpoint {
    fn save(&mut self, epoch: usize, metric: f64, params: &Parameters) -> Result<()> {
        let meta = self
            .template
            .clone()
            .with_epoch(epoch)
            .with_metric(&self.template.metric_name, metric);
        save_checkpoint(&self.dir, &meta, params)?;
        self.writes += 1;
        log::info!(
            "saved new best model to {} ({} = {:.4}, epoch {})",
            self.dir.display(),
            meta.metric_name,
            metric,
            epoch
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    fn weights(value: f32) -> Parameters {
        let mut weights = Parameters::new();
        weights.insert("linear.weight".to_string(), ArrayD::from_elem(IxDyn(&[2, 2]), value));
        weights
    }

    fn meta() -> CheckpointMeta {
        CheckpointMeta::new("linear", vec!["female".into(), "male".into()], vec![1, 8, 8])
            .with_learning_rate(1e-4)
            .with_metadata("seed", "7")
    }

    #[test]
    fn test_meta_builder() {
        let meta = meta().with_epoch(3).with_metric("val_accuracy", 0.75);
        assert_eq!(meta.version, FORMAT_VERSION);
        assert_eq!(meta.epoch, 3);
        assert!((meta.best_metric - 0.75).abs() < 1e-12);
        assert_eq!(meta.metadata.get("seed"), Some(&"7".to_string()));
    }

    #[test]
    fn test_stored_seed() {
        assert_eq!(meta().seed().unwrap(), Some(7));

        let unseeded = CheckpointMeta::new("linear", vec!["a".into()], vec![1, 2, 2]);
        assert_eq!(unseeded.seed().unwrap(), None);

        let corrupt = meta().with_metadata("seed", "seven");
        match corrupt.seed() {
            Err(CheckpointError::InvalidMetadata { key, value }) => {
                assert_eq!(key, "seed");
                assert_eq!(value, "seven");
            }
            other => panic!("expected invalid metadata, got {other:?}"),
        }
    }

    #[test]
    fn test_save_load_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("best");
        let meta = meta().with_epoch(5);

        save_checkpoint(&path, &meta, &weights(1.5)).unwrap();
        let loaded = load_checkpoint(&path).unwrap();

        assert_eq!(loaded.meta, meta);
        assert_eq!(loaded.weights, weights(1.5));
    }

    #[test]
    fn test_load_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_checkpoint(dir.path().join("absent")),
            Err(CheckpointError::DirectoryNotFound(_))
        ));
        assert!(matches!(
            load_checkpoint(dir.path()),
            Err(CheckpointError::FileNotFound(p)) if p.ends_with(META_FILE)
        ));
    }

    #[test]
    fn test_best_model_checkpoint_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = BestModelCheckpoint::new(dir.path().join("best"), meta());

        sink.save(1, 0.6, &weights(1.0)).unwrap();
        sink.save(4, 0.8, &weights(2.0)).unwrap();
        assert_eq!(sink.writes(), 2);

        let loaded = load_checkpoint(sink.dir()).unwrap();
        assert_eq!(loaded.meta.epoch, 4);
        assert!((loaded.meta.best_metric - 0.8).abs() < 1e-12);
        assert_eq!(loaded.weights, weights(2.0));
    }
}
