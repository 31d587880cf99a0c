// --- File: src/data/dataset.rs ---

//! The Dataset trait and its implementations.

use super::decode::{AutoDecoder, Decoder};
use super::index::{ClassMapping, LabeledSample};
use super::transforms::{Compose, Transform};
use super::DataError;
use ndarray::{ArrayD, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Trait for data sources.
///
/// Every dataset can:
/// - report its length
/// - return `(tensor, class index)` for any position in `0..len()`
pub trait Dataset: Send + Sync {
    /// Number of samples.
    fn len(&self) -> usize;

    /// Checks whether the dataset is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the preprocessed tensor and class index at `index`.
    fn get(&self, index: usize) -> Result<(ArrayD<f32>, usize), DataError>;

    /// Returns only the class index, without decoding.
    fn label(&self, index: usize) -> Result<usize, DataError>;

    /// Number of classes labels are drawn from.
    fn num_classes(&self) -> usize;

    /// Shape of one sample, without the batch axis.
    ///
    /// The default decodes sample 0.
    fn sample_shape(&self) -> Result<Vec<usize>, DataError> {
        if self.is_empty() {
            return Err(DataError::EmptyDataset);
        }
        Ok(self.get(0)?.0.shape().to_vec())
    }

    /// Called by the loader at the start of every pass.
    ///
    /// Datasets with random augmentation use it to vary their random
    /// stream between epochs.
    fn set_epoch(&mut self, _epoch: u64) {}
}

/// Dataset over image files listed in a label index.
///
/// `get` decodes the file, runs the transform chain and looks up the class
/// index. Any failure is reported together with the sample position and
/// path. Augmentation randomness is derived from `(seed, epoch, index)`, so
/// results do not depend on which thread decodes a sample.
pub struct ScanDataset {
    samples: Vec<LabeledSample>,
    root: PathBuf,
    classes: ClassMapping,
    decoder: Box<dyn Decoder>,
    transform: Compose,
    sample_shape: Option<Vec<usize>>,
    seed: u64,
    epoch: u64,
}

impl ScanDataset {
    /// Creates a dataset decoding with [`AutoDecoder`].
    pub fn new<P: Into<PathBuf>>(
        samples: Vec<LabeledSample>,
        root: P,
        classes: ClassMapping,
        transform: Compose,
        seed: u64,
    ) -> Self {
        Self {
            samples,
            root: root.into(),
            classes,
            decoder: Box::new(AutoDecoder),
            transform,
            sample_shape: None,
            seed,
            epoch: 0,
        }
    }

    /// Declares the shape the transform chain produces, e.g. `[1, 96, 96, 96]`.
    pub fn with_sample_shape(mut self, shape: Vec<usize>) -> Self {
        self.sample_shape = Some(shape);
        self
    }

    /// Replaces the decoder.
    pub fn with_decoder<D: Decoder + 'static>(mut self, decoder: D) -> Self {
        self.decoder = Box::new(decoder);
        self
    }

    pub fn samples(&self) -> &[LabeledSample] {
        &self.samples
    }

    pub fn classes(&self) -> &ClassMapping {
        &self.classes
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full path of the sample at `index`.
    pub fn path_of(&self, index: usize) -> Option<PathBuf> {
        self.samples.get(index).map(|s| self.root.join(&s.path))
    }

    fn sample_rng(&self, index: usize) -> StdRng {
        let mixed = self.seed
            ^ self.epoch.wrapping_mul(0x9E37_79B9_7F4A_7C15)
            ^ (index as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F);
        StdRng::seed_from_u64(mixed)
    }

    fn load(&self, index: usize, path: &Path, label: &str) -> Result<(ArrayD<f32>, usize), DataError> {
        let class = self.classes.index_of(label)?;
        let image = self.decoder.decode(path)?;
        let mut rng = self.sample_rng(index);
        let tensor = self.transform.apply(image, &mut rng)?;
        Ok((tensor, class))
    }
}

impl Dataset for ScanDataset {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn get(&self, index: usize) -> Result<(ArrayD<f32>, usize), DataError> {
        let sample = self.samples.get(index).ok_or(DataError::IndexOutOfRange {
            index,
            len: self.samples.len(),
        })?;
        let path = self.root.join(&sample.path);
        self.load(index, &path, &sample.label).map_err(|source| DataError::Sample {
            index,
            path,
            source: Box::new(source),
        })
    }

    fn label(&self, index: usize) -> Result<usize, DataError> {
        let sample = self.samples.get(index).ok_or(DataError::IndexOutOfRange {
            index,
            len: self.samples.len(),
        })?;
        self.classes.index_of(&sample.label)
    }

    fn num_classes(&self) -> usize {
        self.classes.len()
    }

    fn sample_shape(&self) -> Result<Vec<usize>, DataError> {
        match &self.sample_shape {
            Some(shape) => Ok(shape.clone()),
            None if self.samples.is_empty() => Err(DataError::EmptyDataset),
            None => Ok(self.get(0)?.0.shape().to_vec()),
        }
    }

    fn set_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
    }
}

/// Dataset holding ready tensors in memory.
///
/// Used for synthetic data and tests.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    /// Features of shape [num_samples, ...]
    features: Arc<ArrayD<f32>>,
    labels: Vec<usize>,
    num_classes: usize,
}

impl InMemoryDataset {
    /// Creates a dataset from stacked features and class indices.
    ///
    /// # Panics
    ///
    /// Panics if the sample counts differ or a label is `>= num_classes`.
    pub fn new(features: ArrayD<f32>, labels: Vec<usize>, num_classes: usize) -> Self {
        assert!(features.ndim() >= 1, "features need a sample axis");
        assert_eq!(
            features.shape()[0],
            labels.len(),
            "Number of samples in features and labels must match"
        );
        assert!(
            labels.iter().all(|&l| l < num_classes),
            "labels must be below num_classes"
        );
        Self {
            features: Arc::new(features),
            labels,
            num_classes,
        }
    }

    /// Shape of one sample (without the sample axis).
    pub fn feature_shape(&self) -> Vec<usize> {
        self.features.shape()[1..].to_vec()
    }
}

impl Dataset for InMemoryDataset {
    fn len(&self) -> usize {
        self.labels.len()
    }

    fn get(&self, index: usize) -> Result<(ArrayD<f32>, usize), DataError> {
        let label = self.label(index)?;
        let feature = self.features.index_axis(Axis(0), index).to_owned();
        Ok((feature, label))
    }

    fn label(&self, index: usize) -> Result<usize, DataError> {
        self.labels.get(index).copied().ok_or(DataError::IndexOutOfRange {
            index,
            len: self.labels.len(),
        })
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn sample_shape(&self) -> Result<Vec<usize>, DataError> {
        Ok(self.feature_shape())
    }
}
