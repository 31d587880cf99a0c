// --- File: src/data/mod.rs ---

//! # Data Loading Module
//!
//! Everything between a label index on disk and a stacked batch tensor.
//!
//! ## Key Components
//!
//! - [`LabelIndex`] / [`ClassMapping`]: the (path, class) table and its
//!   class-name <-> index bijection
//! - [`decode`]: NIfTI-1, DICOM and raster readers producing grayscale grids
//! - [`transforms`]: intensity scaling, channel insertion, resize, rotation
//! - [`Dataset`]: random access to `(tensor, class index)` pairs
//! - [`DataLoader`]: batched iteration with optional shuffling
//!
//! ## Example
//!
//! ```ignore
//! use rustyscan::data::{DataLoader, LabelIndex, IndexFormat, ScanDataset};
//!
//! let index = LabelIndex::from_path("labels.csv", &IndexFormat::default())?;
//! let classes = index.class_mapping();
//! let dataset = ScanDataset::new(index.into_samples(), "images", classes, chain, 42);
//!
//! let mut loader = DataLoader::new(dataset, 4)?.shuffle(true).seed(42);
//! for batch in loader.iter() {
//!     let batch = batch?;
//!     // batch.inputs: [B, 1, H, W], batch.labels: Vec<usize>
//! }
//! ```

pub mod dataloader;
pub mod dataset;
pub mod decode;
pub mod index;
pub mod sampler;
pub mod transforms;

pub use dataloader::{Batch, DataLoader};
pub use dataset::{Dataset, InMemoryDataset, ScanDataset};
pub use decode::{AutoDecoder, DecodeError, Decoder, ImageFormat};
pub use index::{train_val_split, ClassMapping, IndexFormat, LabelIndex, LabeledSample};
pub use sampler::{BatchSampler, RandomSampler, Sampler, SequentialSampler};
pub use transforms::{Compose, Transform, TransformError};

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading the index or producing samples and batches.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("label index {path}, line {line}: {reason}")]
    IndexParse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("unknown label '{0}'")]
    UnknownLabel(String),

    #[error("duplicate class name '{0}'")]
    DuplicateClass(String),

    #[error("index {index} out of range for dataset of {len} samples")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("sample {index} has shape {actual:?}, batch expects {expected:?}")]
    ShapeMismatch {
        index: usize,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("sample {index} ({path}): {source}")]
    Sample {
        index: usize,
        path: PathBuf,
        #[source]
        source: Box<DataError>,
    },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no samples to iterate")]
    EmptyDataset,

    #[error("invalid loader configuration: {0}")]
    InvalidConfig(String),
}
