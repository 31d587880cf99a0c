// --- File: src/training/mod.rs ---

//! Epoch loop, metric bookkeeping and best-model selection.
//!
//! # Example
//!
//! ```rust,ignore
//! use rustyscan::training::{FitHooks, Trainer};
//!
//! let mut trainer = Trainer::new(10).with_val_interval(2);
//! let history = trainer.fit(
//!     &mut model,
//!     &mut optimizer,
//!     &mut train_loader,
//!     Some(&mut val_loader),
//!     FitHooks::new().checkpoint(&mut sink),
//! )?;
//! history.save_json("runs/history.json")?;
//! ```

pub mod accumulator;
pub mod history;
pub mod trainer;

pub use accumulator::EpochAccumulator;
pub use history::{EpochRecord, History};
pub use trainer::{BatchObserver, FitHooks, Trainer};

use crate::config::ConfigError;
use crate::data::DataError;
use crate::model::ModelError;
use crate::serialization::CheckpointError;
use std::path::PathBuf;
use thiserror::Error;

/// Any failure that stops a run.
#[derive(Error, Debug)]
pub enum TrainError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no checkpoint was written: validation accuracy never beat {0:.4}")]
    NoCheckpoint(f64),
}

pub type Result<T> = std::result::Result<T, TrainError>;
