//! # RustyScan: medical scan classification in Rust
//!
//! **RustyScan** trains image classifiers on labelled medical scans
//! (NIfTI-1, DICOM or ordinary raster images). A label index maps each
//! image path to a class name; images are decoded, pushed through a
//! transform chain, batched and fed to a classifier whose best
//! validation state is checkpointed to disk.
//!
//! ## Usage Example
//!
//! ```no_run
//! use rustyscan::config::RunConfig;
//! use rustyscan::pipeline::run_training;
//!
//! let config = RunConfig::from_path("run.toml")?;
//! let summary = run_training(&config)?;
//! println!("best: {:?}", summary.best);
//! # Ok::<(), rustyscan::training::TrainError>(())
//! ```

pub mod config;
pub mod data;
pub mod losses;
pub mod metrics;
pub mod model;
pub mod optimizers;
pub mod phase;
pub mod pipeline;
pub mod serialization;
pub mod training;

pub use phase::Phase;
