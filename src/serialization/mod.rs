// --- File: src/serialization/mod.rs ---

//! Persisting models.
//!
//! - **SafeTensors**: model weights
//! - **JSON**: checkpoint metadata
//! - **Checkpoint**: weights plus metadata in one directory
//!
//! # Example
//!
//! ```rust,ignore
//! use rustyscan::serialization::{load_checkpoint, save_checkpoint, CheckpointMeta};
//!
//! let meta = CheckpointMeta::new("linear", class_names, vec![1, 96, 96, 96]).with_epoch(3);
//! save_checkpoint("runs/best_model", &meta, model.parameters())?;
//!
//! let checkpoint = load_checkpoint("runs/best_model")?;
//! ```

pub mod checkpoint;
pub mod safetensors_io;

pub use checkpoint::{
    load_checkpoint, save_checkpoint, BestModelCheckpoint, Checkpoint, CheckpointError, CheckpointMeta,
    CheckpointSink,
};
pub use safetensors_io::{load_safetensors, save_safetensors, tensor_info, SafeTensorsError};
